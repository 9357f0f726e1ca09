pub mod clock;
pub mod config;
pub mod db {
    pub mod error;
    #[cfg(test)]
    pub mod memory;
    pub mod models;
    pub mod store;
}
pub mod decider;
pub mod occupancy;
pub mod readings;
pub mod schema;
pub mod server;
pub mod settings;
pub mod utils;
pub mod services {
    pub mod control;
    pub mod presence;
    pub mod status;
    pub mod watchdog;
}

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::store::PgStore;
use crate::occupancy::Household;
use crate::server::App;
use crate::services::presence;
use crate::services::status::StatusWindows;
use crate::services::watchdog::Watchdog;
use crate::settings::SettingKey;
use chrono::Utc;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Serve,
    Set { key: SettingKey, value: String },
}

fn apply_database_migrations(store: &PgStore) -> Result<(), String> {
    let mut conn = store.conn().map_err(|e| format!("DB connection failed: {}", e))?;
    match MigrationHarness::run_pending_migrations(&mut *conn, MIGRATIONS) {
        Ok(applied) => {
            if applied.is_empty() {
                info!("Database schema is up to date; no migrations were applied");
            } else {
                let names = applied.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
                info!("Applied {} database migration(s): {}", applied.len(), names);
            }
            Ok(())
        }
        Err(e) => Err(format!("Applying database migrations failed: {}", e)),
    }
}

fn connect(cfg: &Config) -> Result<PgStore, String> {
    let store = PgStore::connect(&cfg.database_url, cfg.db_pool_size, cfg.db_timeout)
        .map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");
    apply_database_migrations(&store)?;
    Ok(store)
}

fn serve(cfg: Config, store: PgStore) -> Result<(), String> {
    let household = Arc::new(Household::new(cfg.housemates.clone(), cfg.occupancy_window));
    info!("Tracking {} housemate(s)", cfg.housemates.len());

    let watchdog = Arc::new(Watchdog::new(cfg.watchdog_timeout));
    {
        let watchdog = Arc::clone(&watchdog);
        let interval = cfg.watchdog_interval;
        thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || watchdog.run(interval))
            .map_err(|e| format!("spawning watchdog failed: {}", e))?;
    }

    if cfg.housemates.is_empty() {
        info!("No HOUSEMATES configured; presence snapshots disabled");
    } else {
        let store = store.clone();
        let household = Arc::clone(&household);
        let interval = cfg.presence_snapshot_interval;
        thread::Builder::new()
            .name("presence".into())
            .spawn(move || presence::run_loop(&store, household.as_ref(), SystemClock, interval))
            .map_err(|e| format!("spawning presence recorder failed: {}", e))?;
    }

    let app = Arc::new(App {
        store,
        household,
        watchdog,
        windows: StatusWindows::from(&cfg),
        started: Utc::now(),
    });
    server::serve(&cfg, app)
}

fn run(command: Command) -> Result<(), String> {
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (listen={}, workers={}, housemates={}, history={}d/1:{}, watchdog={}s)",
        cfg.listen_addr,
        cfg.http_workers,
        cfg.housemates.len(),
        cfg.history_window.num_days(),
        cfg.history_stride,
        cfg.watchdog_timeout.as_secs()
    );

    let store = connect(&cfg)?;
    match command {
        Command::Serve => serve(cfg, store),
        Command::Set { key, value } => {
            settings::set_from_str(&store, key, &value)?;
            info!("Setting {} = {}", key.as_str(), value);
            Ok(())
        }
    }
}

fn parse_cli<I: IntoIterator<Item = String>>(args: I) -> Result<(Option<PathBuf>, Command), String> {
    let mut env_file: Option<PathBuf> = None;
    let mut positional = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let path = if arg == "--env-file" {
            Some(
                args.next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?,
            )
        } else if let Some(p) = arg.strip_prefix("--env-file=") {
            Some(p.to_string())
        } else if arg.starts_with("--") {
            return Err(format!("unrecognised argument: {}", arg));
        } else {
            positional.push(arg);
            None
        };
        if let Some(path) = path {
            if path.is_empty() {
                return Err("`--env-file` requires a path argument".to_string());
            }
            if env_file.replace(PathBuf::from(path)).is_some() {
                return Err("`--env-file` provided more than once".to_string());
            }
        }
    }

    let command = match positional.as_slice() {
        [] => Command::Serve,
        [cmd] if cmd == "serve" => Command::Serve,
        [cmd, key, value] if cmd == "set" => Command::Set {
            key: key.parse()?,
            value: value.clone(),
        },
        [cmd, ..] if cmd == "set" => return Err("usage: set <key> <value>".to_string()),
        [other, ..] => return Err(format!("unknown command: {}", other)),
    };
    Ok((env_file, command))
}

fn load_env(explicit: Option<PathBuf>) -> Result<Option<LoadedEnvFile>, String> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        config::load_env_file(&path)?;
        return Ok(Some(LoadedEnvFile { path, explicit: true }));
    }

    let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
    let default_path = cwd.join(".env");
    if default_path.is_file() {
        config::load_env_file(&default_path)?;
        Ok(Some(LoadedEnvFile {
            path: default_path,
            explicit: false,
        }))
    } else {
        Ok(None)
    }
}

fn main() {
    let (loaded_env, command) = match parse_cli(std::env::args().skip(1)).and_then(|(path, cmd)| Ok((load_env(path)?, cmd))) {
        Ok(v) => v,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "furnace-decider {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(command) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
