//! Thin blocking HTTP surface. A fixed set of worker threads pull requests
//! off one shared listener; each request runs its store calls independently.

use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::store::PgStore;
use crate::decider::Decider;
use crate::occupancy::Household;
use crate::services::control::{self, Burn};
use crate::services::status::{self, OverrideAction, StatusOptions, StatusWindows};
use crate::services::watchdog::Watchdog;
use crate::utils::{Params, split_url};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::io;
use std::sync::Arc;
use std::thread;
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

pub struct App {
    pub store: PgStore,
    pub household: Arc<Household>,
    pub watchdog: Arc<Watchdog>,
    pub windows: StatusWindows,
    pub started: DateTime<Utc>,
}

fn respond_text(request: Request, status: u16, body: &str) -> io::Result<()> {
    request.respond(Response::from_string(body).with_status_code(StatusCode(status)))
}

fn serve_control(app: &App, request: Request, params: &Params) -> io::Result<()> {
    app.watchdog.touch();
    let burn = match control::parse_report(params) {
        Ok(report) => control::handle_report(&app.store, app.household.as_ref(), SystemClock, &report),
        Err(e) => {
            warn!("Rejecting sensor report: {}", e);
            Burn::No
        }
    };
    respond_text(request, 200, burn.as_str())
}

fn serve_presence(app: &App, request: Request, params: &Params) -> io::Result<()> {
    match params.get("person") {
        Some(person) if app.household.mark_seen(person, Utc::now()) => respond_text(request, 200, "ok"),
        Some(_) => respond_text(request, 404, "unknown person"),
        None => respond_text(request, 400, "missing person"),
    }
}

fn serve_status(app: &App, request: Request, params: &Params) -> io::Result<()> {
    if let Some(action) = OverrideAction::from_params(params) {
        let decider = Decider::new(&app.store, app.household.as_ref(), SystemClock);
        status::apply_override(&decider, action);
        info!("Override switched {:?}", action);
    }

    let snapshot = status::snapshot(
        &app.store,
        app.household.as_ref(),
        SystemClock,
        app.started,
        &app.windows,
        StatusOptions::from_params(params),
    );
    let json = match serde_json::to_string(&snapshot) {
        Ok(json) => json,
        Err(e) => {
            warn!("Serializing status failed: {}", e);
            return respond_text(request, 500, "500");
        }
    };
    let response = Response::from_string(json);
    match Header::from_bytes("Content-Type", "application/json; charset=utf-8") {
        Ok(header) => request.respond(response.with_header(header)),
        Err(()) => request.respond(response),
    }
}

fn serve_request(app: &App, request: Request) -> io::Result<()> {
    let url = request.url().to_string();
    debug!("{:?} {}", request.method(), url);
    if *request.method() != Method::Get {
        return respond_text(request, 405, "405");
    }

    let (path, params) = split_url(&url);
    match path.as_str() {
        "/control" => serve_control(app, request, &params),
        "/presence" => serve_presence(app, request, &params),
        "/" => serve_status(app, request, &params),
        _ => respond_text(request, 404, "404"),
    }
}

fn worker(server: &Server, app: &App) {
    for request in server.incoming_requests() {
        if let Err(e) = serve_request(app, request) {
            warn!("Failed to answer request: {}", e);
        }
    }
}

/// Serve until the listener shuts down.
pub fn serve(cfg: &Config, app: Arc<App>) -> Result<(), String> {
    let server = Server::http(&cfg.listen_addr)
        .map(Arc::new)
        .map_err(|e| format!("could not start HTTP server at {}: {}", cfg.listen_addr, e))?;
    info!("Listening at http://{}/ with {} worker(s)", cfg.listen_addr, cfg.http_workers);

    let mut handles = Vec::with_capacity(cfg.http_workers);
    for i in 0..cfg.http_workers {
        let server = Arc::clone(&server);
        let app = Arc::clone(&app);
        let handle = thread::Builder::new()
            .name(format!("http-{}", i))
            .spawn(move || worker(&server, &app))
            .map_err(|e| format!("spawning HTTP worker failed: {}", e))?;
        handles.push(handle);
    }

    for handle in handles {
        if handle.join().is_err() {
            return Err("HTTP worker panicked".to_string());
        }
    }
    Ok(())
}
