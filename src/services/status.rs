//! Read-only status view assembled for the presentation layer, plus the
//! override on/off actions it exposes.

use crate::clock::Clock;
use crate::config::Config;
use crate::decider::Decider;
use crate::occupancy::{OccupancySignal, PresenceCount, PresenceLog, presence_history};
use crate::readings::{self, NodeDisplayInfo, ReadingStore, RecentReading};
use crate::settings::SettingsStore;
use crate::utils::{Params, c_to_f};
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FurnaceState {
    On,
    Off,
    /// No primary node configured, so no decision has authority
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonStatus {
    pub id: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub seen_secs_ago: Option<i64>,
    pub is_home: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryPoint {
    pub time: DateTime<Utc>,
    pub temp: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeHistory {
    pub node_id: i64,
    #[serde(flatten)]
    pub display: NodeDisplayInfo,
    pub points: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphData {
    pub fahrenheit: bool,
    pub nodes: Vec<NodeHistory>,
    pub people: Vec<PresenceCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub furnace_state: FurnaceState,
    pub current_temp_c: Option<f64>,
    pub current_temp_f: Option<f64>,
    pub active_temp_c: f64,
    pub active_temp_f: f64,
    pub idle_temp_c: f64,
    pub idle_temp_f: f64,
    pub override_active: bool,
    pub house_occupied: bool,
    pub people: Vec<PersonStatus>,
    pub recent_readings: Vec<RecentReading>,
    pub uptime_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphData>,
}

/// Query windows used when building a snapshot.
#[derive(Debug, Clone, Copy)]
pub struct StatusWindows {
    pub recent: Duration,
    pub history: Duration,
    pub history_stride: usize,
    pub staleness_offset: Duration,
}

impl Default for StatusWindows {
    fn default() -> Self {
        StatusWindows {
            recent: Duration::minutes(5),
            history: Duration::weeks(1),
            history_stride: 5,
            staleness_offset: Duration::zero(),
        }
    }
}

impl From<&Config> for StatusWindows {
    fn from(cfg: &Config) -> Self {
        StatusWindows {
            recent: cfg.recent_window,
            history: cfg.history_window,
            history_stride: cfg.history_stride,
            staleness_offset: cfg.staleness_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusOptions {
    pub graph: bool,
    pub fahrenheit: bool,
}

impl StatusOptions {
    pub fn from_params(params: &Params) -> Self {
        StatusOptions {
            graph: params.get("graph").is_some_and(|v| v == "on"),
            fahrenheit: params.get("unit").is_some_and(|v| v == "f"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideAction {
    On,
    Off,
}

impl OverrideAction {
    pub fn from_params(params: &Params) -> Option<Self> {
        match params.get("override").map(String::as_str) {
            Some("on") => Some(OverrideAction::On),
            Some("off") => Some(OverrideAction::Off),
            _ => None,
        }
    }
}

/// Store the override timestamp (now) or clear it. Failures are logged.
pub fn apply_override<S, O, C>(decider: &Decider<'_, S, O, C>, action: OverrideAction)
where
    S: SettingsStore + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    let result = match action {
        OverrideAction::On => decider.activate_override(),
        OverrideAction::Off => decider.clear_override(),
    };
    if let Err(e) = result {
        warn!("Applying override {:?} failed: {}", action, e);
    }
}

fn furnace_state<S, O, C>(decider: &Decider<'_, S, O, C>) -> FurnaceState
where
    S: SettingsStore + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    match decider.primary_node() {
        Ok(Some(_)) if decider.last_furnace_state() => FurnaceState::On,
        Ok(Some(_)) => FurnaceState::Off,
        Ok(None) => FurnaceState::Unknown,
        Err(e) => {
            warn!("Reading primary node failed: {}", e);
            FurnaceState::Unknown
        }
    }
}

fn graph_data<S>(store: &S, windows: &StatusWindows, fahrenheit: bool) -> GraphData
where
    S: ReadingStore + PresenceLog + ?Sized,
{
    let history = readings::history_all_nodes(store, windows.history, windows.history_stride).unwrap_or_else(|e| {
        warn!("Loading reading history failed: {}", e);
        Default::default()
    });
    let convert = |t: f64| if fahrenheit { c_to_f(t) } else { t };
    let nodes = history
        .into_iter()
        .map(|(node_id, series)| NodeHistory {
            node_id,
            display: readings::display_info(store, node_id),
            points: series
                .into_iter()
                .map(|r| HistoryPoint {
                    time: r.time,
                    temp: r.temp_c.map(convert),
                    pressure: r.pressure,
                    humidity: r.humidity,
                })
                .collect(),
        })
        .collect();
    let people = presence_history(store, windows.history).unwrap_or_else(|e| {
        warn!("Loading people history failed: {}", e);
        Vec::new()
    });
    GraphData {
        fahrenheit,
        nodes,
        people,
    }
}

pub fn snapshot<S, O, C>(
    store: &S,
    occupancy: &O,
    clock: C,
    started: DateTime<Utc>,
    windows: &StatusWindows,
    options: StatusOptions,
) -> StatusSnapshot
where
    S: SettingsStore + ReadingStore + PresenceLog + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    let now = clock.now();
    let decider = Decider::new(store, occupancy, clock);

    let current_temp_c = match store.latest() {
        Ok(reading) => reading.and_then(|r| r.temp_c),
        Err(e) => {
            warn!("Loading latest reading failed: {}", e);
            None
        }
    };
    let active = decider.active_temp();
    let idle = decider.idle_temp();

    let people = occupancy
        .people()
        .into_iter()
        .map(|p| PersonStatus {
            seen_secs_ago: p.last_seen.map(|t| (now - t).num_seconds()),
            id: p.id,
            last_seen: p.last_seen,
            is_home: p.is_home,
        })
        .collect();

    let recent_readings =
        readings::recent_readings(store, windows.recent, windows.staleness_offset, now).unwrap_or_else(|e| {
            warn!("Loading recent readings failed: {}", e);
            Vec::new()
        });

    StatusSnapshot {
        furnace_state: furnace_state(&decider),
        current_temp_c,
        current_temp_f: current_temp_c.map(c_to_f),
        active_temp_c: active,
        active_temp_f: c_to_f(active),
        idle_temp_c: idle,
        idle_temp_f: c_to_f(idle),
        override_active: decider.override_active(),
        house_occupied: decider.anybody_home(),
        people,
        recent_readings,
        uptime_secs: (now - started).num_seconds(),
        graph: options.graph.then(|| graph_data(store, windows, options.fahrenheit)),
    }
}
