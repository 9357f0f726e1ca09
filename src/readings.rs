//! Sensor readings: the append-only log every node reports into, plus the
//! history queries the status surface builds on.

use crate::db::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use core::fmt;
use log::warn;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One stored sensor observation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub id: i64,
    pub time: DateTime<Utc>,
    pub node_id: i64,
    pub temp_c: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

/// The optional values a node sends with a report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub temp_c: Option<f64>,
    pub pressure: Option<f64>,
    pub humidity: Option<f64>,
}

impl Measurements {
    /// Non-finite values are treated as absent.
    pub fn new(temp_c: Option<f64>, pressure: Option<f64>, humidity: Option<f64>) -> Self {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Measurements {
            temp_c: finite(temp_c),
            pressure: finite(pressure),
            humidity: finite(humidity),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.temp_c.is_none() && self.pressure.is_none() && self.humidity.is_none()
    }
}

#[derive(Debug)]
pub enum ReadingError {
    /// All three fields were absent or invalid; nothing was stored
    NoUsefulData,
    Store(StoreError),
}

impl Display for ReadingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReadingError::NoUsefulData => write!(f, "report carries no useful data"),
            ReadingError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl Error for ReadingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadingError::Store(e) => Some(e),
            ReadingError::NoUsefulData => None,
        }
    }
}

impl From<StoreError> for ReadingError {
    fn from(value: StoreError) -> Self {
        ReadingError::Store(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Cosmetic per-node metadata used when listing or plotting readings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeDisplayInfo {
    pub name: String,
    pub color: Rgb,
}

/// Storage for sensor readings and node metadata.
///
/// Windowed queries are relative to the store's notion of "now".
pub trait ReadingStore {
    /// Insert a row stamped with the current time. Use [`ReadingStore::append`].
    fn insert_reading(&self, node_id: i64, values: &Measurements) -> Result<Reading, StoreError>;

    /// Most recent reading of every node that reported within `within`.
    fn latest_per_node(&self, within: Duration) -> Result<Vec<Reading>, StoreError>;

    /// Most recent reading of the configured primary node, if any.
    fn latest(&self) -> Result<Option<Reading>, StoreError>;

    /// Ids of nodes with at least one reading within `within`, ascending.
    fn active_nodes(&self, within: Duration) -> Result<Vec<i64>, StoreError>;

    /// Every reading of `node_id` within `within`, oldest first.
    fn node_series(&self, node_id: i64, within: Duration) -> Result<Vec<Reading>, StoreError>;

    /// Explicitly configured display metadata for a node.
    fn node_info(&self, node_id: i64) -> Result<Option<NodeDisplayInfo>, StoreError>;

    fn append(&self, node_id: i64, values: Measurements) -> Result<Reading, ReadingError> {
        if values.is_empty() {
            return Err(ReadingError::NoUsefulData);
        }
        Ok(self.insert_reading(node_id, &values)?)
    }
}

/// Keep every `stride`-th row, starting with the first.
pub fn downsample<T>(rows: Vec<T>, stride: usize) -> Vec<T> {
    rows.into_iter().step_by(stride.max(1)).collect()
}

pub fn history_for_node<R: ReadingStore + ?Sized>(
    store: &R,
    node_id: i64,
    within: Duration,
    stride: usize,
) -> Result<Vec<Reading>, StoreError> {
    Ok(downsample(store.node_series(node_id, within)?, stride))
}

/// Downsampled history of every node active within the window.
pub fn history_all_nodes<R: ReadingStore + ?Sized>(
    store: &R,
    within: Duration,
    stride: usize,
) -> Result<BTreeMap<i64, Vec<Reading>>, StoreError> {
    let mut history = BTreeMap::new();
    for node_id in store.active_nodes(within)? {
        history.insert(node_id, history_for_node(store, node_id, within, stride)?);
    }
    Ok(history)
}

/// How far `time` trails `now - offset`, truncated to whole seconds.
pub fn staleness(now: DateTime<Utc>, time: DateTime<Utc>, offset: Duration) -> Duration {
    Duration::seconds((now - time - offset).num_seconds())
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentReading {
    #[serde(flatten)]
    pub reading: Reading,
    pub name: String,
    pub staleness_secs: i64,
}

pub fn recent_readings<R: ReadingStore + ?Sized>(
    store: &R,
    within: Duration,
    skew_offset: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<RecentReading>, StoreError> {
    let latest = store.latest_per_node(within)?;
    Ok(latest
        .into_iter()
        .map(|reading| RecentReading {
            name: display_info(store, reading.node_id).name,
            staleness_secs: staleness(now, reading.time, skew_offset).num_seconds(),
            reading,
        })
        .collect())
}

/// Configured display metadata, or a generated name and colour.
///
/// The fallback colour comes from a PRNG seeded with the node id, so an
/// unconfigured node keeps the same colour between calls.
pub fn display_info<R: ReadingStore + ?Sized>(store: &R, node_id: i64) -> NodeDisplayInfo {
    match store.node_info(node_id) {
        Ok(Some(info)) => info,
        Ok(None) => fallback_display_info(node_id),
        Err(e) => {
            warn!("node_info({}) failed, using generated name: {}", node_id, e);
            fallback_display_info(node_id)
        }
    }
}

pub fn fallback_display_info(node_id: i64) -> NodeDisplayInfo {
    let mut rng = SmallRng::seed_from_u64(node_id as u64);
    NodeDisplayInfo {
        name: format!("Node {}", node_id),
        color: Rgb {
            r: rng.random(),
            g: rng.random(),
            b: rng.random(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::db::memory::MemoryStore;
    use crate::settings::SettingsStore;
    use chrono::TimeZone;

    fn store() -> MemoryStore {
        MemoryStore::at(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap())
    }

    fn temp(v: f64) -> Measurements {
        Measurements::new(Some(v), None, None)
    }

    #[test]
    fn append_rejects_report_without_data() {
        let store = store();
        let err = store.append(1, Measurements::new(None, None, None)).unwrap_err();
        assert!(matches!(err, ReadingError::NoUsefulData));
        let err = store
            .append(1, Measurements::new(Some(f64::NAN), None, Some(f64::INFINITY)))
            .unwrap_err();
        assert!(matches!(err, ReadingError::NoUsefulData));
        assert!(store.node_series(1, Duration::weeks(1)).unwrap().is_empty());
    }

    #[test]
    fn append_keeps_single_valid_field() {
        let store = store();
        let stored = store.append(4, Measurements::new(None, Some(1013.2), None)).unwrap();
        assert_eq!(stored.node_id, 4);
        assert_eq!(stored.temp_c, None);
        assert_eq!(stored.pressure, Some(1013.2));
        assert_eq!(stored.humidity, None);
        assert_eq!(store.node_series(4, Duration::weeks(1)).unwrap(), vec![stored]);
    }

    #[test]
    fn latest_follows_primary_node() {
        let store = store();
        assert_eq!(store.latest().unwrap(), None);

        store.append(1, temp(18.0)).unwrap();
        store.advance(Duration::seconds(30));
        store.append(2, temp(21.0)).unwrap();
        // no primary configured yet
        assert_eq!(store.latest().unwrap(), None);

        store.set_int("primary_node", 1).unwrap();
        assert_eq!(store.latest().unwrap().and_then(|r| r.temp_c), Some(18.0));
        store.set_int("primary_node", 2).unwrap();
        assert_eq!(store.latest().unwrap().and_then(|r| r.temp_c), Some(21.0));
    }

    #[test]
    fn zero_degree_reading_is_distinct_from_no_data() {
        let store = store();
        store.set_int("primary_node", 1).unwrap();
        store.append(1, temp(0.0)).unwrap();
        assert_eq!(store.latest().unwrap().and_then(|r| r.temp_c), Some(0.0));
    }

    #[test]
    fn history_is_ascending_and_windowed() {
        let store = store();
        for i in 0..10 {
            store.append(7, temp(15.0 + i as f64)).unwrap();
            store.advance(Duration::days(1));
        }
        let series = history_for_node(&store, 7, Duration::weeks(1), 1).unwrap();
        let cutoff = store.now() - Duration::weeks(1);
        assert_eq!(series.len(), 6);
        assert!(series.iter().all(|r| r.time > cutoff));
        assert!(series.windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(series.first().and_then(|r| r.temp_c), Some(19.0));
    }

    #[test]
    fn history_is_downsampled() {
        let store = store();
        for i in 0..12 {
            store.append(3, temp(i as f64)).unwrap();
            store.advance(Duration::minutes(1));
        }
        let series = history_for_node(&store, 3, Duration::weeks(1), 5).unwrap();
        let temps: Vec<_> = series.iter().filter_map(|r| r.temp_c).collect();
        assert_eq!(temps, vec![0.0, 5.0, 10.0]);
    }

    #[test]
    fn history_all_nodes_only_includes_active_nodes() {
        let store = store();
        store.append(9, temp(10.0)).unwrap();
        store.advance(Duration::days(8));
        store.append(1, temp(19.0)).unwrap();
        store.append(2, Measurements::new(None, None, Some(40.0))).unwrap();

        let history = history_all_nodes(&store, Duration::weeks(1), 5).unwrap();
        assert_eq!(history.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(history[&1].len(), 1);
    }

    #[test]
    fn oversized_window_covers_everything() {
        let store = store();
        store.append(9, temp(10.0)).unwrap();
        store.advance(Duration::days(400));
        store.append(1, temp(19.0)).unwrap();

        let huge = Duration::days(200_000_000);
        assert_eq!(store.active_nodes(huge).unwrap(), vec![1, 9]);
        assert_eq!(history_all_nodes(&store, huge, 1).unwrap().len(), 2);
        assert_eq!(store.latest_per_node(huge).unwrap().len(), 2);
    }

    #[test]
    fn latest_per_node_picks_newest_row_within_window() {
        let store = store();
        store.append(5, temp(10.0)).unwrap();
        store.advance(Duration::minutes(10));
        store.append(1, temp(17.0)).unwrap();
        store.advance(Duration::minutes(1));
        store.append(1, temp(17.5)).unwrap();

        let latest = store.latest_per_node(Duration::minutes(5)).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].node_id, 1);
        assert_eq!(latest[0].temp_c, Some(17.5));
    }

    #[test]
    fn recent_readings_carry_name_and_staleness() {
        let store = store();
        store.append(1, temp(17.0)).unwrap();
        store.advance(Duration::seconds(90));
        let recent = recent_readings(&store, Duration::minutes(5), Duration::seconds(30), store.now()).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].name, "Node 1");
        assert_eq!(recent[0].staleness_secs, 60);
    }

    #[test]
    fn display_info_prefers_configured_row() {
        let store = store();
        let configured = NodeDisplayInfo {
            name: "Living room".into(),
            color: Rgb { r: 200, g: 10, b: 10 },
        };
        store.set_node_info(255, configured.clone());
        assert_eq!(display_info(&store, 255), configured);
    }

    #[test]
    fn fallback_colour_is_stable_per_node() {
        assert_eq!(fallback_display_info(12), fallback_display_info(12));
        assert_eq!(fallback_display_info(12).name, "Node 12");
    }

    #[test]
    fn staleness_truncates_to_seconds() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = t + Duration::milliseconds(65_900);
        assert_eq!(staleness(now, t, Duration::zero()), Duration::seconds(65));
        assert_eq!(staleness(now, t, Duration::seconds(5)), Duration::seconds(60));
    }
}
