//! Sensor report handling: store the reading, and when it comes from the
//! primary node, decide and persist the furnace state.
//!
//! The reading write and the furnace-state write are independent; either can
//! fail without undoing the other.

use crate::clock::Clock;
use crate::decider::Decider;
use crate::occupancy::OccupancySignal;
use crate::readings::{Measurements, ReadingError, ReadingStore};
use crate::settings::SettingsStore;
use crate::utils::Params;
use core::fmt;
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Answer sent back to the reporting node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Burn {
    Yes,
    No,
    /// Report did not drive a decision (not the primary node, no
    /// temperature, or no primary node configured)
    Indeterminate,
}

impl Burn {
    pub fn as_str(self) -> &'static str {
        match self {
            Burn::Yes => "burn-y",
            Burn::No => "burn-n",
            Burn::Indeterminate => "burn-i",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    MissingNodeId,
    InvalidNodeId(String),
}

impl Display for ReportError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::MissingNodeId => write!(f, "report has no node_id"),
            ReportError::InvalidNodeId(raw) => write!(f, "invalid node_id: {:?}", raw),
        }
    }
}

impl Error for ReportError {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub node_id: i64,
    pub values: Measurements,
}

fn number(params: &Params, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.trim().parse::<f64>().ok())
}

/// Read a report from form parameters. A value that does not parse as a
/// number counts as absent.
pub fn parse_report(params: &Params) -> Result<Report, ReportError> {
    let raw = params.get("node_id").ok_or(ReportError::MissingNodeId)?;
    let node_id = raw
        .trim()
        .parse::<i64>()
        .map_err(|_| ReportError::InvalidNodeId(raw.clone()))?;
    Ok(Report {
        node_id,
        values: Measurements::new(number(params, "temp"), number(params, "pressure"), number(params, "humidity")),
    })
}

pub fn handle_report<S, O, C>(store: &S, occupancy: &O, clock: C, report: &Report) -> Burn
where
    S: SettingsStore + ReadingStore + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    match store.append(report.node_id, report.values) {
        Ok(_) => {}
        Err(ReadingError::NoUsefulData) => {
            warn!("Got useless report from node {}", report.node_id);
            return Burn::No;
        }
        Err(e) => error!("Storing reading from node {} failed: {}", report.node_id, e),
    }

    let decider = Decider::new(store, occupancy, clock);
    let primary = match decider.primary_node() {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!("No primary node configured; furnace state unknown");
            return Burn::Indeterminate;
        }
        Err(e) => {
            warn!("Reading primary node failed: {}", e);
            return Burn::Indeterminate;
        }
    };

    let temp = match report.values.temp_c {
        Some(t) if report.node_id == primary => t,
        _ => return Burn::Indeterminate,
    };

    let was_on = decider.last_furnace_state();
    let decision = decider.decide(temp);
    if decision.run != was_on {
        info!(
            "Furnace {} at {:.2}C ({:?})",
            if decision.run { "on" } else { "off" },
            temp,
            decision.reason
        );
    }
    if let Err(e) = decider.record_furnace_state(decision.run) {
        error!("Persisting furnace state failed: {}", e);
    }

    if decision.run { Burn::Yes } else { Burn::No }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::occupancy::Household;
    use crate::utils::split_url;
    use chrono::{Duration, TimeZone, Utc};

    fn setup() -> MemoryStore {
        let store = MemoryStore::at(Utc.with_ymd_and_hms(2024, 11, 5, 7, 0, 0).unwrap());
        store.set_float("idle_temp", 12.5).unwrap();
        store.set_float("min_temp", 16.0).unwrap();
        store.set_int("primary_node", 255).unwrap();
        store
    }

    fn report(url: &str) -> Report {
        parse_report(&split_url(url).1).unwrap()
    }

    fn house(store: &MemoryStore) -> Household<&MemoryStore> {
        Household::with_clock(["alice"], Duration::minutes(10), store)
    }

    #[test]
    fn parses_partial_reports() {
        let r = report("/control?node_id=3&temp=abc&humidity=44.5");
        assert_eq!(r.node_id, 3);
        assert_eq!(r.values, Measurements::new(None, None, Some(44.5)));
    }

    #[test]
    fn rejects_bad_node_id() {
        assert_eq!(parse_report(&split_url("/control?temp=1").1), Err(ReportError::MissingNodeId));
        assert_eq!(
            parse_report(&split_url("/control?node_id=x").1),
            Err(ReportError::InvalidNodeId("x".into()))
        );
    }

    #[test]
    fn primary_node_drives_furnace() {
        let store = setup();
        let house = house(&store);
        assert_eq!(handle_report(&store, &house, &store, &report("/?node_id=255&temp=10.0")), Burn::Yes);
        assert_eq!(store.get_bool("furnace_on").unwrap(), Some(true));

        // sticky until 5% above idle
        assert_eq!(handle_report(&store, &house, &store, &report("/?node_id=255&temp=13.0")), Burn::Yes);
        assert_eq!(handle_report(&store, &house, &store, &report("/?node_id=255&temp=14.0")), Burn::No);
        assert_eq!(store.get_bool("furnace_on").unwrap(), Some(false));
        assert_eq!(store.node_series(255, Duration::days(1)).unwrap().len(), 3);
    }

    #[test]
    fn occupancy_raises_target() {
        let store = setup();
        let house = house(&store);
        house.mark_seen("alice", store.now());
        assert_eq!(handle_report(&store, &house, &store, &report("/?node_id=255&temp=15.0")), Burn::Yes);
    }

    #[test]
    fn secondary_node_is_logged_but_indeterminate() {
        let store = setup();
        let house = house(&store);
        assert_eq!(handle_report(&store, &house, &store, &report("/?node_id=4&temp=5.0")), Burn::Indeterminate);
        assert_eq!(store.get_bool("furnace_on").unwrap(), None);
        assert_eq!(store.node_series(4, Duration::days(1)).unwrap().len(), 1);
    }

    #[test]
    fn primary_without_temperature_is_indeterminate() {
        let store = setup();
        let house = house(&store);
        let burn = handle_report(&store, &house, &store, &report("/?node_id=255&pressure=1001"));
        assert_eq!(burn, Burn::Indeterminate);
    }

    #[test]
    fn useless_report_is_not_stored() {
        let store = setup();
        let house = house(&store);
        let burn = handle_report(&store, &house, &store, &report("/?node_id=255&temp=&humidity=nan"));
        assert_eq!(burn, Burn::No);
        assert!(store.node_series(255, Duration::days(1)).unwrap().is_empty());
        assert_eq!(store.get_bool("furnace_on").unwrap(), None);
    }

    #[test]
    fn missing_primary_node_is_indeterminate() {
        let store = MemoryStore::default();
        let house = house(&store);
        let burn = handle_report(&store, &house, &store, &report("/?node_id=255&temp=5"));
        assert_eq!(burn, Burn::Indeterminate);
        // the reading is still kept
        assert_eq!(store.node_series(255, Duration::days(1)).unwrap().len(), 1);
    }

    #[test]
    fn store_outage_is_indeterminate() {
        let store = setup();
        let house = house(&store);
        store.set_broken(true);
        let burn = handle_report(&store, &house, &store, &report("/?node_id=255&temp=5"));
        assert_eq!(burn, Burn::Indeterminate);
    }

    #[test]
    fn wire_strings() {
        assert_eq!(Burn::Yes.as_str(), "burn-y");
        assert_eq!(Burn::No.as_str(), "burn-n");
        assert_eq!(Burn::Indeterminate.as_str(), "burn-i");
    }
}
