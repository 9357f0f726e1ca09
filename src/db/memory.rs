//! In-memory implementation of every store trait, for tests.
//!
//! The store carries its own settable clock: inserted readings are stamped
//! with it and windowed queries are measured from it.

use crate::clock::{Clock, window_start};
use crate::db::error::StoreError;
use crate::occupancy::{Housemate, PresenceLog};
use crate::readings::{Measurements, NodeDisplayInfo, Reading, ReadingStore};
use crate::settings::{SettingKey, SettingsStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug)]
pub struct MemoryStore {
    now: Mutex<DateTime<Utc>>,
    settings: Mutex<BTreeMap<String, String>>,
    readings: Mutex<Vec<Reading>>,
    node_names: Mutex<BTreeMap<i64, NodeDisplayInfo>>,
    presence: Mutex<Vec<(DateTime<Utc>, String, bool)>>,
    /// When set, every store call fails
    broken: Mutex<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
    }
}

impl MemoryStore {
    pub fn at(now: DateTime<Utc>) -> Self {
        MemoryStore {
            now: Mutex::new(now),
            settings: Mutex::default(),
            readings: Mutex::default(),
            node_names: Mutex::default(),
            presence: Mutex::default(),
            broken: Mutex::new(false),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn set_node_info(&self, node_id: i64, info: NodeDisplayInfo) {
        self.node_names.lock().unwrap().insert(node_id, info);
    }

    pub fn set_broken(&self, broken: bool) {
        *self.broken.lock().unwrap() = broken;
    }

    fn check(&self) -> Result<(), StoreError> {
        if *self.broken.lock().unwrap() {
            Err(StoreError::Pool("store unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn cutoff(&self, within: Duration) -> DateTime<Utc> {
        window_start(self.now(), within)
    }
}

impl Clock for MemoryStore {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

impl SettingsStore for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.settings.lock().unwrap().get(key).cloned())
    }

    fn put_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.settings.lock().unwrap().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl ReadingStore for MemoryStore {
    fn insert_reading(&self, node_id: i64, values: &Measurements) -> Result<Reading, StoreError> {
        self.check()?;
        let mut readings = self.readings.lock().unwrap();
        let reading = Reading {
            id: readings.len() as i64 + 1,
            time: self.now(),
            node_id,
            temp_c: values.temp_c,
            pressure: values.pressure,
            humidity: values.humidity,
        };
        readings.push(reading.clone());
        Ok(reading)
    }

    fn latest_per_node(&self, within: Duration) -> Result<Vec<Reading>, StoreError> {
        self.check()?;
        let cutoff = self.cutoff(within);
        let mut latest: BTreeMap<i64, Reading> = BTreeMap::new();
        for r in self.readings.lock().unwrap().iter().filter(|r| r.time > cutoff) {
            latest.insert(r.node_id, r.clone());
        }
        Ok(latest.into_values().collect())
    }

    fn latest(&self) -> Result<Option<Reading>, StoreError> {
        let Some(primary) = self.get_int(SettingKey::PrimaryNode.as_str())? else {
            return Ok(None);
        };
        let readings = self.readings.lock().unwrap();
        Ok(readings.iter().rev().find(|r| r.node_id == primary).cloned())
    }

    fn active_nodes(&self, within: Duration) -> Result<Vec<i64>, StoreError> {
        self.check()?;
        let cutoff = self.cutoff(within);
        let mut ids: Vec<i64> = self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.time > cutoff)
            .map(|r| r.node_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    fn node_series(&self, node_id: i64, within: Duration) -> Result<Vec<Reading>, StoreError> {
        self.check()?;
        let cutoff = self.cutoff(within);
        Ok(self
            .readings
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.node_id == node_id && r.time > cutoff)
            .cloned()
            .collect())
    }

    fn node_info(&self, node_id: i64) -> Result<Option<NodeDisplayInfo>, StoreError> {
        self.check()?;
        Ok(self.node_names.lock().unwrap().get(&node_id).cloned())
    }
}

impl PresenceLog for MemoryStore {
    fn record_presence(&self, at: DateTime<Utc>, people: &[Housemate]) -> Result<(), StoreError> {
        self.check()?;
        let mut rows = self.presence.lock().unwrap();
        rows.extend(people.iter().map(|p| (at, p.id.clone(), p.is_home)));
        Ok(())
    }

    fn presence_rows(&self, within: Duration) -> Result<Vec<(DateTime<Utc>, bool)>, StoreError> {
        self.check()?;
        let cutoff = self.cutoff(within);
        Ok(self
            .presence
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| *t > cutoff)
            .map(|(t, _, home)| (*t, *home))
            .collect())
    }
}
