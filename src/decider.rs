//! Furnace decision engine.
//!
//! Every call re-reads thresholds, override, occupancy and the last commanded
//! state from the stores; nothing is cached between calls. Those reads are
//! not taken as one snapshot, so a concurrent writer can land between them.
//! Store failures degrade to the defaults below instead of failing the call.

use crate::clock::Clock;
use crate::db::error::StoreError;
use crate::occupancy::OccupancySignal;
use crate::settings::{SettingKey, SettingsStore};
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::Serialize;

pub const DEFAULT_IDLE_TEMP_C: f64 = 12.5;
pub const DEFAULT_ACTIVE_TEMP_C: f64 = 16.0;
pub const OVERRIDE_MINUTES: i64 = 20;
/// Furnace stays on until the temperature clears the threshold by 5%.
pub const HYSTERESIS_FACTOR: f64 = 1.05;

/// Which rule produced a decision, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    ColdFloor,
    OccupiedComfort,
    Override,
    Hysteresis,
    Satisfied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub run: bool,
    pub reason: Reason,
}

/// Whether an override activated at `started` is still in effect at `now`.
pub fn override_active_at(started: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - started < Duration::minutes(OVERRIDE_MINUTES)
}

pub struct Decider<'a, S: ?Sized, O: ?Sized, C> {
    settings: &'a S,
    occupancy: &'a O,
    clock: C,
}

impl<'a, S, O, C> Decider<'a, S, O, C>
where
    S: SettingsStore + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    pub fn new(settings: &'a S, occupancy: &'a O, clock: C) -> Self {
        Decider {
            settings,
            occupancy,
            clock,
        }
    }

    fn float_or(&self, key: SettingKey, default: f64) -> f64 {
        match self.settings.get_float(key.as_str()) {
            Ok(Some(v)) => v,
            Ok(None) => {
                warn!("Setting {} not set, using default {}", key.as_str(), default);
                default
            }
            Err(e) => {
                warn!("Reading {} failed, using default {}: {}", key.as_str(), default, e);
                default
            }
        }
    }

    /// Temperature to hold while nobody is home.
    pub fn idle_temp(&self) -> f64 {
        self.float_or(SettingKey::IdleTemp, DEFAULT_IDLE_TEMP_C)
    }

    /// Minimum temperature while somebody is home.
    pub fn active_temp(&self) -> f64 {
        self.float_or(SettingKey::ActiveTemp, DEFAULT_ACTIVE_TEMP_C)
    }

    pub fn override_active(&self) -> bool {
        match self.settings.get_int(SettingKey::Override.as_str()) {
            Ok(Some(ts)) => match DateTime::from_timestamp(ts, 0) {
                Some(started) => override_active_at(started, self.clock.now()),
                None => false,
            },
            Ok(None) => false,
            Err(e) => {
                warn!("Reading override failed, treating as inactive: {}", e);
                false
            }
        }
    }

    pub fn last_furnace_state(&self) -> bool {
        match self.settings.get_bool(SettingKey::FurnaceOn.as_str()) {
            Ok(state) => state.unwrap_or(false),
            Err(e) => {
                warn!("Reading furnace state failed, assuming off: {}", e);
                false
            }
        }
    }

    /// `Ok(None)` when no primary node is configured.
    pub fn primary_node(&self) -> Result<Option<i64>, StoreError> {
        self.settings.get_int(SettingKey::PrimaryNode.as_str())
    }

    pub fn anybody_home(&self) -> bool {
        self.occupancy.is_anyone_home()
    }

    pub fn activate_override(&self) -> Result<(), StoreError> {
        self.settings
            .set_int(SettingKey::Override.as_str(), self.clock.now().timestamp())
    }

    pub fn clear_override(&self) -> Result<(), StoreError> {
        self.settings.set_int(SettingKey::Override.as_str(), 0)
    }

    pub fn record_furnace_state(&self, on: bool) -> Result<(), StoreError> {
        self.settings.set_bool(SettingKey::FurnaceOn.as_str(), on)
    }

    /// Evaluate the rules in order; the first match wins.
    pub fn decide(&self, current_temp: f64) -> Decision {
        let decision = self.evaluate(current_temp);
        debug!(
            "Decision for {:.2}C: run={} ({:?})",
            current_temp, decision.run, decision.reason
        );
        decision
    }

    fn evaluate(&self, current_temp: f64) -> Decision {
        let on = |reason| Decision { run: true, reason };

        let idle = self.idle_temp();
        if current_temp < idle {
            return on(Reason::ColdFloor);
        }

        let home = self.anybody_home();
        if home && current_temp < self.active_temp() {
            return on(Reason::OccupiedComfort);
        }

        if self.override_active() {
            return on(Reason::Override);
        }

        if self.last_furnace_state() {
            let threshold = if home { self.active_temp() } else { idle };
            if current_temp < threshold * HYSTERESIS_FACTOR {
                return on(Reason::Hysteresis);
            }
        }

        Decision {
            run: false,
            reason: Reason::Satisfied,
        }
    }

    /// Boolean form of [`Decider::decide`] for callers that do not need the
    /// reason. Report handling uses `decide` so transitions can be logged
    /// with the rule that caused them.
    pub fn should_furnace_run(&self, current_temp: f64) -> bool {
        self.decide(current_temp).run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use chrono::TimeZone;

    struct Occupied(bool);

    impl OccupancySignal for Occupied {
        fn is_anyone_home(&self) -> bool {
            self.0
        }

        fn last_seen(&self, _person: &str) -> Option<DateTime<Utc>> {
            None
        }

        fn people(&self) -> Vec<crate::occupancy::Housemate> {
            Vec::new()
        }
    }

    const HOME: Occupied = Occupied(true);
    const AWAY: Occupied = Occupied(false);

    fn store(furnace_on: bool) -> MemoryStore {
        let store = MemoryStore::at(Utc.with_ymd_and_hms(2024, 12, 1, 18, 0, 0).unwrap());
        store.set_float("idle_temp", 12.5).unwrap();
        store.set_float("min_temp", 16.0).unwrap();
        store.set_bool("furnace_on", furnace_on).unwrap();
        store
    }

    fn run(store: &MemoryStore, occupancy: &Occupied, temp: f64) -> Decision {
        Decider::new(store, occupancy, store).decide(temp)
    }

    #[test]
    fn cold_floor_always_heats() {
        for furnace_on in [false, true] {
            for override_on in [false, true] {
                let s = store(furnace_on);
                if override_on {
                    Decider::new(&s, &AWAY, &s).activate_override().unwrap();
                }
                for occ in [&HOME, &AWAY] {
                    assert_eq!(run(&s, occ, 10.0).reason, Reason::ColdFloor);
                    assert_eq!(run(&s, occ, 12.49).reason, Reason::ColdFloor);
                    assert!(run(&s, occ, -40.0).run);
                }
            }
        }
    }

    #[test]
    fn occupied_heats_below_active_temp() {
        let s = store(false);
        assert_eq!(run(&s, &HOME, 12.5).reason, Reason::OccupiedComfort);
        assert!(run(&s, &HOME, 15.99).run);
        assert!(!run(&s, &HOME, 16.0).run);
        assert!(!run(&s, &AWAY, 14.0).run);
    }

    #[test]
    fn override_heats_for_twenty_minutes() {
        let s = store(false);
        let decider = Decider::new(&s, &AWAY, &s);
        decider.activate_override().unwrap();
        assert_eq!(decider.decide(25.0).reason, Reason::Override);

        s.advance(Duration::minutes(19) + Duration::seconds(59));
        assert!(decider.should_furnace_run(25.0));

        s.advance(Duration::seconds(1));
        assert!(!decider.should_furnace_run(25.0));
    }

    #[test]
    fn expired_override_falls_back_to_other_rules() {
        let s = store(false);
        let started = s.now() - Duration::minutes(21);
        s.set_int("override", started.timestamp()).unwrap();
        assert!(!run(&s, &AWAY, 14.0).run);
        assert!(run(&s, &AWAY, 10.0).run);
    }

    #[test]
    fn expired_override_on_running_furnace_uses_hysteresis() {
        let s = store(true);
        let started = s.now() - Duration::minutes(21);
        s.set_int("override", started.timestamp()).unwrap();
        for temp in [12.5, 13.0, 13.1] {
            assert_eq!(run(&s, &AWAY, temp).reason, Reason::Hysteresis);
        }
        assert_eq!(run(&s, &AWAY, 12.5 * HYSTERESIS_FACTOR).reason, Reason::Satisfied);
    }

    #[test]
    fn cleared_override_is_inactive() {
        let s = store(false);
        let decider = Decider::new(&s, &HOME, &s);
        decider.activate_override().unwrap();
        decider.clear_override().unwrap();
        assert!(!decider.override_active());
    }

    #[test]
    fn hysteresis_while_occupied() {
        let s = store(true);
        assert_eq!(run(&s, &HOME, 16.0).reason, Reason::Hysteresis);
        assert!(run(&s, &HOME, 16.79).run);
        assert!(!run(&s, &HOME, 16.0 * HYSTERESIS_FACTOR).run);
    }

    #[test]
    fn hysteresis_while_away_uses_idle_temp() {
        let s = store(true);
        assert!(run(&s, &AWAY, 13.0).run);
        assert!(!run(&s, &AWAY, 12.5 * HYSTERESIS_FACTOR).run);
        assert!(!run(&s, &AWAY, 15.0).run);
    }

    #[test]
    fn no_hysteresis_when_furnace_was_off() {
        let s = store(false);
        assert!(!run(&s, &AWAY, 13.0).run);
        assert!(!run(&s, &HOME, 16.5).run);
    }

    #[test]
    fn worked_example() {
        let s = store(false);
        assert!(run(&s, &AWAY, 10.0).run);
        assert!(!run(&s, &AWAY, 14.0).run);
        s.set_bool("furnace_on", true).unwrap();
        assert!(run(&s, &AWAY, 13.0).run);
    }

    #[test]
    fn boolean_form_matches_decision() {
        for furnace_on in [false, true] {
            let s = store(furnace_on);
            for occ in [&HOME, &AWAY] {
                let decider = Decider::new(&s, occ, &s);
                for temp in [-5.0, 12.0, 12.5, 13.0, 15.5, 16.0, 16.5, 17.0, 30.0] {
                    assert_eq!(decider.should_furnace_run(temp), decider.decide(temp).run, "{}", temp);
                }
            }
        }
    }

    #[test]
    fn missing_settings_use_defaults() {
        let s = MemoryStore::default();
        let decider = Decider::new(&s, &HOME, &s);
        assert_eq!(decider.idle_temp(), DEFAULT_IDLE_TEMP_C);
        assert_eq!(decider.active_temp(), DEFAULT_ACTIVE_TEMP_C);
        assert!(!decider.override_active());
        assert!(!decider.last_furnace_state());
        assert!(decider.should_furnace_run(15.0));
        assert!(!decider.should_furnace_run(16.5));
    }

    #[test]
    fn broken_store_degrades_to_defaults() {
        let s = store(true);
        s.set_float("min_temp", 22.0).unwrap();
        s.set_broken(true);
        let decider = Decider::new(&s, &HOME, &s);
        // furnace state unreadable: assumed off, active temp back to 16
        assert!(decider.should_furnace_run(15.0));
        assert!(!decider.should_furnace_run(16.2));
        assert!(decider.primary_node().is_err());
    }

    #[test]
    fn override_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 20, 0).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(!override_active_at(start, now));
        assert!(override_active_at(start, now - Duration::seconds(1)));
        // clock skew: override stamped in the future counts as active
        assert!(override_active_at(now, start));
    }
}
