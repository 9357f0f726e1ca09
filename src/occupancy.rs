//! Who is home.
//!
//! Presence detection itself happens elsewhere; it reports sightings through
//! [`Household::mark_seen`]. The decision engine only consumes
//! [`OccupancySignal`].

use crate::clock::{Clock, SystemClock};
use crate::db::error::StoreError;
use chrono::{DateTime, Duration, Utc};
use log::warn;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_HOME_WINDOW_SECS: i64 = 600;

pub trait OccupancySignal {
    fn is_anyone_home(&self) -> bool;
    fn last_seen(&self, person: &str) -> Option<DateTime<Utc>>;
    /// Every tracked person with their current home flag.
    fn people(&self) -> Vec<Housemate>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Housemate {
    pub id: String,
    pub last_seen: Option<DateTime<Utc>>,
    pub is_home: bool,
}

/// The configured housemates and when each was last seen.
#[derive(Debug)]
pub struct Household<C: Clock = SystemClock> {
    last_seen: RwLock<BTreeMap<String, Option<DateTime<Utc>>>>,
    home_window: Duration,
    clock: C,
}

impl Household<SystemClock> {
    pub fn new<I, S>(people: I, home_window: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Household::with_clock(people, home_window, SystemClock)
    }
}

impl<C: Clock> Household<C> {
    pub fn with_clock<I, S>(people: I, home_window: Duration, clock: C) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let last_seen = people.into_iter().map(|p| (p.into(), None)).collect();
        Household {
            last_seen: RwLock::new(last_seen),
            home_window,
            clock,
        }
    }

    /// Record a sighting. Returns false for people not in the household.
    pub fn mark_seen(&self, person: &str, at: DateTime<Utc>) -> bool {
        let mut guard = self.last_seen.write().unwrap_or_else(PoisonError::into_inner);
        match guard.get_mut(person) {
            Some(slot) => {
                // sightings may arrive out of order
                if slot.is_none_or(|prev| prev < at) {
                    *slot = Some(at);
                }
                true
            }
            None => {
                warn!("Ignoring sighting of unknown person {:?}", person);
                false
            }
        }
    }

    fn is_recent(&self, seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        seen.is_some_and(|t| now - t < self.home_window)
    }
}

impl<C: Clock> OccupancySignal for Household<C> {
    fn is_anyone_home(&self) -> bool {
        let now = self.clock.now();
        let guard = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        guard.values().any(|seen| self.is_recent(*seen, now))
    }

    fn last_seen(&self, person: &str) -> Option<DateTime<Utc>> {
        let guard = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        guard.get(person).copied().flatten()
    }

    fn people(&self) -> Vec<Housemate> {
        let now = self.clock.now();
        let guard = self.last_seen.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .iter()
            .map(|(id, seen)| Housemate {
                id: id.clone(),
                last_seen: *seen,
                is_home: self.is_recent(*seen, now),
            })
            .collect()
    }
}

/// Number of people home at one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PresenceCount {
    pub time: DateTime<Utc>,
    pub count: i64,
}

/// Periodic occupancy snapshots, one row per person.
pub trait PresenceLog {
    fn record_presence(&self, at: DateTime<Utc>, people: &[Housemate]) -> Result<(), StoreError>;

    /// `(snapshot time, is_home)` for every row within the window.
    fn presence_rows(&self, within: Duration) -> Result<Vec<(DateTime<Utc>, bool)>, StoreError>;
}

/// Count people home per snapshot, oldest first. Snapshots where nobody was
/// home count as zero.
pub fn count_home_by_time(rows: impl IntoIterator<Item = (DateTime<Utc>, bool)>) -> Vec<PresenceCount> {
    let mut counts: BTreeMap<DateTime<Utc>, i64> = BTreeMap::new();
    for (time, is_home) in rows {
        *counts.entry(time).or_default() += i64::from(is_home);
    }
    counts
        .into_iter()
        .map(|(time, count)| PresenceCount { time, count })
        .collect()
}

pub fn presence_history<P: PresenceLog + ?Sized>(store: &P, within: Duration) -> Result<Vec<PresenceCount>, StoreError> {
    Ok(count_home_by_time(store.presence_rows(within)?))
}
