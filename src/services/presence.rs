use crate::clock::Clock;
use crate::db::error::StoreError;
use crate::occupancy::{OccupancySignal, PresenceLog};
use log::{debug, warn};
use std::thread;
use std::time::{Duration, Instant};

/// Write one people-history row per housemate. Returns the number of rows.
pub fn record_snapshot<P, O, C>(store: &P, occupancy: &O, clock: C) -> Result<usize, StoreError>
where
    P: PresenceLog + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    let people = occupancy.people();
    store.record_presence(clock.now(), &people)?;
    Ok(people.len())
}

pub fn run_loop<P, O, C>(store: &P, occupancy: &O, clock: C, interval: Duration)
where
    P: PresenceLog + ?Sized,
    O: OccupancySignal + ?Sized,
    C: Clock,
{
    loop {
        let tick_start = Instant::now();

        match record_snapshot(store, occupancy, &clock) {
            Ok(n) => debug!("Recorded presence snapshot for {} people", n),
            Err(e) => warn!("Recording presence snapshot failed: {}", e),
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}
