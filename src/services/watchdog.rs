//! Disconnect watchdog: raises an alert when no sensor report has arrived
//! for too long. Runs on its own thread and never touches report handling
//! beyond the shared timestamp.

use log::{error, info};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Watchdog {
    last_report: Mutex<Instant>,
    timeout: Duration,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Watchdog {
            last_report: Mutex::new(Instant::now()),
            timeout,
        }
    }

    /// Record that a report arrived now.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    fn touch_at(&self, at: Instant) {
        let mut last = self.last_report.lock().unwrap_or_else(PoisonError::into_inner);
        if at > *last {
            *last = at;
        }
    }

    /// Time since the last report, if it exceeds the timeout.
    pub fn silence(&self, now: Instant) -> Option<Duration> {
        let last = *self.last_report.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(last);
        (elapsed > self.timeout).then_some(elapsed)
    }

    pub fn run(&self, interval: Duration) {
        info!(
            "Watchdog started: timeout={}s, interval={}s",
            self.timeout.as_secs(),
            interval.as_secs()
        );
        loop {
            thread::sleep(interval);
            if let Some(elapsed) = self.silence(Instant::now()) {
                error!(
                    "No communication from any sensor node for {}s (limit {}s)",
                    elapsed.as_secs(),
                    self.timeout.as_secs()
                );
            }
        }
    }
}
