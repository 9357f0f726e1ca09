use chrono::{DateTime, Duration, Utc};

/// Wall-clock source. Every time-windowed computation reads "now" through this.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Start of the window of length `within` ending at `now`, saturating at the
/// earliest representable instant.
pub fn window_start(now: DateTime<Utc>, within: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(within).unwrap_or(DateTime::<Utc>::MIN_UTC)
}
