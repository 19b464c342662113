//! Wall clock used for row timestamps and credential expiry.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::Mutex;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// RFC 3339 with millisecond precision, the format stored in `created_at`.
    fn timestamp(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    current: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { current: Mutex::new(start) }
    }

    /// Move the clock forward. Returns the new time.
    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current += by;
        *current
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fixed_clock_formats_with_millis() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap());
        assert_eq!(clock.timestamp(), "2026-03-01T09:30:00.000Z");
        clock.advance(Duration::milliseconds(1500));
        assert_eq!(clock.timestamp(), "2026-03-01T09:30:01.500Z");
    }
}
