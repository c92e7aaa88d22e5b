//! Wall-clock access.
//!
//! Parking transitions stamp `HH:MM` times and the advisor compares record
//! dates against "now", so both read time through [`Clock`] to keep tests
//! deterministic.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant in local time.
    fn now(&self) -> DateTime<Local>;

    /// The current instant in UTC.
    fn now_utc(&self) -> DateTime<Utc> {
        self.now().with_timezone(&Utc)
    }

    /// Current local time formatted as `HH:MM`.
    fn clock_time(&self) -> String {
        self.now().format("%H:%M").to_string()
    }

    /// Current local date formatted as `YYYY-MM-DD`.
    fn calendar_date(&self) -> String {
        self.now().format("%Y-%m-%d").to_string()
    }
}

/// The operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// A manually driven clock.
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Local>>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Move the clock to `now`.
    pub fn set(&self, now: DateTime<Local>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Local> {
        self.now.lock().map_or_else(|_| Local::now(), |guard| *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn afternoon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 5, 14, 14, 7, 0).unwrap()
    }

    #[test]
    fn test_fixed_clock_formats() {
        let clock = FixedClock::new(afternoon());
        assert_eq!(clock.clock_time(), "14:07");
        assert_eq!(clock.calendar_date(), "2025-05-14");
    }

    #[test]
    fn test_fixed_clock_advance() {
        let clock = FixedClock::new(afternoon());
        clock.advance(Duration::minutes(60));
        assert_eq!(clock.clock_time(), "15:07");
    }

    #[test]
    fn test_fixed_clock_clones_share_time() {
        let clock = FixedClock::new(afternoon());
        let other = clock.clone();
        clock.advance(Duration::hours(1));
        assert_eq!(other.now(), clock.now());
    }

    #[test]
    fn test_system_clock_time_shape() {
        let time = SystemClock.clock_time();
        assert_eq!(time.len(), 5);
        assert_eq!(&time[2..3], ":");
    }
}
