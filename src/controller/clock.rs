//! Clock used for condition timestamps
//!
//! Production code uses `SystemClock`. Tests use `MockClock` so that
//! timestamps written into status are deterministic.

use chrono::{DateTime, Utc};

/// Source of the current time, injected via `Context`
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to `chrono::Utc::now()`
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controllable time
#[cfg(test)]
#[allow(clippy::expect_used)]
pub struct MockClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    #[allow(dead_code)]
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("MockClock lock poisoned") = now;
    }

    #[allow(dead_code)]
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("MockClock lock poisoned");
        *now += duration;
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("MockClock lock poisoned")
    }
}
