//! Injectable clock (design notes §9: "Tests must be able to inject ... a
//! controllable clock").

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to, for deterministic tests of
/// timeout and cooldown logic.
#[derive(Clone)]
pub struct FakeClock {
    inner: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        *self.inner.lock() += duration;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.lock() = at;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.lock()
    }
}
