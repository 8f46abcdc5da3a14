use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Defines how the core determines the current time.
///
/// Injected at the top of the orchestrator; components never call `Utc::now()` directly, which
/// keeps every decision replayable under a [`SimClock`].
pub trait EngineClock {
    fn time(&self) -> DateTime<Utc>;
}

/// Live `Clock` using `Utc::now()`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct LiveClock;

impl EngineClock for LiveClock {
    fn time(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic test clock: time moves only via [`Self::set`] / [`Self::advance`].
#[derive(Debug, Clone)]
pub struct SimClock {
    inner: Arc<parking_lot::RwLock<DateTime<Utc>>>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(parking_lot::RwLock::new(start)),
        }
    }

    pub fn set(&self, time: DateTime<Utc>) {
        *self.inner.write() = time;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut lock = self.inner.write();
        *lock += delta;
    }
}

impl EngineClock for SimClock {
    fn time(&self) -> DateTime<Utc> {
        *self.inner.read()
    }
}
