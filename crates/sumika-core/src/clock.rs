//! Clock abstraction.
//!
//! Every time-sensitive component (RateGate, Worker, Scheduler) takes a
//! [`Clock`] instead of calling `Utc::now()` directly, so tests can drive
//! hour-scale windows under tokio's paused time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Source of wall-clock time and sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Production clock: `Utc::now()` plus `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock anchored at a fixed epoch.
///
/// `now()` is the epoch plus the tokio-time elapsed since construction, so
/// under `#[tokio::test(start_paused = true)]` a call to
/// `tokio::time::advance` moves this clock too. Sleeps go through tokio and
/// auto-advance when the paused runtime is otherwise idle.
#[derive(Debug, Clone)]
pub struct SimClock {
    epoch: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl SimClock {
    /// Creates a simulated clock starting at `epoch`.
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            started: tokio::time::Instant::now(),
        }
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.epoch + elapsed
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
