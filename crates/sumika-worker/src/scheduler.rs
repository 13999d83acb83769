//! Daily driver for the diff producer.
//!
//! Fires at a configured local wall-clock time and walks the configured
//! index URLs serially; serial invocation is what keeps the rate budget
//! intact. The scheduler never fetches detail pages itself.

use crate::diff::DiffProducer;
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use sumika_core::clock::Clock;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Local wall-clock time of the daily run.
    pub daily_run_time: NaiveTime,
    pub index_urls: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            daily_run_time: NaiveTime::from_hms_opt(3, 30, 0)
                .unwrap_or(NaiveTime::MIN),
            index_urls: Vec::new(),
        }
    }
}

pub struct Scheduler {
    diff: Arc<DiffProducer>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        diff: Arc<DiffProducer>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            diff,
            clock,
            config,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        if !self.config.enabled || self.config.index_urls.is_empty() {
            tracing::info!("scheduler disabled; index scans run on manual triggers only");
            return;
        }

        loop {
            let wait = wait_until_next(self.clock.now(), self.config.daily_run_time);
            tracing::info!(
                next_in_secs = wait.as_secs(),
                at = %self.config.daily_run_time,
                "scheduler sleeping until next daily run"
            );

            let clock = Arc::clone(&self.clock);
            let stopped = tokio::select! {
                _ = clock.sleep(wait) => false,
                _ = self.shutdown.changed() => true,
            };
            if stopped || *self.shutdown.borrow() {
                tracing::info!("scheduler stopped");
                return;
            }

            self.run_once().await;
        }
    }

    /// One full pass over the configured URLs, serially.
    pub async fn run_once(&self) {
        for url in &self.config.index_urls {
            match self.diff.run(url, None).await {
                Ok(summary) => tracing::info!(
                    url = %url,
                    urls_found = summary.urls_found,
                    new_to_queue = summary.new_to_queue,
                    "scheduled diff run finished"
                ),
                Err(e) => tracing::error!(url = %url, error = %e, "scheduled diff run failed"),
            }
        }
    }
}

fn wait_until_next(now_utc: DateTime<Utc>, at: NaiveTime) -> Duration {
    let naive_now = now_utc.with_timezone(&Local).naive_local();
    wait_from(naive_now, at)
        .to_std()
        .unwrap_or(Duration::from_secs(60))
}

/// Naive local-time difference to the next occurrence of `at`. The target
/// market does not observe DST, so the naive arithmetic is exact there.
fn wait_from(now: NaiveDateTime, at: NaiveTime) -> chrono::Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    next - now
}
