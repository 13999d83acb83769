//! The single queue consumer.

use crate::config::{WorkerConfig, WorkerConfigError};
use crate::healthcheck::{Healthcheck, HealthcheckError};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use sumika_core::clock::Clock;
use sumika_core::outcome::ExtractOutcome;
use sumika_extract::Extractor;
use sumika_rategate::{Caller, RateGate};
use sumika_store::{PropertyStore, QueueItem, QueueStore};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] WorkerConfigError),

    #[error(transparent)]
    Healthcheck(#[from] HealthcheckError),
}

/// The sole authorized issuer of detail-page fetches. Exactly one instance
/// runs per process.
pub struct Worker {
    queue: Arc<dyn QueueStore>,
    properties: Arc<dyn PropertyStore>,
    gate: Arc<RateGate>,
    extractor: Arc<dyn Extractor>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
    is_running: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn QueueStore>,
        properties: Arc<dyn PropertyStore>,
        gate: Arc<RateGate>,
        extractor: Arc<dyn Extractor>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
        is_running: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            properties,
            gate,
            extractor,
            clock,
            config,
            is_running,
            shutdown,
        }
    }

    /// Runs the healthcheck, then polls the queue until shutdown.
    ///
    /// Shutdown is honored between iterations and while waiting at the gate;
    /// once an admission is spent the in-flight item always runs to
    /// completion, because interrupting mid-fetch wastes the budget.
    pub async fn run(mut self, healthcheck: Healthcheck) -> Result<(), WorkerError> {
        self.config.validate()?;
        healthcheck.run().await?;

        self.is_running.store(true, Ordering::Release);
        tracing::info!("worker started");

        let mut consecutive_successes = 0u32;
        let mut hostile_history: VecDeque<DateTime<Utc>> = VecDeque::new();
        let mut last_reap: Option<DateTime<Utc>> = None;

        while !self.shutdown_requested() {
            let now = self.clock.now();
            self.maybe_reap(&mut last_reap, now).await;

            let leased = match self.queue.lease_next(now).await {
                Ok(leased) => leased,
                Err(e) => {
                    tracing::error!(error = %e, "queue lease failed");
                    self.pause(self.config.poll_interval).await;
                    continue;
                }
            };
            let Some(item) = leased else {
                self.pause(self.config.poll_interval).await;
                continue;
            };

            let gate = Arc::clone(&self.gate);
            let admitted = tokio::select! {
                _ = gate.acquire(Caller::Worker) => true,
                _ = self.shutdown.changed() => false,
            };
            if !admitted {
                // The row stays `processing`; the reaper returns it to
                // `pending` on the next startup.
                tracing::info!(item = item.id, "shutdown while waiting at the gate");
                break;
            }

            self.process_item(&item, &mut consecutive_successes, &mut hostile_history)
                .await;
        }

        self.is_running.store(false, Ordering::Release);
        tracing::info!("worker stopped");
        Ok(())
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn process_item(
        &mut self,
        item: &QueueItem,
        consecutive_successes: &mut u32,
        hostile_history: &mut VecDeque<DateTime<Utc>>,
    ) {
        tracing::info!(
            item = item.id,
            url = %item.detail_url,
            attempts = item.attempts,
            "processing queue item"
        );

        let outcome = self
            .extractor
            .extract_detail(&item.source_ref, &item.detail_url)
            .await;
        let now = self.clock.now();

        match outcome {
            ExtractOutcome::Listing(draft) => match self.properties.upsert_from_scrape(&draft, now).await {
                Ok(report) => {
                    // The property write commits before the queue transition:
                    // a crash between the two leaves the row `processing` and
                    // replayable, never `done` without a property.
                    if let Err(e) = self.queue.mark_done(item.id, now).await {
                        tracing::error!(item = item.id, error = %e, "queue done transition failed");
                        return;
                    }
                    *consecutive_successes += 1;
                    record_outcome("success");
                    tracing::info!(
                        item = item.id,
                        property = %report.property_id,
                        created = report.created,
                        changes = report.changes.len(),
                        "listing saved"
                    );

                    if *consecutive_successes % self.config.preventive_pause_every == 0 {
                        tracing::info!(
                            after = *consecutive_successes,
                            pause_secs = self.config.preventive_pause.as_secs(),
                            "preventive pause"
                        );
                        self.pause(self.config.preventive_pause).await;
                    }
                }
                Err(e) => {
                    *consecutive_successes = 0;
                    record_outcome("store_error");
                    self.fail_transient(item, &format!("store: {e}"), now).await;
                }
            },
            ExtractOutcome::PermanentMissing => {
                *consecutive_successes = 0;
                record_outcome("permanent_missing");
                if let Err(e) = self
                    .queue
                    .mark_permanent_failure(item.id, "origin returned 404 for listing", now)
                    .await
                {
                    tracing::error!(item = item.id, error = %e, "permanent-fail transition failed");
                } else {
                    tracing::warn!(item = item.id, url = %item.detail_url, "listing gone at origin");
                }
            }
            ExtractOutcome::Hostile => {
                *consecutive_successes = 0;
                record_outcome("hostile");
                self.gate
                    .signal_hostile("detail fetch returned anti-bot response");
                self.fail_transient(item, "hostile: origin anti-bot response", now)
                    .await;

                let pause = next_hostile_pause(hostile_history, now, &self.config);
                tracing::warn!(
                    item = item.id,
                    pause_secs = pause.as_secs(),
                    "hostile response; pausing worker loop"
                );
                self.pause(pause).await;
            }
            ExtractOutcome::TransientOther(err) => {
                *consecutive_successes = 0;
                record_outcome("transient");
                self.fail_transient(item, &err.to_string(), now).await;
            }
        }
    }

    async fn fail_transient(&self, item: &QueueItem, error: &str, now: DateTime<Utc>) {
        match self
            .queue
            .mark_transient_failure(item.id, error, &self.config.retry_policy, now)
            .await
        {
            Ok(status) => {
                tracing::warn!(item = item.id, status = %status, error, "item failed");
            }
            Err(e) => {
                tracing::error!(item = item.id, error = %e, "failure transition failed");
            }
        }
    }

    async fn maybe_reap(&self, last_reap: &mut Option<DateTime<Utc>>, now: DateTime<Utc>) {
        let due = last_reap.map_or(true, |t| now - t >= chrono::Duration::hours(1));
        if !due {
            return;
        }
        *last_reap = Some(now);
        match self
            .queue
            .reap_stale_processing(self.config.stale_processing_after, now)
            .await
        {
            Ok(0) => {}
            Ok(reaped) => tracing::warn!(reaped, "returned stale processing rows to pending"),
            Err(e) => tracing::error!(error = %e, "stale-processing sweep failed"),
        }
    }

    /// Sleep that wakes early on shutdown.
    async fn pause(&mut self, duration: Duration) {
        let clock = Arc::clone(&self.clock);
        tokio::select! {
            _ = clock.sleep(duration) => {}
            _ = self.shutdown.changed() => {}
        }
    }
}

/// Escalating worker-side pause: 1st hostile in the window gets the first
/// schedule entry, 2nd the second, and so on, saturating at the last.
fn next_hostile_pause(
    history: &mut VecDeque<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &WorkerConfig,
) -> Duration {
    let horizon = now
        - chrono::Duration::from_std(config.hostile_window)
            .unwrap_or_else(|_| chrono::Duration::zero());
    while let Some(&front) = history.front() {
        if front <= horizon {
            history.pop_front();
        } else {
            break;
        }
    }
    history.push_back(now);

    let idx = (history.len() - 1).min(config.hostile_pauses.len().saturating_sub(1));
    config
        .hostile_pauses
        .get(idx)
        .copied()
        .unwrap_or(Duration::from_secs(300))
}

#[cfg(feature = "metrics")]
fn record_outcome(outcome: &'static str) {
    metrics::counter!("worker_items_total", "outcome" => outcome).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_outcome(_outcome: &'static str) {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_hostile_pause_escalates_within_window() {
        let config = WorkerConfig::default();
        let mut history = VecDeque::new();

        let first = next_hostile_pause(&mut history, t0(), &config);
        assert_eq!(first, Duration::from_secs(300));

        let second = next_hostile_pause(&mut history, t0() + chrono::Duration::minutes(30), &config);
        assert_eq!(second, Duration::from_secs(4 * 60 * 60));

        let third = next_hostile_pause(&mut history, t0() + chrono::Duration::hours(1), &config);
        assert_eq!(third, Duration::from_secs(12 * 60 * 60));

        // Saturates at the last entry.
        let fourth = next_hostile_pause(&mut history, t0() + chrono::Duration::hours(2), &config);
        assert_eq!(fourth, Duration::from_secs(12 * 60 * 60));
    }

    #[test]
    fn test_hostile_pause_resets_after_quiet_window() {
        let config = WorkerConfig::default();
        let mut history = VecDeque::new();

        next_hostile_pause(&mut history, t0(), &config);
        next_hostile_pause(&mut history, t0() + chrono::Duration::minutes(10), &config);

        // More than the 4 h window later, the slate is clean again.
        let much_later = t0() + chrono::Duration::hours(9);
        let pause = next_hostile_pause(&mut history, much_later, &config);
        assert_eq!(pause, Duration::from_secs(300));
    }
}
