//! Differential ingestion from index pages.
//!
//! Converts one index URL into liveness confirmations for known listings
//! and `pending` queue rows for unseen ones. Index fetches spend the same
//! budget as detail fetches, by design.

use serde::Serialize;
use std::sync::Arc;
use sumika_core::clock::Clock;
use sumika_extract::{IndexScanOutcome, IndexScanner};
use sumika_rategate::{Caller, RateGate};
use sumika_store::{
    EnqueueOutcome, NewCandidate, PropertyStore, QueueCounts, QueueStore, StoreError,
};

/// What one diff run did.
#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    /// Candidates found on the page before any limit was applied.
    pub urls_found: usize,
    /// Already known: live property rows confirmed, plus queue rows left
    /// untouched (in flight, done, or permanently failed).
    pub existing: usize,
    /// Newly enqueued, including `failed` rows reset on re-discovery.
    pub new_to_queue: usize,
    pub queue: QueueCounts,
    /// Set when the scan itself could not run (hostile origin, bad URL).
    /// The call still reports success; the caller must not retry on our
    /// behalf.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub struct DiffProducer {
    gate: Arc<RateGate>,
    scanner: Arc<dyn IndexScanner>,
    queue: Arc<dyn QueueStore>,
    properties: Arc<dyn PropertyStore>,
    clock: Arc<dyn Clock>,
}

impl DiffProducer {
    pub fn new(
        gate: Arc<RateGate>,
        scanner: Arc<dyn IndexScanner>,
        queue: Arc<dyn QueueStore>,
        properties: Arc<dyn PropertyStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            scanner,
            queue,
            properties,
            clock,
        }
    }

    /// Scans one index URL. Blocks at the gate for as long as it takes; a
    /// saturated hourly window makes manual triggers slow, which is
    /// expected and visible to the operator.
    pub async fn run(
        &self,
        index_url: &str,
        limit: Option<usize>,
    ) -> Result<DiffSummary, StoreError> {
        tracing::info!(url = index_url, "diff scan requested");
        self.gate.acquire(Caller::Diff).await;

        let candidates = match self.scanner.scan_index(index_url).await {
            IndexScanOutcome::Candidates(candidates) => candidates,
            IndexScanOutcome::Hostile => {
                self.gate
                    .signal_hostile("index fetch returned anti-bot response");
                return self
                    .empty_summary("origin hostile; cooling down before further fetches")
                    .await;
            }
            IndexScanOutcome::Missing => {
                return self.empty_summary("index url not found at origin").await;
            }
            IndexScanOutcome::Transient(e) => {
                return self.empty_summary(&format!("index fetch failed: {e}")).await;
            }
        };

        let urls_found = candidates.len();
        let limited: Vec<_> = match limit {
            Some(n) => candidates.into_iter().take(n).collect(),
            None => candidates,
        };

        let mut existing = 0usize;
        let mut new_to_queue = 0usize;
        for candidate in &limited {
            let now = self.clock.now();

            // A known property gets its liveness confirmed and nothing else;
            // re-scraping done listings is the liveness sweep's business.
            if self.properties.mark_seen(&candidate.source_ref, now).await? {
                existing += 1;
                continue;
            }

            let outcome = self
                .queue
                .upsert_candidate(
                    &NewCandidate {
                        source_ref: candidate.source_ref.clone(),
                        detail_url: candidate.detail_url.clone(),
                        priority: 0,
                    },
                    now,
                )
                .await?;
            match outcome {
                EnqueueOutcome::Inserted | EnqueueOutcome::ResetFailed => new_to_queue += 1,
                EnqueueOutcome::Unchanged => existing += 1,
            }
        }

        let queue = self.queue.counts().await?;
        tracing::info!(urls_found, existing, new_to_queue, "diff scan complete");
        Ok(DiffSummary {
            urls_found,
            existing,
            new_to_queue,
            queue,
            note: None,
        })
    }

    async fn empty_summary(&self, note: &str) -> Result<DiffSummary, StoreError> {
        tracing::warn!(note, "diff scan yielded nothing");
        Ok(DiffSummary {
            urls_found: 0,
            existing: 0,
            new_to_queue: 0,
            queue: self.queue.counts().await?,
            note: Some(note.to_string()),
        })
    }
}
