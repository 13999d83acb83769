//! Detail-scrape queue: types and the store trait.

use crate::error::StoreError;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use sumika_core::model::SourceRef;

/// Queue row status. The set is closed; see [`crate::transition_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    /// Retryable failure; eligible for re-lease once `next_retry_at` passes.
    Failed,
    /// Terminal. Never re-leased automatically and never revived by
    /// producers; the operator's diagnostic workflow depends on that.
    PermanentFail,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Done => "done",
            QueueStatus::Failed => "failed",
            QueueStatus::PermanentFail => "permanent_fail",
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "processing" => Ok(QueueStatus::Processing),
            "done" => Ok(QueueStatus::Done),
            "failed" => Ok(QueueStatus::Failed),
            "permanent_fail" => Ok(QueueStatus::PermanentFail),
            other => Err(format!("unknown queue status: {other}")),
        }
    }
}

/// One unit of pending or historical work.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: i64,
    pub source_ref: SourceRef,
    pub detail_url: String,
    pub status: QueueStatus,
    /// Larger is leased earlier.
    pub priority: i32,
    /// Failed tries so far. Not incremented on success.
    pub attempts: i32,
    pub last_error: Option<String>,
    /// A `failed` row must not be re-leased before this instant.
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A newly discovered identifier, ready for the producer upsert rules.
#[derive(Debug, Clone)]
pub struct NewCandidate {
    pub source_ref: SourceRef,
    pub detail_url: String,
    pub priority: i32,
}

/// What the producer upsert actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No row existed; inserted as `pending`.
    Inserted,
    /// A `failed` row was reset to `pending` with attempts cleared
    /// (re-discovery is positive evidence the listing is live).
    ResetFailed,
    /// Row already pending, processing, done, or permanently failed.
    Unchanged,
}

/// Per-status row counts for the control surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: i64,
    pub processing: i64,
    pub done: i64,
    pub failed: i64,
    pub permanent_fail: i64,
}

/// The work queue. One implementation per backend; semantics are identical.
///
/// All wall-clock decisions take `now` from the caller so the worker's clock
/// abstraction governs every time comparison.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Applies the producer upsert rules for a discovered identifier.
    async fn upsert_candidate(
        &self,
        candidate: &NewCandidate,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError>;

    /// Atomically claims the next eligible row (`pending`, or `failed` with
    /// an elapsed `next_retry_at`), highest priority first, oldest id first.
    async fn lease_next(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, StoreError>;

    /// `processing` -> `done`. Attempts unchanged.
    async fn mark_done(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// `processing` -> `permanent_fail` (404-class). Attempts incremented.
    async fn mark_permanent_failure(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `processing` -> `failed` with backoff, or `permanent_fail` once the
    /// incremented attempts reach the policy ceiling. Returns the resulting
    /// status.
    async fn mark_transient_failure(
        &self,
        id: i64,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus, StoreError>;

    async fn counts(&self) -> Result<QueueCounts, StoreError>;

    /// Leak reaper: returns `processing` rows untouched for longer than
    /// `older_than` to `pending` so a crashed worker's lease is not lost.
    async fn reap_stale_processing(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    async fn find(&self, source_ref: &SourceRef) -> Result<Option<QueueItem>, StoreError>;
}
