//! The closed queue transition set.
//!
//! Producers and the worker race on the same rows through the database, so
//! legality is enforced at runtime in every backend, not only by the types.

use crate::error::StoreError;
use crate::queue::QueueStatus;

/// Returns true when `from -> to` is a legal queue transition.
///
/// - `pending -> processing`: worker lease.
/// - `failed -> processing`: lease of a due retryable row.
/// - `processing -> done | failed | permanent_fail`: worker outcome.
/// - `failed -> pending`: producer reset on re-discovery.
/// - `processing -> pending`: leak reaper resurrecting a stale lease.
///
/// `done` and `permanent_fail` are terminal.
pub fn transition_allowed(from: QueueStatus, to: QueueStatus) -> bool {
    use QueueStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Failed, Processing)
            | (Processing, Done)
            | (Processing, Failed)
            | (Processing, PermanentFail)
            | (Failed, Pending)
            | (Processing, Pending)
    )
}

pub(crate) fn ensure_transition(from: QueueStatus, to: QueueStatus) -> Result<(), StoreError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(StoreError::IllegalTransition { from, to })
    }
}
