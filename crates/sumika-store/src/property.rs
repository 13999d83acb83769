//! Property store: the source of truth for listings.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sumika_core::model::{ListingDraft, Property, SourceRef};

/// Change categories recorded alongside each worker save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    FirstSeen,
    RentChanged,
    TitleChanged,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::FirstSeen => "first_seen",
            ChangeKind::RentChanged => "rent_changed",
            ChangeKind::TitleChanged => "title_changed",
        }
    }
}

/// What a scrape save did to the property row.
#[derive(Debug, Clone)]
pub struct SaveReport {
    /// The 32-hex content identifier of the row written.
    pub property_id: String,
    /// True if this save created the row.
    pub created: bool,
    pub changes: Vec<ChangeKind>,
}

#[async_trait]
pub trait PropertyStore: Send + Sync {
    async fn find(&self, source_ref: &SourceRef) -> Result<Option<Property>, StoreError>;

    /// Confirms liveness from an index scan: sets `last_seen_at` to the
    /// greater of its current value and `now` (monotone non-decrease).
    /// Returns false when no row exists for the pair.
    async fn mark_seen(&self, source_ref: &SourceRef, now: DateTime<Utc>)
        -> Result<bool, StoreError>;

    /// Insert-or-update on the source pair from a successful extraction.
    /// Sets `fetched_at` and `last_seen_at`, preserves `created_at` and the
    /// identity fields, and writes the daily snapshot plus change rows.
    async fn upsert_from_scrape(
        &self,
        draft: &ListingDraft,
        now: DateTime<Utc>,
    ) -> Result<SaveReport, StoreError>;
}

/// Computes the change rows for an update save.
pub(crate) fn diff_changes(existing: &Property, draft: &ListingDraft) -> Vec<ChangeKind> {
    let mut changes = Vec::new();
    if existing.rent_yen != draft.rent_yen {
        changes.push(ChangeKind::RentChanged);
    }
    if existing.title != draft.title {
        changes.push(ChangeKind::TitleChanged);
    }
    changes
}
