//! In-memory backend.
//!
//! Same semantics as the Postgres backend, behind the same traits. Used by
//! the integration suite and by local runs without a database; state is lost
//! on restart, which the worker's startup healthcheck makes safe.

use crate::error::StoreError;
use crate::property::{diff_changes, ChangeKind, PropertyStore, SaveReport};
use crate::queue::{
    EnqueueOutcome, NewCandidate, QueueCounts, QueueItem, QueueStatus, QueueStore,
};
use crate::retry::{Disposition, RetryPolicy};
use crate::transition::ensure_transition;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use sumika_core::model::{
    content_id, normalize_detail_url, ListingDraft, Property, PropertyStatus, SourceRef,
};

#[derive(Debug, Clone)]
struct SnapshotRow {
    property_id: String,
    snapshot_date: NaiveDate,
}

#[derive(Debug, Clone)]
struct ChangeRow {
    property_id: String,
    kind: ChangeKind,
}

#[derive(Default)]
struct MemInner {
    next_queue_id: i64,
    queue: BTreeMap<i64, QueueItem>,
    properties: HashMap<SourceRef, Property>,
    snapshots: Vec<SnapshotRow>,
    changes: Vec<ChangeRow>,
}

/// In-memory queue and property store.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<MemInner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshot rows written (test observability).
    pub fn snapshot_count(&self) -> usize {
        self.inner.lock().unwrap().snapshots.len()
    }

    /// Change kinds recorded for a property, in write order (test
    /// observability).
    pub fn changes_for(&self, property_id: &str) -> Vec<ChangeKind> {
        self.inner
            .lock()
            .unwrap()
            .changes
            .iter()
            .filter(|c| c.property_id == property_id)
            .map(|c| c.kind)
            .collect()
    }

    fn record_snapshot(inner: &mut MemInner, property_id: &str, date: NaiveDate) {
        let exists = inner
            .snapshots
            .iter()
            .any(|s| s.property_id == property_id && s.snapshot_date == date);
        if !exists {
            inner.snapshots.push(SnapshotRow {
                property_id: property_id.to_string(),
                snapshot_date: date,
            });
        }
    }
}

#[async_trait]
impl QueueStore for MemStore {
    async fn upsert_candidate(
        &self,
        candidate: &NewCandidate,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let existing_id = inner
            .queue
            .values()
            .find(|item| item.source_ref == candidate.source_ref)
            .map(|item| item.id);

        match existing_id {
            None => {
                inner.next_queue_id += 1;
                let id = inner.next_queue_id;
                inner.queue.insert(
                    id,
                    QueueItem {
                        id,
                        source_ref: candidate.source_ref.clone(),
                        detail_url: candidate.detail_url.clone(),
                        status: QueueStatus::Pending,
                        priority: candidate.priority,
                        attempts: 0,
                        last_error: None,
                        next_retry_at: None,
                        created_at: now,
                        updated_at: now,
                        completed_at: None,
                    },
                );
                Ok(EnqueueOutcome::Inserted)
            }
            Some(id) => {
                let item = inner.queue.get_mut(&id).ok_or(StoreError::NotFound(id))?;
                match item.status {
                    QueueStatus::Failed => {
                        ensure_transition(QueueStatus::Failed, QueueStatus::Pending)?;
                        item.status = QueueStatus::Pending;
                        item.attempts = 0;
                        item.last_error = None;
                        item.next_retry_at = None;
                        item.updated_at = now;
                        Ok(EnqueueOutcome::ResetFailed)
                    }
                    // pending/processing: already in flight; done: re-scrapes
                    // are driven by the liveness sweep; permanent_fail: never
                    // revived by producers.
                    _ => Ok(EnqueueOutcome::Unchanged),
                }
            }
        }
    }

    async fn lease_next(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, StoreError> {
        let mut inner = self.inner.lock().unwrap();

        let mut eligible: Vec<(i32, i64)> = inner
            .queue
            .values()
            .filter(|item| match item.status {
                QueueStatus::Pending => true,
                QueueStatus::Failed => item.next_retry_at.map_or(true, |at| at <= now),
                _ => false,
            })
            .map(|item| (item.priority, item.id))
            .collect();
        eligible.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let Some(&(_, id)) = eligible.first() else {
            return Ok(None);
        };

        let item = inner.queue.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        ensure_transition(item.status, QueueStatus::Processing)?;
        item.status = QueueStatus::Processing;
        item.updated_at = now;
        Ok(Some(item.clone()))
    }

    async fn mark_done(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.queue.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        ensure_transition(item.status, QueueStatus::Done)?;
        item.status = QueueStatus::Done;
        item.next_retry_at = None;
        item.completed_at = Some(now);
        item.updated_at = now;
        Ok(())
    }

    async fn mark_permanent_failure(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.queue.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        ensure_transition(item.status, QueueStatus::PermanentFail)?;
        item.status = QueueStatus::PermanentFail;
        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.next_retry_at = None;
        item.completed_at = Some(now);
        item.updated_at = now;
        Ok(())
    }

    async fn mark_transient_failure(
        &self,
        id: i64,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.queue.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let disposition = policy.disposition(item.attempts.max(0) as u32);
        let target = match disposition {
            Disposition::Retry { .. } => QueueStatus::Failed,
            Disposition::Exhausted => QueueStatus::PermanentFail,
        };
        ensure_transition(item.status, target)?;

        item.attempts += 1;
        item.last_error = Some(error.to_string());
        item.updated_at = now;
        match disposition {
            Disposition::Retry { delay } => {
                item.status = QueueStatus::Failed;
                item.next_retry_at = Some(
                    now + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero()),
                );
                item.completed_at = None;
            }
            Disposition::Exhausted => {
                item.status = QueueStatus::PermanentFail;
                item.next_retry_at = None;
                item.completed_at = Some(now);
            }
        }
        Ok(item.status)
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut counts = QueueCounts::default();
        for item in inner.queue.values() {
            match item.status {
                QueueStatus::Pending => counts.pending += 1,
                QueueStatus::Processing => counts.processing += 1,
                QueueStatus::Done => counts.done += 1,
                QueueStatus::Failed => counts.failed += 1,
                QueueStatus::PermanentFail => counts.permanent_fail += 1,
            }
        }
        Ok(counts)
    }

    async fn reap_stale_processing(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff =
            now - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut inner = self.inner.lock().unwrap();
        let mut reaped = 0;
        for item in inner.queue.values_mut() {
            if item.status == QueueStatus::Processing && item.updated_at <= cutoff {
                ensure_transition(QueueStatus::Processing, QueueStatus::Pending)?;
                item.status = QueueStatus::Pending;
                item.updated_at = now;
                reaped += 1;
            }
        }
        Ok(reaped)
    }

    async fn find(&self, source_ref: &SourceRef) -> Result<Option<QueueItem>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .queue
            .values()
            .find(|item| &item.source_ref == source_ref)
            .cloned())
    }
}

#[async_trait]
impl PropertyStore for MemStore {
    async fn find(&self, source_ref: &SourceRef) -> Result<Option<Property>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.properties.get(source_ref).cloned())
    }

    async fn mark_seen(
        &self,
        source_ref: &SourceRef,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.properties.get_mut(source_ref) {
            Some(property) => {
                // Monotone: a late-arriving confirmation never rewinds it.
                property.last_seen_at = Some(property.last_seen_at.map_or(now, |t| t.max(now)));
                property.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn upsert_from_scrape(
        &self,
        draft: &ListingDraft,
        now: DateTime<Utc>,
    ) -> Result<SaveReport, StoreError> {
        let normalized = normalize_detail_url(&draft.detail_url)
            .map_err(|e| StoreError::Corrupt(format!("bad detail url {}: {e}", draft.detail_url)))?;

        let mut inner = self.inner.lock().unwrap();
        let report = if let Some(property) = inner.properties.get_mut(&draft.source_ref) {
            let changes = diff_changes(property, draft);
            property.title = draft.title.clone();
            property.thumbnail_url = draft.thumbnail_url.clone();
            property.rent_yen = draft.rent_yen;
            property.floor_plan = draft.floor_plan.clone();
            property.floor_area_sqm = draft.floor_area_sqm;
            property.walk_minutes = draft.walk_minutes;
            property.nearest_station = draft.nearest_station.clone();
            property.address = draft.address.clone();
            property.building_age_years = draft.building_age_years;
            property.floor = draft.floor.clone();
            property.fetched_at = Some(now);
            property.last_seen_at = Some(property.last_seen_at.map_or(now, |t| t.max(now)));
            property.updated_at = now;
            SaveReport {
                property_id: property.id.clone(),
                created: false,
                changes,
            }
        } else {
            let id = content_id(&normalized);
            let property = Property {
                id: id.clone(),
                source_ref: draft.source_ref.clone(),
                detail_url: normalized,
                title: draft.title.clone(),
                thumbnail_url: draft.thumbnail_url.clone(),
                rent_yen: draft.rent_yen,
                floor_plan: draft.floor_plan.clone(),
                floor_area_sqm: draft.floor_area_sqm,
                walk_minutes: draft.walk_minutes,
                nearest_station: draft.nearest_station.clone(),
                address: draft.address.clone(),
                building_age_years: draft.building_age_years,
                floor: draft.floor.clone(),
                status: PropertyStatus::Active,
                removed_at: None,
                last_seen_at: Some(now),
                fetched_at: Some(now),
                created_at: now,
                updated_at: now,
            };
            inner.properties.insert(draft.source_ref.clone(), property);
            SaveReport {
                property_id: id,
                created: true,
                changes: vec![ChangeKind::FirstSeen],
            }
        };

        for change in &report.changes {
            inner.changes.push(ChangeRow {
                property_id: report.property_id.clone(),
                kind: *change,
            });
        }
        Self::record_snapshot(&mut inner, &report.property_id, now.date_naive());
        Ok(report)
    }
}
