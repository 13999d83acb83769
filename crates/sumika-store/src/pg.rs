//! Postgres backend.
//!
//! Runtime `sqlx::query` throughout so the crate builds without a live
//! database. Leasing uses `FOR UPDATE SKIP LOCKED`: the design assumes one
//! worker, but leasing stays safe if two race.

use crate::error::StoreError;
use crate::property::{diff_changes, ChangeKind, PropertyStore, SaveReport};
use crate::queue::{
    EnqueueOutcome, NewCandidate, QueueCounts, QueueItem, QueueStatus, QueueStore,
};
use crate::retry::{Disposition, RetryPolicy};
use crate::schema;
use crate::transition::ensure_transition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use sumika_core::model::{
    content_id, normalize_detail_url, ListingDraft, Property, PropertyStatus, SourceRef,
};

/// Postgres-backed queue and property store sharing one pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a small pool; the single-consumer design needs few
    /// connections.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Creates tables and indexes if absent. Safe to run on every startup.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(schema::CREATE_PROPERTIES).execute(&self.pool).await?;
        sqlx::query(schema::CREATE_QUEUE).execute(&self.pool).await?;
        sqlx::query(schema::CREATE_SNAPSHOTS).execute(&self.pool).await?;
        sqlx::query(schema::CREATE_CHANGES).execute(&self.pool).await?;
        for statement in schema::INDEXES {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_status(raw: &str) -> Result<QueueStatus, StoreError> {
    raw.parse::<QueueStatus>().map_err(StoreError::Corrupt)
}

fn queue_item_from_row(row: &PgRow) -> Result<QueueItem, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(QueueItem {
        id: row.try_get("id")?,
        source_ref: SourceRef::new(
            row.try_get::<String, _>("source_name")?,
            row.try_get::<String, _>("source_property_id")?,
        ),
        detail_url: row.try_get("detail_url")?,
        status: parse_status(&status)?,
        priority: row.try_get("priority")?,
        attempts: row.try_get("attempts")?,
        last_error: row.try_get("last_error")?,
        next_retry_at: row.try_get("next_retry_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn property_from_row(row: &PgRow) -> Result<Property, StoreError> {
    let status: String = row.try_get("status")?;
    let id: String = row.try_get("id")?;
    Ok(Property {
        id: id.trim_end().to_string(),
        source_ref: SourceRef::new(
            row.try_get::<String, _>("source_name")?,
            row.try_get::<String, _>("source_property_id")?,
        ),
        detail_url: row.try_get("detail_url")?,
        title: row.try_get("title")?,
        thumbnail_url: row.try_get("thumbnail_url")?,
        rent_yen: row.try_get("rent_yen")?,
        floor_plan: row.try_get("floor_plan")?,
        floor_area_sqm: row.try_get("floor_area_sqm")?,
        walk_minutes: row.try_get("walk_minutes")?,
        nearest_station: row.try_get("nearest_station")?,
        address: row.try_get("address")?,
        building_age_years: row.try_get("building_age_years")?,
        floor: row.try_get("floor")?,
        status: status
            .parse::<PropertyStatus>()
            .map_err(StoreError::Corrupt)?,
        removed_at: row.try_get("removed_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        fetched_at: row.try_get("fetched_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const QUEUE_COLUMNS: &str = "id, source_name, source_property_id, detail_url, status, priority, \
     attempts, last_error, next_retry_at, created_at, updated_at, completed_at";

#[async_trait]
impl QueueStore for PgStore {
    async fn upsert_candidate(
        &self,
        candidate: &NewCandidate,
        now: DateTime<Utc>,
    ) -> Result<EnqueueOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, status FROM detail_scrape_queue
             WHERE source_name = $1 AND source_property_id = $2
             FOR UPDATE",
        )
        .bind(&candidate.source_ref.source)
        .bind(&candidate.source_ref.source_property_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO detail_scrape_queue
                         (source_name, source_property_id, detail_url, status,
                          priority, attempts, created_at, updated_at)
                     VALUES ($1, $2, $3, 'pending', $4, 0, $5, $5)",
                )
                .bind(&candidate.source_ref.source)
                .bind(&candidate.source_ref.source_property_id)
                .bind(&candidate.detail_url)
                .bind(candidate.priority)
                .bind(now)
                .execute(&mut *tx)
                .await?;
                EnqueueOutcome::Inserted
            }
            Some(row) => {
                let id: i64 = row.try_get("id")?;
                let status: String = row.try_get("status")?;
                match parse_status(&status)? {
                    QueueStatus::Failed => {
                        ensure_transition(QueueStatus::Failed, QueueStatus::Pending)?;
                        sqlx::query(
                            "UPDATE detail_scrape_queue
                             SET status = 'pending', attempts = 0, last_error = NULL,
                                 next_retry_at = NULL, updated_at = $2
                             WHERE id = $1",
                        )
                        .bind(id)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                        EnqueueOutcome::ResetFailed
                    }
                    _ => EnqueueOutcome::Unchanged,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn lease_next(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, StoreError> {
        let row = sqlx::query(&format!(
            "WITH next_item AS (
                 SELECT id FROM detail_scrape_queue
                 WHERE status = 'pending'
                    OR (status = 'failed'
                        AND (next_retry_at IS NULL OR next_retry_at <= $1))
                 ORDER BY priority DESC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE detail_scrape_queue q
             SET status = 'processing', updated_at = $1
             FROM next_item
             WHERE q.id = next_item.id
             RETURNING q.{}",
            QUEUE_COLUMNS.replace(", ", ", q.")
        ))
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(queue_item_from_row).transpose()
    }

    async fn mark_done(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE detail_scrape_queue
             SET status = 'done', next_retry_at = NULL, completed_at = $2, updated_at = $2
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_conflict(id, QueueStatus::Done).await);
        }
        Ok(())
    }

    async fn mark_permanent_failure(
        &self,
        id: i64,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(
            "UPDATE detail_scrape_queue
             SET status = 'permanent_fail', attempts = attempts + 1, last_error = $2,
                 next_retry_at = NULL, completed_at = $3, updated_at = $3
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(self.transition_conflict(id, QueueStatus::PermanentFail).await);
        }
        Ok(())
    }

    async fn mark_transient_failure(
        &self,
        id: i64,
        error: &str,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<QueueStatus, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT status, attempts FROM detail_scrape_queue WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound(id))?;

        let status: String = row.try_get("status")?;
        let attempts: i32 = row.try_get("attempts")?;
        let current = parse_status(&status)?;

        let disposition = policy.disposition(attempts.max(0) as u32);
        let target = match disposition {
            Disposition::Retry { .. } => QueueStatus::Failed,
            Disposition::Exhausted => QueueStatus::PermanentFail,
        };
        ensure_transition(current, target)?;

        match disposition {
            Disposition::Retry { delay } => {
                let retry_at = now
                    + chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                sqlx::query(
                    "UPDATE detail_scrape_queue
                     SET status = 'failed', attempts = attempts + 1, last_error = $2,
                         next_retry_at = $3, completed_at = NULL, updated_at = $4
                     WHERE id = $1",
                )
                .bind(id)
                .bind(error)
                .bind(retry_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            Disposition::Exhausted => {
                sqlx::query(
                    "UPDATE detail_scrape_queue
                     SET status = 'permanent_fail', attempts = attempts + 1, last_error = $2,
                         next_retry_at = NULL, completed_at = $3, updated_at = $3
                     WHERE id = $1",
                )
                .bind(id)
                .bind(error)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(target)
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM detail_scrape_queue GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let n: i64 = row.try_get("n")?;
            match parse_status(&status)? {
                QueueStatus::Pending => counts.pending = n,
                QueueStatus::Processing => counts.processing = n,
                QueueStatus::Done => counts.done = n,
                QueueStatus::Failed => counts.failed = n,
                QueueStatus::PermanentFail => counts.permanent_fail = n,
            }
        }
        Ok(counts)
    }

    async fn reap_stale_processing(
        &self,
        older_than: Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff = now
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let updated = sqlx::query(
            "UPDATE detail_scrape_queue
             SET status = 'pending', updated_at = $2
             WHERE status = 'processing' AND updated_at <= $1",
        )
        .bind(cutoff)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected())
    }

    async fn find(&self, source_ref: &SourceRef) -> Result<Option<QueueItem>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {QUEUE_COLUMNS} FROM detail_scrape_queue
             WHERE source_name = $1 AND source_property_id = $2"
        ))
        .bind(&source_ref.source)
        .bind(&source_ref.source_property_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(queue_item_from_row).transpose()
    }
}

impl PgStore {
    /// Distinguishes "row gone" from "row moved on" after a guarded UPDATE
    /// matched nothing.
    async fn transition_conflict(&self, id: i64, target: QueueStatus) -> StoreError {
        let current = sqlx::query("SELECT status FROM detail_scrape_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        match current {
            Ok(Some(row)) => match row.try_get::<String, _>("status") {
                Ok(status) => match parse_status(&status) {
                    Ok(from) => StoreError::IllegalTransition { from, to: target },
                    Err(e) => e,
                },
                Err(e) => StoreError::Database(e),
            },
            Ok(None) => StoreError::NotFound(id),
            Err(e) => StoreError::Database(e),
        }
    }
}

const PROPERTY_COLUMNS: &str = "id, source_name, source_property_id, detail_url, title, \
     thumbnail_url, rent_yen, floor_plan, floor_area_sqm, walk_minutes, nearest_station, \
     address, building_age_years, floor, status, removed_at, last_seen_at, fetched_at, \
     created_at, updated_at";

#[async_trait]
impl PropertyStore for PgStore {
    async fn find(&self, source_ref: &SourceRef) -> Result<Option<Property>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties
             WHERE source_name = $1 AND source_property_id = $2"
        ))
        .bind(&source_ref.source)
        .bind(&source_ref.source_property_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(property_from_row).transpose()
    }

    async fn mark_seen(
        &self,
        source_ref: &SourceRef,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = sqlx::query(
            "UPDATE properties
             SET last_seen_at = GREATEST(COALESCE(last_seen_at, to_timestamp(0)), $3),
                 updated_at = $3
             WHERE source_name = $1 AND source_property_id = $2",
        )
        .bind(&source_ref.source)
        .bind(&source_ref.source_property_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(updated.rows_affected() > 0)
    }

    async fn upsert_from_scrape(
        &self,
        draft: &ListingDraft,
        now: DateTime<Utc>,
    ) -> Result<SaveReport, StoreError> {
        let normalized = normalize_detail_url(&draft.detail_url)
            .map_err(|e| StoreError::Corrupt(format!("bad detail url {}: {e}", draft.detail_url)))?;

        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(&format!(
            "SELECT {PROPERTY_COLUMNS} FROM properties
             WHERE source_name = $1 AND source_property_id = $2
             FOR UPDATE"
        ))
        .bind(&draft.source_ref.source)
        .bind(&draft.source_ref.source_property_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (report, title, rent_yen, status) = match existing {
            None => {
                let id = content_id(&normalized);
                sqlx::query(
                    "INSERT INTO properties
                         (id, source_name, source_property_id, detail_url, title,
                          thumbnail_url, rent_yen, floor_plan, floor_area_sqm,
                          walk_minutes, nearest_station, address, building_age_years,
                          floor, status, last_seen_at, fetched_at, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                             'active', $15, $15, $15, $15)",
                )
                .bind(&id)
                .bind(&draft.source_ref.source)
                .bind(&draft.source_ref.source_property_id)
                .bind(&normalized)
                .bind(&draft.title)
                .bind(&draft.thumbnail_url)
                .bind(draft.rent_yen)
                .bind(&draft.floor_plan)
                .bind(draft.floor_area_sqm)
                .bind(draft.walk_minutes)
                .bind(&draft.nearest_station)
                .bind(&draft.address)
                .bind(draft.building_age_years)
                .bind(&draft.floor)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                (
                    SaveReport {
                        property_id: id,
                        created: true,
                        changes: vec![ChangeKind::FirstSeen],
                    },
                    draft.title.clone(),
                    draft.rent_yen,
                    PropertyStatus::Active,
                )
            }
            Some(row) => {
                let current = property_from_row(&row)?;
                let changes = diff_changes(&current, draft);
                sqlx::query(
                    "UPDATE properties
                     SET title = $3, thumbnail_url = $4, rent_yen = $5, floor_plan = $6,
                         floor_area_sqm = $7, walk_minutes = $8, nearest_station = $9,
                         address = $10, building_age_years = $11, floor = $12,
                         fetched_at = $13,
                         last_seen_at = GREATEST(COALESCE(last_seen_at, to_timestamp(0)), $13),
                         updated_at = $13
                     WHERE source_name = $1 AND source_property_id = $2",
                )
                .bind(&draft.source_ref.source)
                .bind(&draft.source_ref.source_property_id)
                .bind(&draft.title)
                .bind(&draft.thumbnail_url)
                .bind(draft.rent_yen)
                .bind(&draft.floor_plan)
                .bind(draft.floor_area_sqm)
                .bind(draft.walk_minutes)
                .bind(&draft.nearest_station)
                .bind(&draft.address)
                .bind(draft.building_age_years)
                .bind(&draft.floor)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                let status = current.status;
                (
                    SaveReport {
                        property_id: current.id,
                        created: false,
                        changes,
                    },
                    draft.title.clone(),
                    draft.rent_yen,
                    status,
                )
            }
        };

        for change in &report.changes {
            sqlx::query(
                "INSERT INTO property_changes (property_id, change_kind, changed_at)
                 VALUES ($1, $2, $3)",
            )
            .bind(&report.property_id)
            .bind(change.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO property_snapshots
                 (property_id, snapshot_date, title, rent_yen, status, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (property_id, snapshot_date)
             DO UPDATE SET title = EXCLUDED.title, rent_yen = EXCLUDED.rent_yen,
                           status = EXCLUDED.status",
        )
        .bind(&report.property_id)
        .bind(now.date_naive())
        .bind(&title)
        .bind(rent_yen)
        .bind(status.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(report)
    }
}
