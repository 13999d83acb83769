//! Postgres round-trip tests.
//!
//! These run against a scratch database and are ignored unless
//! `DATABASE_URL` is exported:
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/sumika_test cargo test -p sumika-store -- --ignored
//! ```

use chrono::Utc;
use sumika_core::model::{ListingDraft, SourceRef};
use sumika_store::{
    EnqueueOutcome, NewCandidate, PgStore, PropertyStore, QueueStatus, QueueStore, RetryPolicy,
};

async fn scratch_store() -> PgStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for pg tests");
    let store = PgStore::connect(&url).await.expect("connect");
    store.ensure_schema().await.expect("schema");
    store
}

fn unique_ref() -> SourceRef {
    // Distinct per test run so reruns against the same scratch DB stay clean.
    let nonce = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    SourceRef::new("portal-test", format!("{nonce:048x}"))
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn pg_enqueue_lease_done_round_trip() {
    let store = scratch_store().await;
    let source_ref = unique_ref();
    let now = Utc::now();

    let outcome = store
        .upsert_candidate(
            &NewCandidate {
                source_ref: source_ref.clone(),
                detail_url: format!(
                    "https://portal.example/chintai/{}/",
                    source_ref.source_property_id
                ),
                priority: 100,
            },
            now,
        )
        .await
        .unwrap();
    assert_eq!(outcome, EnqueueOutcome::Inserted);

    let item = store.lease_next(now).await.unwrap().expect("leased row");
    assert_eq!(item.status, QueueStatus::Processing);

    store.mark_done(item.id, now).await.unwrap();
    let row = QueueStore::find(&store, &source_ref).await.unwrap().unwrap();
    assert_eq!(row.status, QueueStatus::Done);
    assert!(row.completed_at.is_some());
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn pg_transient_failure_schedules_retry() {
    let store = scratch_store().await;
    let source_ref = unique_ref();
    let now = Utc::now();

    store
        .upsert_candidate(
            &NewCandidate {
                source_ref: source_ref.clone(),
                detail_url: format!(
                    "https://portal.example/chintai/{}/",
                    source_ref.source_property_id
                ),
                priority: 100,
            },
            now,
        )
        .await
        .unwrap();

    let item = store.lease_next(now).await.unwrap().expect("leased row");
    let status = store
        .mark_transient_failure(item.id, "connection reset", &RetryPolicy::default(), now)
        .await
        .unwrap();
    assert_eq!(status, QueueStatus::Failed);

    let row = QueueStore::find(&store, &source_ref).await.unwrap().unwrap();
    assert_eq!(row.attempts, 1);
    let retry_at = row.next_retry_at.expect("next_retry_at set");
    assert!(retry_at > now);
}

#[tokio::test]
#[ignore = "requires DATABASE_URL pointing at a scratch postgres"]
async fn pg_property_upsert_and_mark_seen() {
    let store = scratch_store().await;
    let source_ref = unique_ref();
    let now = Utc::now();

    let mut draft = ListingDraft::new(
        source_ref.clone(),
        format!(
            "https://portal.example/chintai/{}/",
            source_ref.source_property_id
        ),
        "Bright 2DK near the station",
    );
    draft.rent_yen = Some(92_000);

    let report = store.upsert_from_scrape(&draft, now).await.unwrap();
    assert!(report.created);
    assert_eq!(report.property_id.len(), 32);

    assert!(store.mark_seen(&source_ref, now).await.unwrap());
    let property = PropertyStore::find(&store, &source_ref)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(property.rent_yen, Some(92_000));
    assert!(property.last_seen_at.is_some());
}
