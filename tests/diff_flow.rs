//! DiffProducer scenarios: dedup, idempotence, hostile index pages.

mod support;

use chrono::NaiveTime;
use std::sync::Arc;
use std::time::Duration;
use sumika_core::clock::Clock;
use sumika_core::model::ListingDraft;
use sumika_store::{NewCandidate, PropertyStore, QueueStatus, QueueStore};
use sumika_worker::{Scheduler, SchedulerConfig};
use support::*;

async fn seed_property(harness: &Harness, token: &str) {
    let draft = ListingDraft::new(source_ref(token), detail_url(token), "seeded listing");
    harness
        .store
        .upsert_from_scrape(&draft, harness.clock.now())
        .await
        .unwrap();
}

async fn seed_permanent_fail(harness: &Harness, token: &str) {
    let now = harness.clock.now();
    harness
        .store
        .upsert_candidate(
            &NewCandidate {
                source_ref: source_ref(token),
                detail_url: detail_url(token),
                priority: 0,
            },
            now,
        )
        .await
        .unwrap();
    let item = harness.store.lease_next(now).await.unwrap().unwrap();
    harness
        .store
        .mark_permanent_failure(item.id, "origin returned 404 for listing", now)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn dedup_confirms_existing_and_enqueues_only_new() {
    let harness = Harness::new(100, Duration::ZERO);

    // 7 listings already scraped, 1 permanently failed, 2 unseen.
    let tokens: Vec<String> = (1u8..=10).map(token).collect();
    for t in &tokens[..7] {
        seed_property(&harness, t).await;
    }
    seed_permanent_fail(&harness, &tokens[7]).await;

    tokio::time::advance(Duration::from_secs(3600)).await;
    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Tokens(tokens.clone()));

    let summary = harness.diff().run(INDEX_URL, None).await.unwrap();
    assert_eq!(summary.urls_found, 10);
    assert_eq!(summary.existing, 8);
    assert_eq!(summary.new_to_queue, 2);
    assert!(summary.note.is_none());

    // The 7 live listings got their liveness confirmed.
    let seen = PropertyStore::find(harness.store.as_ref(), &source_ref(&tokens[0]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(seen.last_seen_at.unwrap(), harness.clock.now());

    // The permanent failure stayed terminal and untouched.
    let dead = QueueStore::find(harness.store.as_ref(), &source_ref(&tokens[7]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(dead.status, QueueStatus::PermanentFail);
    assert_eq!(dead.attempts, 1);

    // The 2 unseen tokens became pending work.
    let counts = harness.store.counts().await.unwrap();
    assert_eq!(counts.pending, 2);
}

#[tokio::test(start_paused = true)]
async fn double_run_is_idempotent() {
    let harness = Harness::new(100, Duration::ZERO);
    let tokens: Vec<String> = vec![token(0xaa), token(0xbb)];
    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Tokens(tokens.clone()));
    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Tokens(tokens.clone()));

    let first = harness.diff().run(INDEX_URL, None).await.unwrap();
    assert_eq!(first.new_to_queue, 2);

    let row_a = QueueStore::find(harness.store.as_ref(), &source_ref(&tokens[0]))
        .await
        .unwrap()
        .unwrap();
    let row_b = QueueStore::find(harness.store.as_ref(), &source_ref(&tokens[1]))
        .await
        .unwrap()
        .unwrap();

    tokio::time::advance(Duration::from_secs(30)).await;
    let second = harness.diff().run(INDEX_URL, None).await.unwrap();
    assert_eq!(second.urls_found, 2);
    assert_eq!(second.existing, 2);
    assert_eq!(second.new_to_queue, 0);

    // The pending rows are untouched, timestamps included.
    assert_eq!(
        QueueStore::find(harness.store.as_ref(), &source_ref(&tokens[0]))
            .await
            .unwrap()
            .unwrap(),
        row_a
    );
    assert_eq!(
        QueueStore::find(harness.store.as_ref(), &source_ref(&tokens[1]))
            .await
            .unwrap()
            .unwrap(),
        row_b
    );
}

#[tokio::test(start_paused = true)]
async fn rediscovery_resets_failed_rows() {
    let harness = Harness::new(100, Duration::ZERO);
    let t = token(0xcc);
    let now = harness.clock.now();

    harness
        .store
        .upsert_candidate(
            &NewCandidate {
                source_ref: source_ref(&t),
                detail_url: detail_url(&t),
                priority: 0,
            },
            now,
        )
        .await
        .unwrap();
    let item = harness.store.lease_next(now).await.unwrap().unwrap();
    harness
        .store
        .mark_transient_failure(item.id, "timeout", &Default::default(), now)
        .await
        .unwrap();

    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Tokens(vec![t.clone()]));
    let summary = harness.diff().run(INDEX_URL, None).await.unwrap();
    // A fresh index sighting is positive evidence: the failed row counts as
    // newly enqueued work.
    assert_eq!(summary.new_to_queue, 1);

    let row = QueueStore::find(harness.store.as_ref(), &source_ref(&t))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, QueueStatus::Pending);
    assert_eq!(row.attempts, 0);
    assert!(row.next_retry_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn hostile_index_scan_returns_note_and_arms_cooldown() {
    let harness = Harness::new(100, Duration::ZERO);
    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Hostile);

    let summary = harness.diff().run(INDEX_URL, None).await.unwrap();
    assert_eq!(summary.urls_found, 0);
    assert_eq!(summary.new_to_queue, 0);
    assert!(summary.note.is_some());

    let stats = harness.gate.stats();
    assert_eq!(stats.hostile_signals, 1);
    assert!(stats.cooldown_until.is_some());
}

#[tokio::test(start_paused = true)]
async fn manual_scheduler_run_walks_urls_serially() {
    let harness = Harness::new(100, Duration::ZERO);
    let url_a = "https://portal.example/chintai/list/a/";
    let url_b = "https://portal.example/chintai/list/b/";
    harness
        .extractor
        .script_index(url_a, IndexScript::Tokens(vec![token(0x01)]));
    harness
        .extractor
        .script_index(url_b, IndexScript::Tokens(vec![token(0x02)]));

    let scheduler = Scheduler::new(
        Arc::new(harness.diff()),
        harness.clock.clone(),
        SchedulerConfig {
            enabled: true,
            daily_run_time: NaiveTime::from_hms_opt(3, 0, 0).unwrap(),
            index_urls: vec![url_a.to_string(), url_b.to_string()],
        },
        harness.shutdown_rx.clone(),
    );
    scheduler.run_once().await;

    // Both URLs were scanned and their tokens enqueued.
    assert_eq!(harness.store.counts().await.unwrap().pending, 2);
    // Two index fetches were spent from the shared budget.
    assert_eq!(harness.gate.stats().diff_admissions, 2);
}

#[tokio::test(start_paused = true)]
async fn limit_caps_processed_candidates() {
    let harness = Harness::new(100, Duration::ZERO);
    let tokens: Vec<String> = (1u8..=6).map(token).collect();
    harness
        .extractor
        .script_index(INDEX_URL, IndexScript::Tokens(tokens));

    let summary = harness.diff().run(INDEX_URL, Some(4)).await.unwrap();
    assert_eq!(summary.urls_found, 6);
    assert_eq!(summary.new_to_queue, 4);
    assert_eq!(harness.store.counts().await.unwrap().pending, 4);
}
