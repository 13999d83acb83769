//! Shared harness for the end-to-end scenarios: in-memory stores, a
//! scripted extractor, a simulated clock, and a gate with a pinned pace.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumika_core::clock::SimClock;
use sumika_core::model::{ListingDraft, SourceRef};
use sumika_core::outcome::{ExtractOutcome, FetchError};
use sumika_core::pace::FixedPace;
use sumika_extract::{Candidate, Extractor, IndexScanOutcome, IndexScanner, PortalSource};
use sumika_rategate::{RateGate, RateGateConfig};
use sumika_store::MemStore;
use sumika_worker::{DiffProducer, Healthcheck, HealthcheckConfig, Worker, WorkerConfig};
use tokio::sync::watch;

pub const SOURCE: &str = "portal";
pub const HEALTHCHECK_URL: &str = "https://portal.example/chintai/";
pub const INDEX_URL: &str = "https://portal.example/chintai/list/tokyo/";

pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
}

/// A distinct 48-hex token per byte value.
pub fn token(n: u8) -> String {
    format!("{n:02x}").repeat(24)
}

pub fn detail_url(token: &str) -> String {
    format!("https://portal.example/chintai/{token}/")
}

pub fn source_ref(token: &str) -> SourceRef {
    SourceRef::new(SOURCE, token)
}

pub enum DetailScript {
    Listing {
        title: &'static str,
        rent: Option<i64>,
    },
    Missing,
    Hostile,
    Transient,
}

pub enum IndexScript {
    Tokens(Vec<String>),
    Hostile,
}

/// Extractor whose responses are queued per URL; unscripted index URLs
/// answer with a clean empty page so the healthcheck passes by default.
pub struct ScriptedExtractor {
    source: PortalSource,
    details: Mutex<HashMap<String, VecDeque<DetailScript>>>,
    index: Mutex<HashMap<String, VecDeque<IndexScript>>>,
}

impl ScriptedExtractor {
    pub fn new() -> Self {
        Self {
            source: PortalSource::new(SOURCE, "https://portal.example/chintai/{id}/"),
            details: Mutex::new(HashMap::new()),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn script_detail(&self, url: &str, script: DetailScript) {
        self.details
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(script);
    }

    pub fn script_index(&self, url: &str, script: IndexScript) {
        self.index
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(script);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract_detail(&self, source_ref: &SourceRef, url: &str) -> ExtractOutcome {
        let script = self
            .details
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|scripts| scripts.pop_front());

        match script {
            Some(DetailScript::Listing { title, rent }) => {
                let mut draft = ListingDraft::new(source_ref.clone(), url, title);
                draft.rent_yen = rent;
                ExtractOutcome::Listing(draft)
            }
            Some(DetailScript::Missing) => ExtractOutcome::PermanentMissing,
            Some(DetailScript::Hostile) => ExtractOutcome::Hostile,
            Some(DetailScript::Transient) => ExtractOutcome::TransientOther(FetchError::Connect(
                "scripted transient failure".to_string(),
            )),
            None => ExtractOutcome::TransientOther(FetchError::Connect(
                "unscripted detail url".to_string(),
            )),
        }
    }
}

#[async_trait]
impl IndexScanner for ScriptedExtractor {
    async fn scan_index(&self, url: &str) -> IndexScanOutcome {
        let script = self
            .index
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|scripts| scripts.pop_front());

        match script {
            Some(IndexScript::Tokens(tokens)) => IndexScanOutcome::Candidates(
                tokens
                    .iter()
                    .map(|token| Candidate {
                        source_ref: SourceRef::new(SOURCE, token.clone()),
                        detail_url: self.source.detail_url(token),
                    })
                    .collect(),
            ),
            Some(IndexScript::Hostile) => IndexScanOutcome::Hostile,
            None => IndexScanOutcome::Candidates(Vec::new()),
        }
    }
}

pub struct Harness {
    pub store: Arc<MemStore>,
    pub extractor: Arc<ScriptedExtractor>,
    pub gate: Arc<RateGate>,
    pub clock: Arc<SimClock>,
    pub is_running: Arc<AtomicBool>,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

impl Harness {
    /// Gate with the given hourly cap and a pinned (non-random) pace.
    pub fn new(per_hour_limit: usize, pace: Duration) -> Self {
        let clock = Arc::new(SimClock::new(epoch()));
        let gate = Arc::new(
            RateGateConfig::builder()
                .name("test-origin")
                .per_hour_limit(per_hour_limit)
                .human_pace(Duration::from_secs(45), Duration::from_secs(120))
                .pace_sampler(Arc::new(FixedPace(pace)))
                .clock(clock.clone())
                .build()
                .expect("valid gate config"),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            store: Arc::new(MemStore::new()),
            extractor: Arc::new(ScriptedExtractor::new()),
            gate,
            clock,
            is_running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn worker(&self, config: WorkerConfig) -> (Worker, Healthcheck) {
        let worker = Worker::new(
            self.store.clone(),
            self.store.clone(),
            self.gate.clone(),
            self.extractor.clone(),
            self.clock.clone(),
            config,
            self.is_running.clone(),
            self.shutdown_rx.clone(),
        );
        let healthcheck = Healthcheck::new(
            self.gate.clone(),
            self.extractor.clone(),
            self.clock.clone(),
            HealthcheckConfig {
                url: HEALTHCHECK_URL.to_string(),
                ..HealthcheckConfig::default()
            },
        );
        (worker, healthcheck)
    }

    pub fn diff(&self) -> DiffProducer {
        DiffProducer::new(
            self.gate.clone(),
            self.extractor.clone(),
            self.store.clone(),
            self.store.clone(),
            self.clock.clone(),
        )
    }
}

/// Polls a condition while simulated time auto-advances. Panics after a
/// generous simulated budget so a wedged loop fails the test instead of
/// hanging it.
pub async fn wait_for<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..4000 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    panic!("condition not reached in simulated time: {what}");
}
