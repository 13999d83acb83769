//! Extraction seams consumed by the worker and the diff producer.

use async_trait::async_trait;
use sumika_core::model::SourceRef;
use sumika_core::outcome::{ExtractOutcome, FetchError};
use thiserror::Error;

/// Construction-time failures (bad selectors, bad templates). These are
/// configuration errors: the system refuses to start on them.
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("invalid selector for {name}: {message}")]
    BadSelector { name: &'static str, message: String },

    #[error("invalid identifier pattern: {0}")]
    BadTokenPattern(String),

    #[error("detail url template must contain an {{id}} placeholder: {0}")]
    BadTemplate(String),
}

/// One identifier discovered on an index page, with its canonical detail
/// URL already built from the source template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source_ref: SourceRef,
    pub detail_url: String,
}

/// Result of scanning one index page.
#[derive(Debug)]
pub enum IndexScanOutcome {
    /// Tokens found on the page, deduplicated, in document order.
    Candidates(Vec<Candidate>),
    /// The index URL itself 404ed; almost always an operator typo.
    Missing,
    Hostile,
    Transient(FetchError),
}

/// Produces a structured listing from a detail URL.
///
/// Implementations must NOT touch the rate gate; the caller owns the budget.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract_detail(&self, source_ref: &SourceRef, url: &str) -> ExtractOutcome;
}

/// Produces candidate identifiers from an index URL. Also serves as the
/// healthcheck probe target, since an index page is a benign URL.
#[async_trait]
pub trait IndexScanner: Send + Sync {
    async fn scan_index(&self, url: &str) -> IndexScanOutcome;
}
