//! Extraction outcome taxonomy.
//!
//! The four cases have different queue outcomes and different RateGate side
//! effects; callers must not conflate `PermanentMissing` and `Hostile`.

use crate::model::ListingDraft;
use std::time::Duration;
use thiserror::Error;

/// Why a fetch did not yield a page body.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Connect(String),

    #[error("origin returned status {0}")]
    Status(u16),

    /// The page was fetched but a required field could not be located.
    /// The `parse:` prefix survives into `last_error` so operators can
    /// triage HTML drift separately from network noise.
    #[error("parse: {0}")]
    Parse(String),
}

/// Result of extracting one detail page.
#[derive(Debug)]
pub enum ExtractOutcome {
    /// All required fields populated; optional fields nullable.
    Listing(ListingDraft),
    /// Origin returned a definitive "this listing does not exist" signal.
    PermanentMissing,
    /// Origin returned an anti-bot signal (403, 429, challenge page).
    Hostile,
    /// Network error, 5xx, or parse error; worth retrying later.
    TransientOther(FetchError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_errors_carry_triage_prefix() {
        let err = FetchError::Parse("missing title selector".to_string());
        assert!(err.to_string().starts_with("parse: "));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(
            FetchError::Status(503).to_string(),
            "origin returned status 503"
        );
    }
}
