//! Fetching and extraction against the origin portal.
//!
//! [`PortalClient`] performs the HTTP call and classifies the response
//! (hostile / permanently missing / transient); [`PortalExtractor`] turns
//! detail-page bodies into listing drafts and index-page bodies into
//! candidate identifiers.
//!
//! Nothing in this crate touches the rate gate: the caller (worker or diff
//! producer) owns the outbound budget.

mod client;
mod detail;
mod index;
mod parse;
mod source;
mod traits;

pub use client::{ClientError, FetchOutcome, PortalClient, PortalClientConfig};
pub use detail::{PortalExtractor, SelectorConfig};
pub use source::PortalSource;
pub use traits::{Candidate, Extractor, ExtractorError, IndexScanOutcome, IndexScanner};
