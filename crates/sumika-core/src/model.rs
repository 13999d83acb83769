//! Listing domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// Identity of a listing at its origin: the portal name plus the 48-hex
/// token the portal embeds in its DOM.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub source: String,
    pub source_property_id: String,
}

impl SourceRef {
    pub fn new(source: impl Into<String>, source_property_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            source_property_id: source_property_id.into(),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.source_property_id)
    }
}

/// Listing lifecycle status. `Removed` is set by the downstream
/// logical-deletion sweep, never by the scrape core itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyStatus {
    Active,
    Removed,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Active => "active",
            PropertyStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for PropertyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(PropertyStatus::Active),
            "removed" => Ok(PropertyStatus::Removed),
            other => Err(format!("unknown property status: {other}")),
        }
    }
}

/// The fields an extraction produces for one detail page.
///
/// `title` is the only required descriptive field; everything else is
/// nullable because portals omit attributes freely.
#[derive(Debug, Clone, PartialEq)]
pub struct ListingDraft {
    pub source_ref: SourceRef,
    pub detail_url: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub rent_yen: Option<i64>,
    pub floor_plan: Option<String>,
    pub floor_area_sqm: Option<f64>,
    pub walk_minutes: Option<i32>,
    pub nearest_station: Option<String>,
    pub address: Option<String>,
    pub building_age_years: Option<i32>,
    pub floor: Option<String>,
}

impl ListingDraft {
    /// A draft with only the required fields set.
    pub fn new(source_ref: SourceRef, detail_url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_ref,
            detail_url: detail_url.into(),
            title: title.into(),
            thumbnail_url: None,
            rent_yen: None,
            floor_plan: None,
            floor_area_sqm: None,
            walk_minutes: None,
            nearest_station: None,
            address: None,
            building_age_years: None,
            floor: None,
        }
    }
}

/// A persisted listing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// 32-hex content identifier derived from the normalized detail URL.
    pub id: String,
    pub source_ref: SourceRef,
    pub detail_url: String,
    pub title: String,
    pub thumbnail_url: Option<String>,
    pub rent_yen: Option<i64>,
    pub floor_plan: Option<String>,
    pub floor_area_sqm: Option<f64>,
    pub walk_minutes: Option<i32>,
    pub nearest_station: Option<String>,
    pub address: Option<String>,
    pub building_age_years: Option<i32>,
    pub floor: Option<String>,
    pub status: PropertyStatus,
    pub removed_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalizes a detail URL for identity purposes: drops query and fragment,
/// trims the trailing slash.
pub fn normalize_detail_url(raw: &str) -> Result<String, url::ParseError> {
    let mut parsed = Url::parse(raw)?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    let s = parsed.to_string();
    Ok(s.trim_end_matches('/').to_string())
}

/// Derives the stable 32-hex content identifier from a normalized URL.
///
/// The identifier is deterministic for a given normalized URL: the first
/// 128 bits of its SHA-256, hex-encoded.
pub fn content_id(normalized_url: &str) -> String {
    let digest = Sha256::digest(normalized_url.as_bytes());
    hex::encode(&digest[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_query_fragment_and_slash() {
        let url = "https://portal.example/chintai/abc123/?page=2#photos";
        assert_eq!(
            normalize_detail_url(url).unwrap(),
            "https://portal.example/chintai/abc123"
        );
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_detail_url("not a url").is_err());
    }

    #[test]
    fn test_content_id_is_deterministic_and_32_hex() {
        let a = content_id("https://portal.example/chintai/abc123");
        let b = content_id("https://portal.example/chintai/abc123");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_content_id_differs_per_url() {
        let a = content_id("https://portal.example/chintai/abc123");
        let b = content_id("https://portal.example/chintai/abc124");
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [PropertyStatus::Active, PropertyStatus::Removed] {
            assert_eq!(status.as_str().parse::<PropertyStatus>().unwrap(), status);
        }
    }
}
