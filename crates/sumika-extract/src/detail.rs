//! Detail-page extraction with CSS selectors.

use crate::client::{FetchOutcome, PortalClient};
use crate::index::extract_tokens;
use crate::parse::{parse_area_sqm, parse_building_age, parse_rent_yen, parse_walk_minutes};
use crate::source::PortalSource;
use crate::traits::{Candidate, Extractor, ExtractorError, IndexScanOutcome, IndexScanner};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use sumika_core::model::{ListingDraft, SourceRef};
use sumika_core::outcome::{ExtractOutcome, FetchError};

/// CSS selectors for the portal's detail-page markup. Every field has an
/// operator override because portals reshuffle their markup without notice.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub title: String,
    pub thumbnail: String,
    pub rent: String,
    pub floor_plan: String,
    pub area: String,
    pub station: String,
    pub address: String,
    pub age: String,
    pub floor: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            title: "h1.property-title".to_string(),
            thumbnail: "img.property-photo".to_string(),
            rent: ".property-rent".to_string(),
            floor_plan: ".property-floor-plan".to_string(),
            area: ".property-area".to_string(),
            station: ".property-station".to_string(),
            address: ".property-address".to_string(),
            age: ".property-age".to_string(),
            floor: ".property-floor".to_string(),
        }
    }
}

struct SelectorSet {
    title: Selector,
    thumbnail: Selector,
    rent: Selector,
    floor_plan: Selector,
    area: Selector,
    station: Selector,
    address: Selector,
    age: Selector,
    floor: Selector,
}

fn compile(name: &'static str, css: &str) -> Result<Selector, ExtractorError> {
    Selector::parse(css).map_err(|e| ExtractorError::BadSelector {
        name,
        message: e.to_string(),
    })
}

impl SelectorSet {
    fn new(config: &SelectorConfig) -> Result<Self, ExtractorError> {
        Ok(Self {
            title: compile("title", &config.title)?,
            thumbnail: compile("thumbnail", &config.thumbnail)?,
            rent: compile("rent", &config.rent)?,
            floor_plan: compile("floor_plan", &config.floor_plan)?,
            area: compile("area", &config.area)?,
            station: compile("station", &config.station)?,
            address: compile("address", &config.address)?,
            age: compile("age", &config.age)?,
            floor: compile("floor", &config.floor)?,
        })
    }
}

/// The real extractor: classified fetch plus DOM extraction.
pub struct PortalExtractor {
    client: PortalClient,
    source: PortalSource,
    selectors: SelectorSet,
    token_pattern: Regex,
}

impl PortalExtractor {
    pub fn new(
        client: PortalClient,
        source: PortalSource,
        selector_config: &SelectorConfig,
    ) -> Result<Self, ExtractorError> {
        if !source.has_placeholder() {
            return Err(ExtractorError::BadTemplate(source.detail_url_template));
        }
        let token_pattern = Regex::new(r"\b[0-9a-f]{48}\b")
            .map_err(|e| ExtractorError::BadTokenPattern(e.to_string()))?;

        Ok(Self {
            client,
            selectors: SelectorSet::new(selector_config)?,
            source,
            token_pattern,
        })
    }

    fn text_of(&self, doc: &Html, selector: &Selector) -> Option<String> {
        doc.select(selector).next().map(|el| {
            el.text()
                .collect::<Vec<_>>()
                .join(" ")
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    fn parse_detail(&self, source_ref: &SourceRef, url: &str, body: &str) -> ExtractOutcome {
        let doc = Html::parse_document(body);

        let Some(title) = self.text_of(&doc, &self.selectors.title).filter(|t| !t.is_empty())
        else {
            return ExtractOutcome::TransientOther(FetchError::Parse(format!(
                "title not found at {url}"
            )));
        };

        let mut draft = ListingDraft::new(source_ref.clone(), url, title);
        draft.thumbnail_url = doc
            .select(&self.selectors.thumbnail)
            .next()
            .and_then(|el| el.value().attr("src"))
            .map(str::to_string);
        draft.rent_yen = self
            .text_of(&doc, &self.selectors.rent)
            .and_then(|t| parse_rent_yen(&t));
        draft.floor_plan = self
            .text_of(&doc, &self.selectors.floor_plan)
            .filter(|t| !t.is_empty());
        draft.floor_area_sqm = self
            .text_of(&doc, &self.selectors.area)
            .and_then(|t| parse_area_sqm(&t));
        let station_text = self.text_of(&doc, &self.selectors.station);
        draft.walk_minutes = station_text.as_deref().and_then(parse_walk_minutes);
        draft.nearest_station = station_text.filter(|t| !t.is_empty());
        draft.address = self
            .text_of(&doc, &self.selectors.address)
            .filter(|t| !t.is_empty());
        draft.building_age_years = self
            .text_of(&doc, &self.selectors.age)
            .and_then(|t| parse_building_age(&t));
        draft.floor = self
            .text_of(&doc, &self.selectors.floor)
            .filter(|t| !t.is_empty());

        ExtractOutcome::Listing(draft)
    }

    fn parse_index(&self, body: &str) -> Vec<Candidate> {
        extract_tokens(&self.token_pattern, body)
            .into_iter()
            .map(|token| Candidate {
                detail_url: self.source.detail_url(&token),
                source_ref: SourceRef::new(self.source.name.clone(), token),
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for PortalExtractor {
    async fn extract_detail(&self, source_ref: &SourceRef, url: &str) -> ExtractOutcome {
        match self.client.fetch(url).await {
            FetchOutcome::Body(body) => self.parse_detail(source_ref, url, &body),
            FetchOutcome::PermanentMissing => ExtractOutcome::PermanentMissing,
            FetchOutcome::Hostile => ExtractOutcome::Hostile,
            FetchOutcome::Transient(e) => ExtractOutcome::TransientOther(e),
        }
    }
}

#[async_trait]
impl IndexScanner for PortalExtractor {
    async fn scan_index(&self, url: &str) -> IndexScanOutcome {
        match self.client.fetch(url).await {
            FetchOutcome::Body(body) => {
                let candidates = self.parse_index(&body);
                tracing::debug!(url, found = candidates.len(), "index page scanned");
                IndexScanOutcome::Candidates(candidates)
            }
            FetchOutcome::PermanentMissing => IndexScanOutcome::Missing,
            FetchOutcome::Hostile => IndexScanOutcome::Hostile,
            FetchOutcome::Transient(e) => IndexScanOutcome::Transient(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::PortalClientConfig;

    fn extractor() -> PortalExtractor {
        PortalExtractor::new(
            PortalClient::new(PortalClientConfig::default()).unwrap(),
            PortalSource::new("portal", "https://portal.example/chintai/{id}/"),
            &SelectorConfig::default(),
        )
        .unwrap()
    }

    fn source_ref() -> SourceRef {
        SourceRef::new("portal", "a".repeat(48))
    }

    const DETAIL_BODY: &str = r#"
        <html><body>
          <h1 class="property-title">サニーハイツ目黒 203号室</h1>
          <img class="property-photo" src="https://img.portal.example/203.jpg">
          <div class="property-rent">8.3万円</div>
          <div class="property-floor-plan">1LDK</div>
          <div class="property-area">25.5㎡</div>
          <div class="property-station">山手線「目黒」駅 徒歩5分</div>
          <div class="property-address">東京都品川区上大崎2丁目</div>
          <div class="property-age">築10年</div>
          <div class="property-floor">2階</div>
        </body></html>
    "#;

    #[test]
    fn test_full_detail_page_extraction() {
        let outcome = extractor().parse_detail(
            &source_ref(),
            "https://portal.example/chintai/abc/",
            DETAIL_BODY,
        );

        let ExtractOutcome::Listing(draft) = outcome else {
            panic!("expected a listing");
        };
        assert_eq!(draft.title, "サニーハイツ目黒 203号室");
        assert_eq!(draft.rent_yen, Some(83_000));
        assert_eq!(draft.floor_plan.as_deref(), Some("1LDK"));
        assert_eq!(draft.floor_area_sqm, Some(25.5));
        assert_eq!(draft.walk_minutes, Some(5));
        assert_eq!(
            draft.nearest_station.as_deref(),
            Some("山手線「目黒」駅 徒歩5分")
        );
        assert_eq!(draft.building_age_years, Some(10));
        assert_eq!(
            draft.thumbnail_url.as_deref(),
            Some("https://img.portal.example/203.jpg")
        );
    }

    #[test]
    fn test_missing_title_is_a_parse_error() {
        let body = r#"<html><body><div class="property-rent">8万円</div></body></html>"#;
        let outcome =
            extractor().parse_detail(&source_ref(), "https://portal.example/chintai/abc/", body);

        let ExtractOutcome::TransientOther(err) = outcome else {
            panic!("expected a transient parse error");
        };
        assert!(err.to_string().starts_with("parse: "));
    }

    #[test]
    fn test_missing_optional_fields_are_none() {
        let body = r#"<html><body><h1 class="property-title">ワンルーム</h1></body></html>"#;
        let outcome =
            extractor().parse_detail(&source_ref(), "https://portal.example/chintai/abc/", body);

        let ExtractOutcome::Listing(draft) = outcome else {
            panic!("expected a listing");
        };
        assert_eq!(draft.rent_yen, None);
        assert_eq!(draft.walk_minutes, None);
        assert_eq!(draft.address, None);
    }

    #[test]
    fn test_index_candidates_use_the_template() {
        let token = "0f".repeat(24);
        let body = format!(r#"<a href="/chintai/{token}/">listing</a>"#);
        let candidates = extractor().parse_index(&body);

        assert_eq!(candidates.len(), 1);
        assert_eq!(
            candidates[0].detail_url,
            format!("https://portal.example/chintai/{token}/")
        );
        assert_eq!(candidates[0].source_ref.source, "portal");
        assert_eq!(candidates[0].source_ref.source_property_id, token);
    }

    #[test]
    fn test_bad_template_rejected() {
        let err = PortalExtractor::new(
            PortalClient::new(PortalClientConfig::default()).unwrap(),
            PortalSource::new("portal", "https://portal.example/chintai/"),
            &SelectorConfig::default(),
        );
        assert!(matches!(err, Err(ExtractorError::BadTemplate(_))));
    }
}
