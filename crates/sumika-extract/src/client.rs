//! Portal HTTP client with response classification.

use std::time::Duration;
use sumika_core::outcome::FetchError;
use thiserror::Error;

/// Result of one classified fetch.
#[derive(Debug)]
pub enum FetchOutcome {
    /// 2xx with a body that shows no anti-bot markers.
    Body(String),
    /// Definitive "does not exist": 404 or 410 after following redirects.
    PermanentMissing,
    /// Anti-bot signal: 403, 429, or a challenge interstitial body.
    Hostile,
    /// Timeout, connection failure, or 5xx.
    Transient(FetchError),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to construct http client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Configuration for [`PortalClient`].
#[derive(Debug, Clone)]
pub struct PortalClientConfig {
    /// Per-request timeout. On expiry the fetch classifies as transient.
    pub timeout: Duration,
    pub user_agent: String,
    /// Operator-chosen substrings that mark a challenge interstitial.
    /// Matched case-insensitively against 2xx bodies.
    pub hostile_markers: Vec<String>,
}

impl Default for PortalClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36"
                .to_string(),
            hostile_markers: vec![
                "captcha".to_string(),
                "access denied".to_string(),
                "アクセスが集中".to_string(),
                "自動的なアクセス".to_string(),
                "認証にご協力ください".to_string(),
            ],
        }
    }
}

/// Thin reqwest wrapper; follows redirects, never retries on its own.
pub struct PortalClient {
    http: reqwest::Client,
    timeout: Duration,
    hostile_markers: Vec<String>,
}

impl PortalClient {
    pub fn new(config: PortalClientConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            http,
            timeout: config.timeout,
            hostile_markers: config
                .hostile_markers
                .into_iter()
                .map(|m| m.to_lowercase())
                .collect(),
        })
    }

    /// Performs one GET and classifies the response. The caller must hold a
    /// rate-gate admission before calling this.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return FetchOutcome::Transient(FetchError::Timeout(self.timeout));
            }
            Err(e) => {
                return FetchOutcome::Transient(FetchError::Connect(e.to_string()));
            }
        };

        let status = response.status().as_u16();
        match status {
            403 | 429 => {
                tracing::warn!(url, status, "origin rejected fetch");
                FetchOutcome::Hostile
            }
            404 | 410 => FetchOutcome::PermanentMissing,
            500..=599 => FetchOutcome::Transient(FetchError::Status(status)),
            200..=299 => match response.text().await {
                Ok(body) if self.looks_hostile(&body) => {
                    tracing::warn!(url, "challenge interstitial detected in body");
                    FetchOutcome::Hostile
                }
                Ok(body) => FetchOutcome::Body(body),
                Err(e) => FetchOutcome::Transient(FetchError::Connect(e.to_string())),
            },
            other => FetchOutcome::Transient(FetchError::Status(other)),
        }
    }

    fn looks_hostile(&self, body: &str) -> bool {
        let lowered = body.to_lowercase();
        self.hostile_markers
            .iter()
            .any(|marker| lowered.contains(marker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostile_marker_match_is_case_insensitive() {
        let client = PortalClient::new(PortalClientConfig::default()).unwrap();
        assert!(client.looks_hostile("<html>Please solve this CAPTCHA</html>"));
        assert!(client.looks_hostile("<p>アクセスが集中しています</p>"));
        assert!(!client.looks_hostile("<html>1LDK 徒歩5分</html>"));
    }
}
