//! File + environment configuration.
//!
//! Every recognized option has an operational default; a config file only
//! overrides what it names. Validation runs once at startup and refuses to
//! start on any inconsistency instead of silently degrading.

use chrono::NaiveTime;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use sumika_extract::{PortalClientConfig, PortalSource};
use sumika_store::RetryPolicy;
use sumika_worker::{HealthcheckConfig, SchedulerConfig, WorkerConfig};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("config error: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub bind: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// "postgres" or "memory". The memory backend loses state on restart
    /// and exists for local development.
    pub backend: String,
    pub url: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            backend: "postgres".to_string(),
            url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub name: String,
    pub detail_url_template: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            name: "portal".to_string(),
            detail_url_template: "https://portal.example/chintai/{id}/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateSettings {
    pub per_hour_limit: usize,
    pub human_pace_min_sec: u64,
    pub human_pace_max_sec: u64,
    pub cooldown_on_hostile_sec: u64,
}

impl Default for RateSettings {
    fn default() -> Self {
        Self {
            per_hour_limit: 5,
            human_pace_min_sec: 45,
            human_pace_max_sec: 120,
            cooldown_on_hostile_sec: 3600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub poll_interval_sec: u64,
    pub max_attempts: u32,
    pub retry_backoff_sec: Vec<u64>,
    pub preventive_pause_every_n_success: u32,
    pub preventive_pause_duration_sec: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_sec: 30,
            max_attempts: 5,
            retry_backoff_sec: vec![300, 900, 3600, 14_400, 43_200],
            preventive_pause_every_n_success: 3,
            preventive_pause_duration_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthcheckSettings {
    pub url: String,
    pub cooldowns_on_fail_sec: Vec<u64>,
}

impl Default for HealthcheckSettings {
    fn default() -> Self {
        Self {
            url: "https://portal.example/chintai/".to_string(),
            cooldowns_on_fail_sec: vec![14_400, 14_400, 43_200],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub daily_run_enabled: bool,
    /// Local time, HH:MM.
    pub daily_run_time: String,
    pub index_urls: Vec<String>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            daily_run_enabled: false,
            daily_run_time: "03:30".to_string(),
            index_urls: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractSettings {
    pub timeout_sec: u64,
    pub user_agent: Option<String>,
    pub hostile_markers: Option<Vec<String>>,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            timeout_sec: 30,
            user_agent: None,
            hostile_markers: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub http: HttpSettings,
    pub database: DatabaseSettings,
    pub source: SourceSettings,
    pub rate: RateSettings,
    pub worker: WorkerSettings,
    pub healthcheck: HealthcheckSettings,
    pub scheduler: SchedulerSettings,
    pub extract: ExtractSettings,
}

impl Settings {
    /// Loads the file at `path` (or `SUMIKA_CONFIG`, or defaults when
    /// neither names a file), then applies environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("SUMIKA_CONFIG").ok());

        let mut settings = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(Path::new(&path)).map_err(|source| {
                    ConfigError::Read {
                        path: path.clone(),
                        source,
                    }
                })?;
                toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?
            }
            None => Settings::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            settings.database.url = Some(url);
        }
        if let Ok(bind) = std::env::var("SUMIKA_BIND") {
            settings.http.bind = bind;
        }
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate.per_hour_limit == 0 {
            return Err(ConfigError::Invalid(
                "rate.per_hour_limit must be at least 1".to_string(),
            ));
        }
        if self.rate.human_pace_min_sec > self.rate.human_pace_max_sec {
            return Err(ConfigError::Invalid(format!(
                "rate.human_pace_min_sec ({}) exceeds rate.human_pace_max_sec ({})",
                self.rate.human_pace_min_sec, self.rate.human_pace_max_sec
            )));
        }

        self.retry_policy()
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        match self.database.backend.as_str() {
            "memory" => {}
            "postgres" => {
                if self.database.url.is_none() {
                    return Err(ConfigError::Invalid(
                        "database.url (or DATABASE_URL) is required for the postgres backend"
                            .to_string(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown database.backend: {other}"
                )));
            }
        }

        if !self.source.detail_url_template.contains("{id}") {
            return Err(ConfigError::Invalid(
                "source.detail_url_template must contain an {id} placeholder".to_string(),
            ));
        }
        if self.healthcheck.url.is_empty() {
            return Err(ConfigError::Invalid(
                "healthcheck.url must be configured".to_string(),
            ));
        }

        if self.scheduler.daily_run_enabled {
            self.daily_run_time()?;
            if self.scheduler.index_urls.is_empty() {
                return Err(ConfigError::Invalid(
                    "scheduler.daily_run_enabled is set but scheduler.index_urls is empty"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn daily_run_time(&self) -> Result<NaiveTime, ConfigError> {
        NaiveTime::parse_from_str(&self.scheduler.daily_run_time, "%H:%M").map_err(|_| {
            ConfigError::Invalid(format!(
                "scheduler.daily_run_time must be HH:MM, got {:?}",
                self.scheduler.daily_run_time
            ))
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.worker.max_attempts,
            self.worker
                .retry_backoff_sec
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect(),
        )
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            poll_interval: Duration::from_secs(self.worker.poll_interval_sec),
            retry_policy: self.retry_policy(),
            preventive_pause_every: self.worker.preventive_pause_every_n_success,
            preventive_pause: Duration::from_secs(self.worker.preventive_pause_duration_sec),
            ..WorkerConfig::default()
        }
    }

    pub fn healthcheck_config(&self) -> HealthcheckConfig {
        HealthcheckConfig {
            url: self.healthcheck.url.clone(),
            cooldowns_on_fail: self
                .healthcheck
                .cooldowns_on_fail_sec
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect(),
            ..HealthcheckConfig::default()
        }
    }

    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        Ok(SchedulerConfig {
            enabled: self.scheduler.daily_run_enabled,
            daily_run_time: self.daily_run_time()?,
            index_urls: self.scheduler.index_urls.clone(),
        })
    }

    pub fn portal_source(&self) -> PortalSource {
        PortalSource::new(&self.source.name, &self.source.detail_url_template)
    }

    pub fn portal_client_config(&self) -> PortalClientConfig {
        let defaults = PortalClientConfig::default();
        PortalClientConfig {
            timeout: Duration::from_secs(self.extract.timeout_sec),
            user_agent: self
                .extract
                .user_agent
                .clone()
                .unwrap_or(defaults.user_agent),
            hostile_markers: self
                .extract
                .hostile_markers
                .clone()
                .unwrap_or(defaults.hostile_markers),
        }
    }
}
