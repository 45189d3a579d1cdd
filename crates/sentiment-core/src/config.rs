//! Analyser configuration.
//!
//! Configuration is an explicit struct handed to the worker at construction;
//! nothing reads ambient globals after startup. Durations are milliseconds.
//!
//! Load order: JSON document (or defaults) -> `.env` / process environment
//! overrides -> `validate()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{RetryStrategy, RetryStrategyError, Timeout};

pub const DEFAULT_ADDRESS: &str = "sentiment.analyser.worker";
pub const DEFAULT_SERVICE_NAME: &str = "news-analyser";

pub const ENV_API_KEY: &str = "SENTIMENT_API_KEY";
pub const ENV_BASE_URL: &str = "SENTIMENT_BASE_URL";
pub const ENV_URL_PATH: &str = "SENTIMENT_URL_PATH";
pub const ENV_PORT: &str = "SENTIMENT_PORT";
pub const ENV_INSTANCES: &str = "SENTIMENT_INSTANCES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: `{value}`")]
    InvalidEnv { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid retry_strategy: {0}")]
    RetryStrategy(#[from] RetryStrategyError),
}

/// Everything the analyser worker needs to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    /// Subscription key sent as `Ocp-Apim-Subscription-Key`.
    #[serde(alias = "key")]
    pub api_key: String,

    /// Host name, or a full URL (`http://127.0.0.1:8080`).
    #[serde(alias = "base.url")]
    pub base_url: String,

    #[serde(alias = "url.path")]
    pub url_path: String,

    pub port: u16,
    pub tls: bool,
    pub language: String,

    /// Bound on a single HTTP exchange, independent of the job budget.
    pub request_timeout: Timeout,

    /// Default job timeout for jobs created from this config.
    pub timeout: Timeout,

    pub retry_strategy: RetryStrategy,

    /// Conservative estimate of one more external round-trip, used to deny
    /// retries that cannot finish inside the job budget.
    pub round_trip_estimate: Timeout,

    pub address: String,
    pub service_name: String,

    #[serde(alias = "worker.instances")]
    pub instances: usize,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: String::new(),
            url_path: "/text/analytics/v2.0/sentiment".to_string(),
            port: 443,
            tls: true,
            language: "en".to_string(),
            request_timeout: Timeout::from_millis(10_000),
            timeout: Timeout::from_millis(30_000),
            retry_strategy: RetryStrategy::default(),
            round_trip_estimate: Timeout::from_millis(1_000),
            address: DEFAULT_ADDRESS.to_string(),
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            instances: 4,
        }
    }
}

impl AnalyserConfig {
    /// Parse a JSON document. Keys nested under an `"api"` object are lifted
    /// to the top level, so deployment files shaped as
    /// `{"api": {"key": .., "base.url": ..}, "worker.instances": 2}` load as-is.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let mut value: serde_json::Value = serde_json::from_str(raw)?;
        if let Some(obj) = value.as_object_mut()
            && let Some(serde_json::Value::Object(api)) = obj.remove("api")
        {
            obj.extend(api);
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Load from `path` (or defaults), apply `.env` and environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // A missing .env file is fine.
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_API_KEY) {
            self.api_key = v;
        }
        if let Some(v) = lookup(ENV_BASE_URL) {
            self.base_url = v;
        }
        if let Some(v) = lookup(ENV_URL_PATH) {
            self.url_path = v;
        }
        if let Some(v) = lookup(ENV_PORT) {
            self.port = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_PORT,
                value: v,
            })?;
        }
        if let Some(v) = lookup(ENV_INSTANCES) {
            self.instances = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: ENV_INSTANCES,
                value: v,
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if !self.url_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "url_path must start with '/': `{}`",
                self.url_path
            )));
        }
        if self.instances == 0 {
            return Err(ConfigError::Invalid("instances must be at least 1".into()));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::Invalid("address must not be empty".into()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be positive".into()));
        }
        self.retry_strategy.validate()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout.as_duration()
    }

    pub fn round_trip_estimate(&self) -> Duration {
        self.round_trip_estimate.as_duration()
    }
}
