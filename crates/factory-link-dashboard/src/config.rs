//! Config file for the `factory-link` binary.
//!
//! ```toml
//! [telemetry]
//! url = "http://localhost:8080"
//! topics = ["getPower", "getFactory"]
//! poll_interval_ms = 10000
//!
//! [control]
//! url = "http://localhost:8081"
//! token = "..."
//!
//! [backoff]
//! base_ms = 1000
//! cap_ms = 30000
//! max_attempts = 10
//! ```
//!
//! Every key is optional. Command-line flags and environment variables are
//! applied on top by the binary.

use crate::error::ConfigError;
use factory_link_client::{BackoffPolicy, ControlConfig, REQUEST_TIMEOUT, TelemetryConfig};
use factory_link_core::Topic;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telemetry: TelemetrySection,
    pub control: ControlSection,
    pub backoff: BackoffSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetrySection {
    pub url: String,
    /// Topics `watch` subscribes to when none are given on the command line.
    pub topics: Vec<Topic>,
    pub poll_interval_ms: Option<u64>,
    pub request_timeout_ms: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            topics: Vec::new(),
            poll_interval_ms: None,
            request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlSection {
    pub url: String,
    pub token: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            token: None,
            request_timeout_ms: REQUEST_TIMEOUT.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffSection {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_attempts: u32,
}

impl Default for BackoffSection {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            base_ms: policy.base.as_millis() as u64,
            cap_ms: policy.cap.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::default()
            .with_base(Duration::from_millis(self.backoff.base_ms))
            .with_cap(Duration::from_millis(self.backoff.cap_ms))
            .with_max_attempts(self.backoff.max_attempts)
    }

    pub fn telemetry_config(&self) -> TelemetryConfig {
        let mut config = TelemetryConfig::new(self.telemetry.url.clone())
            .with_request_timeout(Duration::from_millis(self.telemetry.request_timeout_ms))
            .with_backoff(self.backoff_policy());
        if let Some(ms) = self.telemetry.poll_interval_ms {
            config = config.with_poll_interval(Duration::from_millis(ms));
        }
        config
    }

    /// `None` without a token: the control endpoint is unusable.
    pub fn control_config(&self) -> Option<ControlConfig> {
        let token = self.control.token.as_deref().filter(|t| !t.is_empty())?;
        Some(
            ControlConfig::new(self.control.url.clone(), token)
                .with_request_timeout(Duration::from_millis(self.control.request_timeout_ms))
                .with_backoff(self.backoff_policy()),
        )
    }
}
