//! Runtime configuration
//!
//! Values come from defaults, a JSON file, or the environment. Every field
//! has a default, so a partial JSON file is valid.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Default intake base URL (local agent exposing the EVP proxy)
pub const DEFAULT_INTAKE_URL: &str = "http://localhost:8126";

/// Configuration for the instrumentation and the exporter
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false no plugin subscribes and every channel stays idle
    pub enabled: bool,
    /// Base URL of the collector (scheme, host, port)
    pub intake_url: String,
    /// API key sent as a request header, never in the payload
    pub api_key: Option<String>,
    /// Deployment environment tag (e.g. "ci")
    pub env: Option<String>,
    /// Service name attached to every event
    pub service: String,
    /// Periodic flush interval in milliseconds
    pub flush_interval_ms: u64,
    /// Buffered span count that triggers an early flush
    pub max_batch_spans: usize,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            intake_url: DEFAULT_INTAKE_URL.to_string(),
            api_key: None,
            env: None,
            service: "civis-tests".to_string(),
            flush_interval_ms: 2000,
            max_batch_spans: 1000,
            request_timeout_ms: 15_000,
        }
    }
}

impl Config {
    /// Build a config from process environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source
    ///
    /// Unset or unparsable values keep their defaults.
    pub fn from_vars(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = get("CIVIS_ENABLED") {
            config.enabled = !matches!(enabled.trim(), "0" | "false" | "FALSE" | "False");
        }
        if let Some(url) = get("DD_TRACE_AGENT_URL").filter(|v| !v.is_empty()) {
            config.intake_url = url;
        }
        config.api_key = get("DD_API_KEY")
            .or_else(|| get("DATADOG_API_KEY"))
            .filter(|v| !v.is_empty());
        config.env = get("DD_ENV").filter(|v| !v.is_empty());
        if let Some(service) = get("DD_SERVICE").filter(|v| !v.is_empty()) {
            config.service = service;
        }
        if let Some(ms) = get("CIVIS_FLUSH_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            config.flush_interval_ms = ms;
        }
        if let Some(n) = get("CIVIS_MAX_BATCH_SPANS").and_then(|v| v.parse().ok()) {
            config.max_batch_spans = n;
        }
        config
    }

    /// Load a config from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the writer cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.intake_url.starts_with("http://") || self.intake_url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "intake_url must be http(s): {}",
                self.intake_url
            )));
        }
        if self.max_batch_spans == 0 {
            return Err(ConfigError::Invalid("max_batch_spans must be > 0".to_string()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("flush_interval_ms must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
