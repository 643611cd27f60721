//! Configuration management for the CRPT client.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CrptError, Result};

/// Main configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Registration endpoint settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Throughput limits
    #[serde(default)]
    pub throttle: ThrottleConfig,
}

/// Registration endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Scheme and host of the API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the document creation endpoint
    #[serde(default = "default_create_path")]
    pub create_path: String,

    /// `document_format` sent with every document
    #[serde(default = "default_document_format")]
    pub document_format: String,

    /// `type` sent with every document
    #[serde(default = "default_document_type")]
    pub document_type: String,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            create_path: default_create_path(),
            document_format: default_document_format(),
            document_type: default_document_type(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ApiConfig {
    /// Full URL of the document creation endpoint.
    pub fn create_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.create_path
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://ismp.crpt.ru".to_string()
}

fn default_create_path() -> String {
    "/api/v3/lk/documents/create".to_string()
}

fn default_document_format() -> String {
    "MANUAL".to_string()
}

fn default_document_type() -> String {
    "LP_INTRODUCE_GOODS".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

/// Throughput limits for outbound submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Maximum submissions per window
    #[serde(default = "default_request_limit")]
    pub request_limit: usize,

    /// Window length: one unit of time
    #[serde(default)]
    pub time_unit: TimeUnit,

    /// How long close waits for release timers, in seconds
    #[serde(default = "default_close_grace")]
    pub close_grace_secs: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            request_limit: default_request_limit(),
            time_unit: TimeUnit::default(),
            close_grace_secs: default_close_grace(),
        }
    }
}

impl ThrottleConfig {
    pub fn window(&self) -> Duration {
        self.time_unit.duration()
    }

    pub fn close_grace(&self) -> Duration {
        Duration::from_secs(self.close_grace_secs)
    }
}

fn default_request_limit() -> usize {
    10
}

fn default_close_grace() -> u64 {
    5
}

/// Unit of time used as the throttle window.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Millisecond,
    #[default]
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    /// Get the duration of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Millisecond => Duration::from_millis(1),
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
            TimeUnit::Day => Duration::from_secs(86400),
        }
    }
}

impl ClientConfig {
    /// Load configuration from an optional file, overridden by `CRPT_*`
    /// environment variables (`CRPT_THROTTLE__REQUEST_LIMIT=5`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CRPT")
                .prefix_separator("_")
                .separator("__"),
        );

        let config: ClientConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CrptError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClientConfig = serde_yaml::from_str(yaml)
            .map_err(|e| CrptError::Config(format!("Failed to parse client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.throttle.request_limit == 0 {
            return Err(CrptError::Config(
                "throttle.request_limit must be positive".to_string(),
            ));
        }
        if self.api.base_url.is_empty() {
            return Err(CrptError::Config("api.base_url is required".to_string()));
        }
        if !self.api.create_path.starts_with('/') {
            return Err(CrptError::Config(
                "api.create_path must start with '/'".to_string(),
            ));
        }
        Ok(())
    }
}
