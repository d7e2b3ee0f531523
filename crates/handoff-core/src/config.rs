//! Configuration loaded from `handoff.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `HANDOFF_AGENT_API_KEY` and `HANDOFF_AGENT_BASE_URL` take precedence over the file.
//! The value is built once at startup and handed to each component; nothing reads it globally.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::retry::RetryPolicy;

pub const API_KEY_ENV: &str = "HANDOFF_AGENT_API_KEY";
pub const BASE_URL_ENV: &str = "HANDOFF_AGENT_BASE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub reclaimer: ReclaimerConfig,
    #[serde(default)]
    pub projector: ProjectorConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Outbound agent call and its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub base_url: String,
    pub api_key: String,
    /// Bound on one physical attempt.
    pub request_timeout_ms: u64,
    /// Additional attempts after the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Exhausted dispatch calls allowed before a record becomes `agent_failed`.
    pub max_dispatch_failures: u32,
    /// Concurrent fire-and-forget dispatches.
    pub worker_pool_size: usize,
    /// Fire-and-forget dispatches admitted at once (running + waiting for a worker).
    /// Beyond this, the record is left `uploaded` for the reclaimer.
    pub max_pending_dispatches: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: String::new(),
            request_timeout_ms: 30_000,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            max_dispatch_failures: 3,
            worker_pool_size: 16,
            max_pending_dispatches: 256,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReclaimerConfig {
    pub tick_interval_ms: u64,
    /// Minimum record age before it may be reclaimed.
    pub grace_window_ms: u64,
    pub batch_size: usize,
    /// Pause between two dispatches of the same batch.
    pub pacing_delay_ms: u64,
}

impl Default for ReclaimerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10_000,
            grace_window_ms: 30_000,
            batch_size: 10,
            pacing_delay_ms: 2_000,
        }
    }
}

impl ReclaimerConfig {
    /// Never zero: `tokio::time::interval` panics on a zero period.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub poll_interval_ms: u64,
    /// Events buffered per subscriber before the poller waits.
    pub channel_capacity: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            channel_capacity: 8,
        }
    }
}

impl ProjectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub bucket: String,
    pub max_payload_bytes: usize,
    pub max_page_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bucket: "voicebridge".to_string(),
            max_payload_bytes: 5 * 1024 * 1024,
            max_page_size: 100,
        }
    }
}

impl Config {
    /// Parse a TOML document; absent keys fall back to defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists (defaults otherwise), then apply env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<Config>(&contents)?
        } else {
            Self::default()
        };

        if let Some(key) = env_override(API_KEY_ENV) {
            config.agent.api_key = key;
        }
        if let Some(url) = env_override(BASE_URL_ENV) {
            config.agent.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();
        if self.agent.worker_pool_size == 0 {
            problems.push("agent.worker_pool_size must be > 0");
        }
        if self.agent.max_pending_dispatches < self.agent.worker_pool_size {
            problems.push("agent.max_pending_dispatches must be >= agent.worker_pool_size");
        }
        if self.agent.max_dispatch_failures == 0 {
            problems.push("agent.max_dispatch_failures must be > 0");
        }
        if self.agent.backoff_multiplier < 1.0 {
            problems.push("agent.backoff_multiplier must be >= 1.0");
        }
        if self.reclaimer.batch_size == 0 {
            problems.push("reclaimer.batch_size must be > 0");
        }
        if self.reclaimer.tick_interval_ms == 0 {
            problems.push("reclaimer.tick_interval_ms must be > 0");
        }
        if self.projector.poll_interval_ms == 0 {
            problems.push("projector.poll_interval_ms must be > 0");
        }
        if self.projector.channel_capacity == 0 {
            problems.push("projector.channel_capacity must be > 0");
        }
        if self.upload.max_page_size == 0 {
            problems.push("upload.max_page_size must be > 0");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems.join(", ")))
        }
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
