//! Gatehouse configuration loaded from `gatehouse.toml`.
//!
//! [`GatehouseConfig`] holds the activity policies for each pipeline and the
//! optional text-generation settings. Keys missing from the file fall back to
//! defaults. `ANTHROPIC_API_KEY` takes precedence over the file's `api_key`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::activity::{ActivityOptions, Backoff, RetryPolicy};
use crate::error::Result;

pub const DEFAULT_CONFIG_FILE: &str = "gatehouse.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatehouseConfig {
    #[serde(default)]
    pub api_key: String,

    /// Model used when text generation is enabled.
    #[serde(default = "default_model")]
    pub model: String,

    /// Route stage narratives through the text generator.
    #[serde(default)]
    pub text_generation: bool,

    #[serde(default = "ActivityPolicy::blocks")]
    pub blocks: ActivityPolicy,

    #[serde(default)]
    pub migration: MigrationPolicy,

    #[serde(default = "ActivityPolicy::bootstrap")]
    pub bootstrap: ActivityPolicy,
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

/// Timeout and retry settings for one family of activities.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActivityPolicy {
    pub timeout_secs: u64,
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
}

fn default_interval_ms() -> u64 {
    1000
}

impl ActivityPolicy {
    fn blocks() -> Self {
        Self {
            timeout_secs: 30,
            max_attempts: 2,
            initial_interval_ms: default_interval_ms(),
            backoff: Backoff::Fixed,
        }
    }

    fn bootstrap() -> Self {
        Self {
            timeout_secs: 20,
            max_attempts: 2,
            initial_interval_ms: default_interval_ms(),
            backoff: Backoff::Fixed,
        }
    }

    pub fn options(&self) -> ActivityOptions {
        ActivityOptions::new(
            Duration::from_secs(self.timeout_secs.max(1)),
            RetryPolicy::new(self.max_attempts, self.initial_interval_ms, self.backoff),
        )
    }
}

/// Migration uses one policy for pipeline-critical phases and a shorter
/// timeout for per-record work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MigrationPolicy {
    #[serde(default = "default_migration_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_record_timeout")]
    pub record_timeout_secs: u64,
    #[serde(default = "default_migration_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default)]
    pub backoff: Backoff,
    /// Records in flight at once during transform and load.
    #[serde(default = "default_record_concurrency")]
    pub record_concurrency: usize,
}

fn default_migration_timeout() -> u64 {
    30
}

fn default_record_timeout() -> u64 {
    10
}

fn default_migration_attempts() -> u32 {
    3
}

fn default_record_concurrency() -> usize {
    4
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self {
            timeout_secs: default_migration_timeout(),
            record_timeout_secs: default_record_timeout(),
            max_attempts: default_migration_attempts(),
            initial_interval_ms: default_interval_ms(),
            backoff: Backoff::Fixed,
            record_concurrency: default_record_concurrency(),
        }
    }
}

impl MigrationPolicy {
    fn retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.initial_interval_ms, self.backoff)
    }

    /// Extract, validate and report persistence.
    pub fn phase_options(&self) -> ActivityOptions {
        ActivityOptions::new(Duration::from_secs(self.timeout_secs.max(1)), self.retry())
    }

    /// One record's transform or load.
    pub fn record_options(&self) -> ActivityOptions {
        ActivityOptions::new(
            Duration::from_secs(self.record_timeout_secs.max(1)),
            self.retry(),
        )
    }
}

impl Default for GatehouseConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            text_generation: false,
            blocks: ActivityPolicy::blocks(),
            migration: MigrationPolicy::default(),
            bootstrap: ActivityPolicy::bootstrap(),
        }
    }
}

impl GatehouseConfig {
    /// Load `gatehouse.toml` from the working directory, or defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load from an explicit path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<GatehouseConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }
}
