//! Runtime configuration for a crawl.
//!
//! Values come from three layers, later layers winning:
//! 1. [`CrawlConfig::default`]
//! 2. an optional YAML file (`--config archive.yaml`)
//! 3. command-line flags and their environment variables (see [`crate::cli`])
//!
//! ```yaml
//! archive_root: /srv/media/audio/pinchy
//! concurrency: 6
//! max_retries: 5
//! base_delay_ms: 500
//! ```

use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEFAULT_BASE_URL: &str = "http://pinchyandfriends.com";
pub const DEFAULT_USER_AGENT: &str = concat!("pinchy_archive/", env!("CARGO_PKG_VERSION"));

/// Everything the crawler needs to know, passed in explicitly.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Directory holding one subdirectory per archived mix.
    pub archive_root: PathBuf,
    /// Site root; also the catalog page.
    pub base_url: String,
    pub user_agent: String,
    /// Mixes processed at the same time.
    pub concurrency: usize,
    /// Retries after the first attempt.
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Per-request timeout, covering the whole body transfer.
    pub request_timeout_secs: u64,
    /// Upper bound for pages buffered in memory (catalog and detail pages).
    pub max_page_bytes: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("pinchy"),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            concurrency: 4,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            request_timeout_secs: 600,
            max_page_bytes: 8 * 1024 * 1024,
        }
    }
}

impl CrawlConfig {
    /// Load a YAML file on top of the defaults. Missing keys keep defaults.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CrawlConfig =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(?config, "Loaded configuration file");
        Ok(config)
    }

    /// Reject values that would make the crawler misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "base_url `{}` is not an absolute URL",
                self.base_url
            )));
        }
        Ok(())
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
