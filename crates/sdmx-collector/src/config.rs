//! Collector configuration

use crate::error::{CollectorError, Result};
use crate::fetcher::FetchConfig;
use crate::orchestrator::OrchestratorOptions;
use sdmx_common::checksum::ChecksumMode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default poll interval: once a day.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Default timeout of one HTTP request to a source.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default number of sources polled concurrently.
pub const DEFAULT_MAX_CONCURRENT_SOURCES: usize = 1;

/// Default loader chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Collector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub max_concurrent_sources: usize,
    pub chunk_size: usize,
    /// Sort records before checksumming
    pub canonical_checksum: bool,
    /// JSON registry file; in-memory registry when unset
    pub registry_path: Option<PathBuf>,
    /// Message bus endpoint; log-only channel when unset
    pub bus_url: Option<String>,
    pub user_agent: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_concurrent_sources: DEFAULT_MAX_CONCURRENT_SOURCES,
            chunk_size: DEFAULT_CHUNK_SIZE,
            canonical_checksum: false,
            registry_path: None,
            bus_url: None,
            user_agent: FetchConfig::default().user_agent,
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

impl CollectorConfig {
    /// Load configuration from `COLLECTOR_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let config = Self {
            poll_interval_secs: parsed(&lookup, "COLLECTOR_POLL_INTERVAL_SECS", defaults.poll_interval_secs),
            request_timeout_secs: parsed(
                &lookup,
                "COLLECTOR_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout_secs,
            ),
            max_concurrent_sources: parsed(
                &lookup,
                "COLLECTOR_MAX_CONCURRENT_SOURCES",
                defaults.max_concurrent_sources,
            ),
            chunk_size: parsed(&lookup, "COLLECTOR_CHUNK_SIZE", defaults.chunk_size),
            canonical_checksum: parsed(&lookup, "COLLECTOR_CANONICAL_CHECKSUM", defaults.canonical_checksum),
            registry_path: lookup("COLLECTOR_REGISTRY_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            bus_url: lookup("COLLECTOR_BUS_URL").filter(|s| !s.trim().is_empty()),
            user_agent: lookup("COLLECTOR_USER_AGENT").unwrap_or(defaults.user_agent),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(CollectorError::Config("poll interval must be greater than 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(CollectorError::Config("request timeout must be greater than 0".into()));
        }
        if self.max_concurrent_sources == 0 {
            return Err(CollectorError::Config(
                "max concurrent sources must be greater than 0".into(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(CollectorError::Config("chunk size must be greater than 0".into()));
        }
        if let Some(url) = &self.bus_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(CollectorError::Config(format!("bus url must be http(s): {url}")));
            }
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            timeout: Duration::from_secs(self.request_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            chunk_size: self.chunk_size,
            max_concurrent_sources: self.max_concurrent_sources,
            checksum_mode: if self.canonical_checksum {
                ChecksumMode::Canonical
            } else {
                ChecksumMode::Ordered
            },
        }
    }
}
