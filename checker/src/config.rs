use serde::Deserialize;
use sources::gcs::GcsOptions;
use sources::netconf::NetconfOptions;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Archive URL template must contain {{site}}: {0}")]
    MissingSitePlaceholder(String),

    #[error("Cache capacity must be at least 1")]
    InvalidCacheCapacity,

    #[error("Cache TTL must be greater than 0")]
    InvalidCacheTtl,

    #[error("Fetch timeout must be greater than 0")]
    InvalidFetchTimeout,

    #[error("Project cannot be empty")]
    EmptyProject,
}

/// Checker configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving `/v1/check`
    pub listener: Listener,
    /// Admin listener for health and readiness checks
    pub admin_listener: Listener,
    /// GCP project the switch configs are archived in
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default)]
    pub archive: ArchiveConfig,
    pub netconf: NetconfOptions,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upper bound for each of the two fetches of a check
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_project() -> String {
    "mlab-sandbox".into()
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.project.is_empty() {
            return Err(ValidationError::EmptyProject);
        }
        self.archive.validate()?;
        self.cache.validate()?;

        if self.fetch_timeout_secs == 0 {
            return Err(ValidationError::InvalidFetchTimeout);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Where archived configs live
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ArchiveConfig {
    /// Locator of a site's archived config. `{project}` and `{site}` are
    /// substituted per request.
    #[serde(default = "default_url_template")]
    pub url_template: String,
    #[serde(default)]
    pub gcs: GcsOptions,
}

fn default_url_template() -> String {
    "gs://switch-config-{project}/configs/latest/{site}.conf".into()
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            gcs: GcsOptions::default(),
        }
    }
}

impl ArchiveConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.url_template.contains("{site}") {
            return Err(ValidationError::MissingSitePlaceholder(
                self.url_template.clone(),
            ));
        }
        Ok(())
    }
}

/// Response cache configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of cached responses. Keep it above the number of
    /// switches.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.capacity == 0 {
            return Err(ValidationError::InvalidCacheCapacity);
        }
        if self.ttl_secs == 0 {
            return Err(ValidationError::InvalidCacheTtl);
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}
