//! Configuration sources consumed by the checker.
//!
//! Both sides of a config check are modeled as narrow capabilities so the
//! checker can be exercised with fixtures:
//! - [`ArchiveSource`]: the archived, expected configuration of one site.
//! - [`SwitchConfigSource`]: the live configuration of a switch, by hostname.

pub mod archive;
pub mod gcs;
pub mod netconf;
pub mod siteinfo;

use async_trait::async_trait;
use bytes::Bytes;

pub use archive::{ArchiveError, Archives};
pub use netconf::{NetconfClient, NetconfError};

/// Fetches the archived configuration this source was built for.
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    async fn get(&self) -> Result<Bytes, ArchiveError>;
}

/// Fetches the running configuration of a switch.
#[async_trait]
pub trait SwitchConfigSource: Send + Sync {
    async fn get_config(&self, hostname: &str) -> Result<String, NetconfError>;
}
