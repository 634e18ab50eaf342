//! Archived switch configurations, addressed by URL.
//!
//! Supported locators are `gs://bucket/object` (Google Cloud Storage) and
//! `file:///path`. Whether the object exists isn't known until `get()` is
//! called; only the shape of the locator is checked when opening it.

use crate::ArchiveSource;
use crate::gcs::{GcsClient, GcsOptions};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("invalid archive URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid archive locator: {0}")]
    InvalidLocator(String),

    #[error("archived config not found: {0}")]
    NotFound(String),

    #[error("archive transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    /// Whether the error was raised while opening a locator rather than
    /// while reading from it.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            ArchiveError::InvalidUrl(_)
                | ArchiveError::UnsupportedScheme(_)
                | ArchiveError::InvalidLocator(_)
        )
    }
}

/// Opens archive sources from locator URLs, sharing one GCS client.
#[derive(Clone)]
pub struct Archives {
    gcs: Arc<GcsClient>,
}

impl Archives {
    pub fn new(options: GcsOptions) -> Self {
        Archives {
            gcs: Arc::new(GcsClient::new(options)),
        }
    }

    pub fn open(&self, locator: &str) -> Result<Arc<dyn ArchiveSource>, ArchiveError> {
        let url = Url::parse(locator)?;

        match url.scheme() {
            "gs" => {
                let bucket = url
                    .host_str()
                    .filter(|bucket| !bucket.is_empty())
                    .ok_or_else(|| ArchiveError::InvalidLocator(format!("{url}: missing bucket")))?;
                let object = url.path().trim_start_matches('/');
                if object.is_empty() {
                    return Err(ArchiveError::InvalidLocator(format!(
                        "{url}: missing object path"
                    )));
                }

                Ok(Arc::new(GcsArchive {
                    client: self.gcs.clone(),
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                }))
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| ArchiveError::InvalidLocator(format!("{url}: invalid path")))?;
                Ok(Arc::new(FileArchive { path }))
            }
            other => Err(ArchiveError::UnsupportedScheme(other.to_string())),
        }
    }
}

pub struct GcsArchive {
    client: Arc<GcsClient>,
    bucket: String,
    object: String,
}

#[async_trait]
impl ArchiveSource for GcsArchive {
    async fn get(&self) -> Result<Bytes, ArchiveError> {
        self.client.read_object(&self.bucket, &self.object).await
    }
}

pub struct FileArchive {
    path: PathBuf,
}

#[async_trait]
impl ArchiveSource for FileArchive {
    async fn get(&self) -> Result<Bytes, ArchiveError> {
        match tokio::fs::read(&self.path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ArchiveError::NotFound(self.path.display().to_string()))
            }
            Err(e) => Err(ArchiveError::Io(e)),
        }
    }
}
