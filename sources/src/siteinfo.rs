//! Switch inventory from the siteinfo service.

use serde_json::Value;
use std::collections::BTreeMap;
use url::Url;

const BASE_URL_FORMAT: &str = "https://siteinfo.{project}.measurementlab.net/v1/";
const SWITCHES_PATH: &str = "sites/switches.json";

#[derive(thiserror::Error, Debug)]
pub enum SiteinfoError {
    #[error("invalid siteinfo URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("cannot fetch the switch list: {0}")]
    Request(#[from] reqwest::Error),

    #[error("the retrieved switches list is empty")]
    Empty,
}

pub struct Siteinfo {
    http: reqwest::Client,
    base_url: String,
}

impl Siteinfo {
    pub fn new(project: &str) -> Self {
        Self::with_base_url(BASE_URL_FORMAT.replace("{project}", project))
    }

    /// `base_url` must end with a slash, like the production `/v1/` root.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Siteinfo {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Site names with a switch, sorted.
    pub async fn sites(&self) -> Result<Vec<String>, SiteinfoError> {
        let url = Url::parse(&self.base_url)?.join(SWITCHES_PATH)?;
        tracing::debug!(%url, "Fetching switch inventory");

        let switches: BTreeMap<String, Value> = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if switches.is_empty() {
            return Err(SiteinfoError::Empty);
        }
        Ok(switches.into_keys().collect())
    }

    /// Switch hostnames, one per site, sorted.
    pub async fn switches(&self) -> Result<Vec<String>, SiteinfoError> {
        let sites = self.sites().await?;
        Ok(sites
            .iter()
            .map(|site| format!("s1.{site}.measurement-lab.org"))
            .collect())
    }
}
