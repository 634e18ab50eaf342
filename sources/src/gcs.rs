//! Minimal Google Cloud Storage reader over the JSON API.

use crate::archive::ArchiveError;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::{Duration, Instant};
use url::Url;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";
const DEFAULT_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// Tokens are refreshed this long before the expiry reported by the metadata server.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Copy, Deserialize, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GcsAuth {
    /// Bearer tokens from the GCE metadata server.
    #[default]
    Metadata,
    /// No credentials; only public buckets are readable.
    Anonymous,
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct GcsOptions {
    #[serde(default = "default_endpoint")]
    pub endpoint: Url,
    #[serde(default)]
    pub auth: GcsAuth,
    #[serde(default = "default_metadata_url")]
    pub metadata_url: Url,
}

fn default_endpoint() -> Url {
    Url::parse(DEFAULT_ENDPOINT).expect("default GCS endpoint is a valid URL")
}

fn default_metadata_url() -> Url {
    Url::parse(DEFAULT_METADATA_URL).expect("default metadata URL is a valid URL")
}

impl Default for GcsOptions {
    fn default() -> Self {
        GcsOptions {
            endpoint: default_endpoint(),
            auth: GcsAuth::default(),
            metadata_url: default_metadata_url(),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

pub struct GcsClient {
    http: reqwest::Client,
    options: GcsOptions,
    token: Mutex<Option<CachedToken>>,
}

impl GcsClient {
    pub fn new(options: GcsOptions) -> Self {
        GcsClient {
            http: reqwest::Client::new(),
            options,
            token: Mutex::new(None),
        }
    }

    /// Downloads the full content of `bucket/object`.
    pub async fn read_object(&self, bucket: &str, object: &str) -> Result<Bytes, ArchiveError> {
        let mut url = self.options.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ArchiveError::InvalidLocator(format!(
                    "{}: endpoint cannot be a base",
                    self.options.endpoint
                ))
            })?
            .pop_if_empty()
            .extend(["storage", "v1", "b", bucket, "o", object]);
        url.query_pairs_mut().append_pair("alt", "media");

        let mut request = self.http.get(url);
        if let Some(token) = self.access_token().await? {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ArchiveError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ArchiveError::NotFound(format!("gs://{bucket}/{object}"))),
            status if !status.is_success() => Err(ArchiveError::Transport(format!(
                "unexpected status {status} reading gs://{bucket}/{object}"
            ))),
            _ => response
                .bytes()
                .await
                .map_err(|e| ArchiveError::Transport(e.to_string())),
        }
    }

    async fn access_token(&self) -> Result<Option<String>, ArchiveError> {
        if self.options.auth == GcsAuth::Anonymous {
            return Ok(None);
        }

        if let Some(token) = self.token.lock().as_ref()
            && token.refresh_at > Instant::now()
        {
            return Ok(Some(token.value.clone()));
        }

        let response = self
            .http
            .get(self.options.metadata_url.clone())
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ArchiveError::Transport(format!("cannot fetch access token: {e}")))?;

        let token = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| ArchiveError::Transport(format!("invalid access token response: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *self.token.lock() = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(Some(token.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options(server: &MockServer, auth: GcsAuth) -> GcsOptions {
        GcsOptions {
            endpoint: Url::parse(&server.uri()).unwrap(),
            auth,
            metadata_url: Url::parse(&format!("{}/token", server.uri())).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_read_object() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/switch-config-test/o/abc01.conf"))
            .and(query_param("alt", "media"))
            .respond_with(ResponseTemplate::new(200).set_body_string("version 1;\n"))
            .mount(&server)
            .await;

        let client = GcsClient::new(options(&server, GcsAuth::Anonymous));
        let content = client
            .read_object("switch-config-test", "abc01.conf")
            .await
            .unwrap();
        assert_eq!(content.as_ref(), b"version 1;\n");
    }

    #[tokio::test]
    async fn test_read_object_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GcsClient::new(options(&server, GcsAuth::Anonymous));
        let err = client
            .read_object("switch-config-test", "xyz01.conf")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_read_object_server_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = GcsClient::new(options(&server, GcsAuth::Anonymous));
        let err = client
            .read_object("switch-config-test", "abc01.conf")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Transport(ref msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("Metadata-Flavor", "Google"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"access_token": "secret-token", "expires_in": 3599, "token_type": "Bearer"}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b/switch-config-test/o/abc01.conf"))
            .and(header("Authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(2)
            .mount(&server)
            .await;

        let client = GcsClient::new(options(&server, GcsAuth::Metadata));
        for _ in 0..2 {
            let content = client
                .read_object("switch-config-test", "abc01.conf")
                .await
                .unwrap();
            assert_eq!(content.as_ref(), b"ok");
        }
    }
}
