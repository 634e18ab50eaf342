use crate::collector::{CheckResult, CheckStatus, ConfigCheckCollector, ConfigMatchMetric};
use crate::errors::{CheckerError, Result};
use crate::target::site_from_hostname;
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::{Method, Request, Response, StatusCode};
use prometheus::{Encoder, Registry, TextEncoder};
use sources::{ArchiveError, ArchiveSource, Archives, SwitchConfigSource};
use std::sync::Arc;
use std::time::Duration;

/// Turns one buffered request into one buffered response.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes>;
}

/// Builds the archived-config source for a site.
pub trait ArchiveProvider: Send + Sync {
    fn for_site(&self, site: &str) -> Result<Arc<dyn ArchiveSource>, ArchiveError>;
}

/// Resolves a site through a locator template such as
/// `gs://switch-config-{project}/configs/latest/{site}.conf`.
pub struct UrlArchiveProvider {
    archives: Archives,
    url_template: String,
    project: String,
}

impl UrlArchiveProvider {
    pub fn new(archives: Archives, url_template: String, project: String) -> Self {
        Self {
            archives,
            url_template,
            project,
        }
    }

    pub fn locator(&self, site: &str) -> String {
        self.url_template
            .replace("{project}", &self.project)
            .replace("{site}", site)
    }
}

impl ArchiveProvider for UrlArchiveProvider {
    fn for_site(&self, site: &str) -> Result<Arc<dyn ArchiveSource>, ArchiveError> {
        self.archives.open(&self.locator(site))
    }
}

/// Serves `GET /v1/check?target=<hostname>`.
///
/// Every request gets its own collector and registry, both dropped once the
/// exposition text is rendered.
pub struct CheckHandler {
    archives: Arc<dyn ArchiveProvider>,
    switch: Arc<dyn SwitchConfigSource>,
    fetch_timeout: Duration,
}

impl CheckHandler {
    pub fn new(
        archives: Arc<dyn ArchiveProvider>,
        switch: Arc<dyn SwitchConfigSource>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            archives,
            switch,
            fetch_timeout,
        }
    }

    /// Evaluates one target without rendering it.
    pub async fn evaluate(&self, target: &str) -> Result<CheckResult> {
        let site = site_from_hostname(target)?;
        let archive = match self.archives.for_site(site) {
            Ok(archive) => archive,
            Err(e) if e.is_construction_error() => {
                return Err(CheckerError::ProviderConstruction(e));
            }
            // The locator was fine but the archive could not be reached.
            Err(e) => {
                tracing::error!(target = %target, error = %e, "Cannot open archived config");
                return Ok(CheckResult {
                    target: target.to_string(),
                    status: CheckStatus::ConfigNotFoundGcs,
                });
            }
        };

        let collector =
            ConfigCheckCollector::new(target, archive, self.switch.clone(), self.fetch_timeout);
        Ok(collector.evaluate().await)
    }

    /// Runs one check and returns the exposition content type and text.
    pub async fn check(&self, target: &str) -> Result<(String, String)> {
        let result = self.evaluate(target).await?;
        render(&result)
    }

    async fn respond(&self, request: &Request<Bytes>) -> Result<Response<Bytes>> {
        if request.method() != Method::GET {
            return Err(CheckerError::MethodNotAllowed);
        }

        let target = target_param(request).ok_or(CheckerError::MissingTarget)?;
        let (content_type, body) = self.check(&target).await?;

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type)
            .body(Bytes::from(body))
            .map_err(|e| CheckerError::Io(std::io::Error::other(e)))
    }
}

#[async_trait]
impl Endpoint for CheckHandler {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        match self.respond(&request).await {
            Ok(response) => response,
            Err(e) => error_response(e),
        }
    }
}

/// Renders a result through a registry that lives for this call only.
pub fn render(result: &CheckResult) -> Result<(String, String)> {
    let registry = Registry::new();
    registry.register(Box::new(ConfigMatchMetric::new(result)?))?;

    let encoder = TextEncoder::new();
    let mut body = String::new();
    encoder.encode_utf8(&registry.gather(), &mut body)?;
    Ok((encoder.format_type().to_string(), body))
}

fn target_param(request: &Request<Bytes>) -> Option<String> {
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "target")
        .map(|(_, value)| value.into_owned())
        .filter(|target| !target.is_empty())
}

fn error_response(error: CheckerError) -> Response<Bytes> {
    let status = error.status_code();
    let body = match &error {
        CheckerError::MethodNotAllowed => Bytes::new(),
        CheckerError::MissingTarget | CheckerError::InvalidTarget(_) => {
            tracing::info!(error = %error, "Rejected check request");
            Bytes::from(error.to_string())
        }
        _ => {
            tracing::error!(error = %error, "Error while processing check request");
            Bytes::from(error.to_string())
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use sources::NetconfError;
    use sources::gcs::{GcsAuth, GcsOptions};

    const ABC01: &str = include_str!("../testdata/abc01.conf");
    const ABC01_BIS: &str = include_str!("../testdata/abc01-bis.conf");
    const ABC02: &str = include_str!("../testdata/abc02.conf");

    struct StaticArchive(&'static str);

    #[async_trait]
    impl ArchiveSource for StaticArchive {
        async fn get(&self) -> Result<Bytes, ArchiveError> {
            Ok(Bytes::from_static(self.0.as_bytes()))
        }
    }

    struct MissingArchive;

    #[async_trait]
    impl ArchiveSource for MissingArchive {
        async fn get(&self) -> Result<Bytes, ArchiveError> {
            Err(ArchiveError::NotFound("abc01.conf".into()))
        }
    }

    enum FakeProvider {
        Archived(&'static str),
        Missing,
        Unreachable,
        Broken,
    }

    impl ArchiveProvider for FakeProvider {
        fn for_site(&self, site: &str) -> Result<Arc<dyn ArchiveSource>, ArchiveError> {
            assert_eq!(site, "abc01");
            match self {
                FakeProvider::Archived(config) => Ok(Arc::new(StaticArchive(config))),
                FakeProvider::Missing => Ok(Arc::new(MissingArchive)),
                FakeProvider::Unreachable => {
                    Err(ArchiveError::Transport("metadata server unreachable".into()))
                }
                FakeProvider::Broken => Err(ArchiveError::InvalidLocator("gs://".into())),
            }
        }
    }

    struct FakeSwitch(Option<&'static str>);

    #[async_trait]
    impl SwitchConfigSource for FakeSwitch {
        async fn get_config(&self, hostname: &str) -> Result<String, NetconfError> {
            assert_eq!(hostname, "s1.abc01.measurement-lab.org");
            self.0
                .map(str::to_string)
                .ok_or(NetconfError::UnexpectedEof)
        }
    }

    fn handler(provider: FakeProvider, switch: FakeSwitch) -> CheckHandler {
        CheckHandler::new(Arc::new(provider), Arc::new(switch), Duration::from_secs(1))
    }

    fn request(method: Method, uri: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    struct Case {
        name: &'static str,
        method: Method,
        uri: &'static str,
        provider: FakeProvider,
        switch: FakeSwitch,
        status: StatusCode,
        body: &'static str,
    }

    #[tokio::test]
    async fn test_handle() {
        let cases = [
            Case {
                name: "ok",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC01_BIS)),
                status: StatusCode::OK,
                body: r#"status="ok",target="s1.abc01.measurement-lab.org"} 1"#,
            },
            Case {
                name: "config-mismatch",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC02)),
                status: StatusCode::OK,
                body: r#"status="config_mismatch""#,
            },
            Case {
                name: "config-not-found-gcs",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Missing,
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::OK,
                body: r#"status="config_not_found_gcs""#,
            },
            Case {
                name: "archive-unreachable-on-open",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Unreachable,
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::OK,
                body: r#"status="config_not_found_gcs""#,
            },
            Case {
                name: "config-not-found-switch",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(None),
                status: StatusCode::OK,
                body: r#"status="config_not_found_switch""#,
            },
            Case {
                name: "missing-target",
                method: Method::GET,
                uri: "/v1/check",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::BAD_REQUEST,
                body: "URL parameter 'target' is missing",
            },
            Case {
                name: "empty-target",
                method: Method::GET,
                uri: "/v1/check?target=",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::BAD_REQUEST,
                body: "URL parameter 'target' is missing",
            },
            Case {
                name: "invalid-target",
                method: Method::GET,
                uri: "/v1/check?target=invalid",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::BAD_REQUEST,
                body: "cannot extract site from hostname: invalid",
            },
            Case {
                name: "provider-construction-failure",
                method: Method::GET,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Broken,
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "cannot create archive provider",
            },
            Case {
                name: "post",
                method: Method::POST,
                uri: "/v1/check?target=s1.abc01.measurement-lab.org",
                provider: FakeProvider::Archived(ABC01),
                switch: FakeSwitch(Some(ABC01)),
                status: StatusCode::METHOD_NOT_ALLOWED,
                body: "",
            },
        ];

        for case in cases {
            let handler = handler(case.provider, case.switch);
            let response = handler.handle(request(case.method, case.uri)).await;
            assert_eq!(response.status(), case.status, "{}", case.name);

            let body = String::from_utf8(response.body().to_vec()).unwrap();
            if case.body.is_empty() {
                assert!(body.is_empty(), "{}: {body}", case.name);
            } else {
                assert!(body.contains(case.body), "{}: {body}", case.name);
            }
        }
    }

    #[tokio::test]
    async fn test_exposition_output() {
        let handler = handler(FakeProvider::Archived(ABC01), FakeSwitch(Some(ABC01)));
        let response = handler
            .handle(request(
                Method::GET,
                "/v1/check?target=s1.abc01.measurement-lab.org&unused=1",
            ))
            .await;

        assert_eq!(
            response.headers()[CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
        let body = String::from_utf8(response.body().to_vec()).unwrap();
        let samples: Vec<&str> = body.lines().filter(|l| !l.starts_with('#')).collect();
        assert_eq!(
            samples,
            [r#"switch_monitoring_config_match{status="ok",target="s1.abc01.measurement-lab.org"} 1"#]
        );
        assert!(body.contains("# HELP switch_monitoring_config_match Configuration check result for this target"));
    }

    #[test]
    fn test_url_archive_provider() {
        let provider = UrlArchiveProvider::new(
            Archives::new(GcsOptions {
                auth: GcsAuth::Anonymous,
                ..Default::default()
            }),
            "gs://switch-config-{project}/configs/latest/{site}.conf".into(),
            "mlab-sandbox".into(),
        );

        assert_eq!(
            provider.locator("abc01"),
            "gs://switch-config-mlab-sandbox/configs/latest/abc01.conf"
        );
        assert!(provider.for_site("abc01").is_ok());

        let broken = UrlArchiveProvider::new(
            Archives::new(GcsOptions::default()),
            "ftp://configs/{site}.conf".into(),
            "mlab-sandbox".into(),
        );
        assert!(matches!(
            broken.for_site("abc01").err().unwrap(),
            ArchiveError::UnsupportedScheme(_)
        ));
    }
}
