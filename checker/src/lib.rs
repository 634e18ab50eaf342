pub mod cache;
pub mod collector;
pub mod compare;
pub mod config;
pub mod errors;
pub mod handler;
pub mod metrics_defs;
pub mod normalize;
pub mod target;

use crate::cache::CachedEndpoint;
use crate::collector::CheckResult;
use crate::config::Config;
use crate::errors::CheckerError;
use crate::handler::{CheckHandler, Endpoint, UrlArchiveProvider};
use crate::metrics_defs::REQUESTS_INFLIGHT;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response, StatusCode};
use shared::admin_service::AdminService;
use shared::gauge;
use shared::http::{full_body, make_text_response, run_http_service};
use sources::{Archives, NetconfClient};
use std::pin::Pin;
use std::sync::Arc;

pub const CHECK_PATH: &str = "/v1/check";

/// Wires the archive locator and the NETCONF client from `config` into a
/// handler.
pub fn check_handler(config: &Config) -> CheckHandler {
    let archives = UrlArchiveProvider::new(
        Archives::new(config.archive.gcs.clone()),
        config.archive.url_template.clone(),
        config.project.clone(),
    );
    let switch = NetconfClient::new(config.netconf.clone());

    CheckHandler::new(Arc::new(archives), Arc::new(switch), config.fetch_timeout())
}

/// Serves the check endpoint and the admin endpoints until either fails.
pub async fn run(config: Config) -> Result<(), CheckerError> {
    let endpoint = CachedEndpoint::new(
        check_handler(&config),
        config.cache.capacity,
        config.cache.ttl(),
    );
    let check_service = CheckService {
        endpoint: Arc::new(endpoint),
    };
    let admin_service = AdminService::<_, CheckerError>::new(|| true);

    let check_task = run_http_service(&config.listener.host, config.listener.port, check_service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(check_task, admin_task)?;
    Ok(())
}

/// Evaluates every target in order. Targets that cannot be evaluated at all
/// are logged and left out.
pub async fn check_all(handler: &CheckHandler, targets: &[String]) -> Vec<CheckResult> {
    let mut results = Vec::with_capacity(targets.len());
    for target in targets {
        match handler.evaluate(target).await {
            Ok(result) => results.push(result),
            Err(e) => tracing::error!(target = %target, error = %e, "Cannot check target"),
        }
    }
    results
}

struct CheckService<E> {
    endpoint: Arc<E>,
}

/// Counts a check request as in flight until dropped, including when hyper
/// drops the request future after a client disconnect.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Routes a buffered request: only the check path reaches the endpoint.
async fn route<E: Endpoint>(endpoint: &E, request: Request<Bytes>) -> Response<Bytes> {
    if request.uri().path() != CHECK_PATH {
        let mut response = Response::new(Bytes::from_static(b"Not Found"));
        *response.status_mut() = StatusCode::NOT_FOUND;
        return response;
    }

    let _inflight = InflightGuard::new();
    endpoint.handle(request).await
}

impl<E> Service<Request<Incoming>> for CheckService<E>
where
    E: Endpoint + 'static,
{
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = CheckerError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let endpoint = self.endpoint.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    let error = CheckerError::RequestBodyError(e.to_string());
                    tracing::info!(error = %error, "Cannot read check request");
                    return Ok(make_text_response(error.status_code(), error.to_string()));
                }
            };

            let response = route(endpoint.as_ref(), Request::from_parts(parts, body)).await;
            let (parts, body) = response.into_parts();
            Ok(Response::from_parts(parts, full_body(body)))
        })
    }
}
