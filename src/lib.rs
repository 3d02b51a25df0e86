//! mgmt provisions user accounts in an LDAP directory, along with their SSH
//! public keys.

#![forbid(unsafe_code)]
pub mod account;
pub mod config;
pub mod directory;
pub mod error;
pub mod keys;
mod router;
pub mod telemetry;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::http::{StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

use account::AccountProvisioner;
use directory::{Directory, LdapConfig, LdapDirectory, MemoryDirectory};
use keys::{CommandInstaller, HttpKeyFetcher};

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: axum::http::Method,
    path: &str,
    content_type: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, content_type)
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::Configuration>,
    pub provisioner: AccountProvisioner,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Directory calls, key retrieval and installation bound the timeout.
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout(),
        ))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]));

    Router::new()
        // `GET /status.json` goes to `status`.
        .route("/status.json", get(router::status::status))
        // `GET /metrics` goes to Prometheus exposition.
        .route("/metrics", get(telemetry::render))
        .nest("/users", router::users::router())
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state(
    config: Arc<config::Configuration>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // initialize LDAP.
    let directory: Arc<dyn Directory> = if let Some(cfg) = &config.ldap {
        let ldap_config = LdapConfig::new(&cfg.address, &cfg.users_dn, cfg.timeout())
            .base_dn(cfg.base_dn.as_deref());

        Arc::new(
            LdapDirectory::connect(
                ldap_config,
                cfg.user.as_deref(),
                cfg.password.as_deref(),
            )
            .await?,
        )
    } else {
        tracing::warn!("missing `ldap` entry on `config.yaml` file, accounts are kept in memory");
        Arc::new(MemoryDirectory::default())
    };

    let fetcher = HttpKeyFetcher::new(config.keys.fetch_timeout(), config.keys.max_keys)?;
    let installer = CommandInstaller::new(&config.keys.installer, config.keys.install_timeout())
        .inspect_err(|_| {
            tracing::error!("missing `keys.installer` entry on `config.yaml` file");
        })?;

    let provisioner = AccountProvisioner::new(
        directory,
        Arc::new(fetcher),
        Arc::new(installer),
        config.accounts.clone(),
    )
    .directory_timeout(config.directory_timeout());

    Ok(AppState {
        config,
        provisioner,
        metrics: None,
    })
}
