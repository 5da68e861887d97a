//! HTTP control API
//!
//! Mounted under `/api/tailscale`. Each handler makes exactly one
//! [`TailscaleService`] call for the service's default environment and maps
//! the result to JSON. Errors become `{ "error": <code>, "message": <text> }`
//! with the full error text preserved.

use crate::errors::{ProcessError, TailgateError};
use crate::routes::DeploymentTopology;
use crate::service::{CertRequest, TailscaleService};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

/// Route prefix of the control API
pub const API_PREFIX: &str = "/api/tailscale";

type SharedService = Arc<TailscaleService>;

/// Build the full application router
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .nest(API_PREFIX, routes(service))
        .layer(TraceLayer::new_for_http())
}

/// Control API routes, relative to [`API_PREFIX`]
pub fn routes(service: SharedService) -> Router {
    Router::new()
        .route("/container/status", get(status_handler))
        .route("/container/start", post(start_handler))
        .route("/container/stop", post(stop_handler))
        .route("/container/remove", post(remove_handler))
        .route("/container/auth-url", get(auth_url_handler))
        .route("/container/logout", post(logout_handler))
        .route("/container/provision-cert", post(provision_cert_handler))
        .route("/container/tailnet-settings", get(tailnet_settings_handler))
        .route("/configure-serve", post(configure_serve_handler))
        .route("/serve-status", get(serve_status_handler))
        .route("/access-urls", get(access_urls_handler))
        .route("/environment", get(environment_handler))
        .with_state(service)
}

/// Serve the API on `listen` until `shutdown` resolves
pub async fn serve<F>(service: SharedService, listen: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!("Control API listening on {}", listener.local_addr()?);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::debug!("Control API stopped");
    Ok(())
}

/// HTTP status for an error
pub fn status_for(error: &TailgateError) -> StatusCode {
    match error {
        TailgateError::InvalidRequest { .. } | TailgateError::Config(_) => StatusCode::BAD_REQUEST,
        TailgateError::NotFound { .. } => StatusCode::NOT_FOUND,
        TailgateError::NotRunning { .. }
        | TailgateError::NotAuthenticated { .. }
        | TailgateError::AlreadyAuthenticated { .. } => StatusCode::CONFLICT,
        TailgateError::Process(ProcessError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
        TailgateError::Process(_) | TailgateError::Mesh(_) | TailgateError::Docker(_) => {
            StatusCode::BAD_GATEWAY
        }
        TailgateError::ControlPlane { .. } => StatusCode::SERVICE_UNAVAILABLE,
        TailgateError::Admin(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, error: &TailgateError) -> Response {
    let body = serde_json::json!({
        "error": error.code(),
        "message": error.to_string(),
    });
    (status, Json(body)).into_response()
}

/// Handler error wrapper
pub struct ApiError(TailgateError);

impl From<TailgateError> for ApiError {
    fn from(error: TailgateError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(code = self.0.code(), "Request failed: {}", self.0);
        } else {
            tracing::debug!(code = self.0.code(), "Request rejected: {}", self.0);
        }
        error_response(status, &self.0)
    }
}

// Malformed bodies and query strings answer 400 with the usual error body
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(TailgateError::InvalidRequest {
            message: rejection.body_text(),
        })
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(TailgateError::InvalidRequest {
            message: rejection.body_text(),
        })
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// ── Handlers ────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "OK"
}

async fn status_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.status(env).await?))
}

async fn start_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.start(env).await?))
}

async fn stop_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.stop(env).await?))
}

#[derive(Debug, Deserialize)]
struct RemoveQuery {
    #[serde(default)]
    remove_volume: bool,
    #[serde(default)]
    purge_device: bool,
}

async fn remove_handler(
    State(service): State<SharedService>,
    query: Result<Query<RemoveQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let env = service.default_environment();
    Ok(Json(
        service
            .teardown(env, query.remove_volume, query.purge_device)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct AuthUrlQuery {
    #[serde(default)]
    regenerate: bool,
}

async fn auth_url_handler(
    State(service): State<SharedService>,
    query: Result<Query<AuthUrlQuery>, QueryRejection>,
) -> ApiResult<impl IntoResponse> {
    let Query(query) = query?;
    let env = service.default_environment();
    Ok(Json(service.auth_url(env, query.regenerate).await?))
}

async fn logout_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    service.logout(env).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
struct CertQuery {
    hostname: Option<String>,
    timeout_secs: Option<u64>,
    retries: Option<u32>,
}

async fn provision_cert_handler(
    State(service): State<SharedService>,
    query: Result<Query<CertQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(query) = query?;
    if query.timeout_secs == Some(0) {
        return Err(TailgateError::InvalidRequest {
            message: "timeout_secs must be greater than zero".to_string(),
        }
        .into());
    }
    let env = service.default_environment();
    let record = service
        .provision_cert(
            env,
            CertRequest {
                hostname: query.hostname,
                timeout: query.timeout_secs.map(Duration::from_secs),
                retries: query.retries,
            },
        )
        .await?;
    let status = if record.timed_out {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::OK
    };
    Ok((status, Json(record)).into_response())
}

async fn tailnet_settings_handler(
    State(service): State<SharedService>,
) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.tailnet_settings(env).await?))
}

async fn configure_serve_handler(
    State(service): State<SharedService>,
    topology: Result<Json<DeploymentTopology>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(topology) = topology?;
    let env = service.default_environment();
    Ok(Json(service.configure_serve(env, &topology).await?))
}

async fn serve_status_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.serve_status(env).await?))
}

async fn access_urls_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.access_urls(env).await?))
}

async fn environment_handler(State(service): State<SharedService>) -> ApiResult<impl IntoResponse> {
    let env = service.default_environment();
    Ok(Json(service.environment(env).await?))
}
