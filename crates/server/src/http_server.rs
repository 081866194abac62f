use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Extension},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use convlog_appender::{Ack, AppendError, LogAppender};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::{CorsConfig, ServerConfig};

#[derive(Clone)]
struct HttpState {
    inner: Arc<HttpStateInner>,
}

struct HttpStateInner {
    appender: Arc<LogAppender>,
}

impl HttpState {
    fn new(appender: Arc<LogAppender>) -> Self {
        Self {
            inner: Arc::new(HttpStateInner { appender }),
        }
    }

    fn appender(&self) -> &LogAppender {
        &self.inner.appender
    }

    fn log_file(&self) -> String {
        self.inner.appender.path().display().to_string()
    }
}

#[derive(Debug)]
enum ApiError {
    InvalidJson(serde_json::Error),
    Append(AppendError),
}

impl From<AppendError> for ApiError {
    fn from(err: AppendError) -> Self {
        Self::Append(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidJson(err) => {
                tracing::debug!("rejected request body: {}", err);
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid json", "detail": err.to_string() })),
                )
                    .into_response()
            }
            ApiError::Append(err) => {
                tracing::error!("failed to append log record: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

/// Builds the application router around an already constructed appender.
///
/// The appender owns the write lock, so every router sharing one appender
/// serializes its writes against the others.
pub fn build_router(
    appender: Arc<LogAppender>,
    cors: Option<&CorsConfig>,
    max_body_bytes: usize,
) -> Router {
    Router::new()
        .route("/log", post(handle_log))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(Extension(HttpState::new(appender)))
        .layer(build_cors_layer(cors))
        .layer(TraceLayer::new_for_http())
}

pub async fn run_http_server(config: ServerConfig) -> Result<()> {
    let addr = config.bind_addr()?;
    let appender = Arc::new(LogAppender::new(config.log_file.clone()));
    let router = build_router(appender, config.cors.as_ref(), config.max_body_bytes);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind log server to {addr}"))?;

    tracing::info!("log server listening on {addr}");
    tracing::info!("appending records to {}", config.log_file.display());

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server encountered an unrecoverable error")?;

    tracing::info!("log server stopped");
    Ok(())
}

/// The body is parsed whatever its content type; only malformed JSON (or
/// nesting deeper than serde_json's limit of 128) is refused.
async fn handle_log(
    Extension(state): Extension<HttpState>,
    body: Bytes,
) -> Result<Json<Ack>, ApiError> {
    let payload: Value = serde_json::from_slice(&body).map_err(ApiError::InvalidJson)?;
    let ack = state.appender().append(&payload).await?;
    Ok(Json(ack))
}

async fn health(Extension(state): Extension<HttpState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "log_file": state.log_file(),
    }))
}

/// Credentials rule out the `*` wildcard, so "allow everything" is expressed
/// by mirroring the request's origin, method and headers.
fn build_cors_layer(config: Option<&CorsConfig>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    if let Some(cors) = config.filter(|cors| !cors.allowed_origins.iter().any(|o| o == "*")) {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("ignoring invalid CORS origin {origin:?}");
                    None
                }
            })
            .collect();
        if !origins.is_empty() {
            return layer.allow_origin(AllowOrigin::list(origins));
        }
    }

    layer.allow_origin(AllowOrigin::mirror_request())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = termination_signal();
    #[cfg(not(unix))]
    let terminate = None::<()>;

    wait_for_shutdown(terminate).await;
}

#[cfg(unix)]
fn termination_signal() -> Option<tokio::signal::unix::Signal> {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(stream) => Some(stream),
        Err(err) => {
            tracing::warn!("failed to install SIGTERM handler: {err}");
            None
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown(terminate: Option<tokio::signal::unix::Signal>) {
    let sigterm = async {
        match terminate {
            Some(mut stream) => {
                stream.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c() => tracing::info!("received Ctrl+C; shutting down"),
        _ = sigterm => tracing::info!("received SIGTERM; shutting down"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_terminate: Option<()>) {
    ctrl_c().await;
    tracing::info!("received Ctrl+C; shutting down");
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl+C: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn api_error_maps_to_internal_server_error() {
        let err = ApiError::from(AppendError::Io {
            op: convlog_appender::IoOp::Open,
            path: PathBuf::from("/nowhere/log.ndjson"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        });
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn invalid_json_maps_to_bad_request() {
        let err = serde_json::from_slice::<Value>(b"not json").unwrap_err();
        assert_eq!(
            ApiError::InvalidJson(err).into_response().status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        let terminate = termination_signal().expect("install SIGTERM handler");

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .expect("run kill");
        assert!(status.success());

        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            wait_for_shutdown(Some(terminate)),
        )
        .await
        .expect("shutdown after SIGTERM");
    }
}
