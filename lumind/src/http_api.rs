//! HTTP API.
//!
//! Provides:
//! - `POST /api/1v/gh_callback` - GitHub webhook receiver
//! - `GET /api/1v/ingestions` - recent ingestion history
//! - `GET /api/1v/events` - live ingestion events (server-sent events)
//! - `GET /metrics` - Prometheus metrics export
//! - `GET /health` - basic daemon health check

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use lumin_common::{ErrorCode, ProjectId};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::history::IngestionHistory;
use crate::metrics;
use crate::pipeline::{DeliveryOutcome, IngestionPipeline, PipelineError, WebhookDelivery};

pub const WEBHOOK_PATH: &str = "/api/1v/gh_callback";
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";
pub const EVENT_HEADER: &str = "x-github-event";
pub const DELIVERY_HEADER: &str = "x-github-delivery";

/// GitHub caps webhook payloads at 25 MB.
const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;
const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub pipeline: Arc<IngestionPipeline>,
    pub history: Arc<IngestionHistory>,
    pub version: &'static str,
    pub started_at: Instant,
    pub pid: u32,
}

impl HttpState {
    pub fn new(pipeline: Arc<IngestionPipeline>) -> Self {
        Self {
            history: Arc::clone(pipeline.history()),
            pipeline,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Instant::now(),
            pid: std::process::id(),
        }
    }
}

pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route("/api/1v/ingestions", get(ingestions_handler))
        .route("/api/1v/events", get(events_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY))
        .with_state(Arc::new(state))
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = match &self {
            PipelineError::SignatureInvalid => StatusCode::UNAUTHORIZED,
            PipelineError::InvalidPayload(_) | PipelineError::MissingInstallation => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::ProjectNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = self.code();
        // Pipeline details go to the check run, not to the caller.
        let message = if status.is_server_error() {
            code.message().to_string()
        } else {
            self.to_string()
        };
        (
            status,
            Json(json!({
                "error": message,
                "code": code.code_string(),
            })),
        )
            .into_response()
    }
}

/// Handler for `POST /api/1v/gh_callback`.
///
/// The body is taken as raw bytes so the signature is checked over exactly
/// what GitHub sent.
async fn webhook_handler(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let delivery_id = header_string(&headers, DELIVERY_HEADER).unwrap_or_default();
    let delivery = WebhookDelivery {
        event: header_string(&headers, EVENT_HEADER),
        signature: header_string(&headers, SIGNATURE_HEADER),
        body,
    };

    // Ingestion runs in its own task so a caller that hangs up does not
    // cancel it halfway through.
    let pipeline = Arc::clone(&state.pipeline);
    let result = match tokio::spawn(async move { pipeline.handle(delivery).await }).await {
        Ok(result) => result,
        Err(err) => {
            error!(delivery = %delivery_id, "webhook task failed: {}", err);
            let code = ErrorCode::InternalTaskFailed;
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": code.message(), "code": code.code_string() })),
            )
                .into_response();
        }
    };

    match result {
        Ok(DeliveryOutcome::Ignored(reason)) => (
            StatusCode::OK,
            Json(json!({ "status": "ignored", "detail": reason })),
        )
            .into_response(),
        Ok(DeliveryOutcome::Processed(summary)) => {
            info!(delivery = %delivery_id, ingestion_id = summary.ingestion_id, "webhook processed");
            (
                StatusCode::OK,
                Json(json!({ "status": "processed", "ingestion": summary })),
            )
                .into_response()
        }
        Err(err) => {
            warn!(delivery = %delivery_id, code = %err.code().code_string(), "webhook failed: {}", err);
            err.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    project_id: Option<i64>,
}

/// Handler for `GET /api/1v/ingestions`.
async fn ingestions_handler(
    State(state): State<Arc<HttpState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let records = match query.project_id {
        Some(id) => state.history.by_project(ProjectId(id), limit),
        None => state.history.recent(limit),
    };
    Json(json!({
        "stats": state.history.stats(),
        "ingestions": records,
    }))
}

/// Handler for `GET /api/1v/events`.
///
/// Each message is one JSON line from the event bus. A client that falls
/// behind skips the events it missed.
async fn events_handler(
    State(state): State<Arc<HttpState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.pipeline.events().subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(line) => return Some((Ok(Event::default().data(line)), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream client lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handler for `/metrics` - Prometheus metrics export.
async fn metrics_handler() -> impl IntoResponse {
    match metrics::encode_metrics() {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            output,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

/// Handler for `/health`.
async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "pid": state.pid,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "event_subscribers": state.pipeline.events().subscriber_count(),
    }))
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: HttpState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_listener(
    listener: TcpListener,
    state: HttpState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}
