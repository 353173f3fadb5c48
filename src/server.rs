//! HTTP control surface for a running logger.
//!
//! This module provides an HTTP server that:
//! - Reports the session state, status and latest record
//! - Accepts control events via POST /control/{event}
//!
//! # Architecture
//!
//! ```text
//! remote client ──→ POST /control/pause ──→ SessionController ──→ samplers / aggregator
//!               ←── GET /latest ←────────── latest OutputRecord
//! ```
//!
//! Controller calls block (stop joins the session threads), so every handler
//! runs them on the blocking pool.

use crate::core::OutputRecord;
use crate::session::{ControlEvent, SessionController, SessionState, SessionStatus, Transition};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Controller driven by the endpoints
    pub controller: Arc<SessionController>,
}

impl ServerConfig {
    pub fn new(port: u16, controller: Arc<SessionController>) -> Self {
        Self { port, controller }
    }
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Current state response
#[derive(Serialize)]
pub struct StateResponse {
    pub state: SessionState,
}

/// Response from the control endpoint
#[derive(Serialize)]
pub struct ControlResponse {
    pub transition: Transition,
    pub state: SessionState,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, code: &str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: code.to_string(),
        }),
    )
}

/// Run a controller call off the async workers.
async fn blocking<T, F>(controller: &Arc<SessionController>, f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&SessionController) -> T + Send + 'static,
{
    let controller = controller.clone();
    tokio::task::spawn_blocking(move || f(&controller))
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, "TASK_FAILED", e.to_string()))
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /state
async fn state(
    State(controller): State<Arc<SessionController>>,
) -> Result<Json<StateResponse>, ApiError> {
    let state = blocking(&controller, |c| c.state()).await?;
    Ok(Json(StateResponse { state }))
}

/// GET /status
async fn status(
    State(controller): State<Arc<SessionController>>,
) -> Result<Json<SessionStatus>, ApiError> {
    blocking(&controller, |c| c.status()).await.map(Json)
}

/// GET /latest
///
/// The record of the most recent tick, including ticks withheld while paused.
async fn latest(
    State(controller): State<Arc<SessionController>>,
) -> Result<Json<OutputRecord>, ApiError> {
    blocking(&controller, |c| c.latest_record())
        .await?
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "NO_RECORD", "no record produced yet"))
}

/// POST /control/{event}
async fn control(
    State(controller): State<Arc<SessionController>>,
    Path(event): Path<String>,
) -> Result<Json<ControlResponse>, ApiError> {
    let event: ControlEvent = event
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, "UNKNOWN_EVENT", e))?;

    let (result, state) = blocking(&controller, move |c| (c.handle(event), c.state())).await?;
    match result {
        Ok(transition) => Ok(Json(ControlResponse { transition, state })),
        Err(e) => {
            tracing::warn!("Control event {} failed: {}", event, e);
            Err(api_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "START_FAILED",
                e.to_string(),
            ))
        }
    }
}

/// Build the router without binding a socket.
pub fn router(controller: Arc<SessionController>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(state))
        .route("/status", get(status))
        .route("/latest", get(latest))
        .route("/control/:event", post(control))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(controller)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router(config.controller);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Logger control server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
