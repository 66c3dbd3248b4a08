//! HTTP surface
//!
//! Push transport plus the status and audit endpoints:
//!
//! - `POST /event` - deliver one event, body passed through untouched
//! - `GET /status` - control state and replay counter
//! - `GET /ledger` - all ledger entries
//! - `GET /ledger/export` - JSON Lines export (ledgered as `LEDGER_EXPORT`)
//! - `GET /ledger/verify` - hash chain check
//! - `GET /metrics` - Prometheus text

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use gate_core::{engine::StatusSnapshot, Delivery, Error, GateService, LedgerEntry};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Shared handler state
#[derive(Clone, Debug)]
pub struct AppState {
    /// Gate facade
    pub gate: GateService,
}

/// Handler errors
///
/// Only infrastructure faults land here. Every delivered event, denied or not,
/// is a 200 with its verdict.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Gate core error
    #[error(transparent)]
    Gate(#[from] Error),

    /// Metrics could not be rendered
    #[error("metrics export failed: {0}")]
    Metrics(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Gate(Error::Concurrency(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!(error = %self, %status, "Request failed");

        (
            status,
            Json(json!({
                "error": self.to_string(),
                "timestamp": Utc::now(),
            })),
        )
            .into_response()
    }
}

/// Body of `GET /status`
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// Always true when the process answers
    pub ok: bool,
    /// System banner
    pub system: &'static str,
    /// Current state and counter
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
}

/// Body of `GET /ledger/verify`
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// Chain verified end to end
    pub ok: bool,
    /// Entries checked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,
    /// First broken link
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// What did not match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

async fn post_event(State(state): State<AppState>, body: Bytes) -> Result<Json<Delivery>, ApiError> {
    let delivery = state.gate.deliver(body).await?;
    info!(
        verdict = delivery.verdict.label(),
        reason = delivery.verdict.reason().unwrap_or(""),
        "Event delivered over HTTP"
    );
    Ok(Json(delivery))
}

async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let snapshot = state.gate.status().await?;
    Ok(Json(StatusResponse {
        ok: true,
        system: "HBCE BRIDGE",
        snapshot,
    }))
}

async fn get_ledger(State(state): State<AppState>) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    Ok(Json(state.gate.read_ledger()?))
}

async fn export_ledger(State(state): State<AppState>) -> Result<Response, ApiError> {
    let bytes = state.gate.export_ledger()?;
    info!(bytes = bytes.len(), "Ledger exported");
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], bytes).into_response())
}

async fn verify_ledger(State(state): State<AppState>) -> Result<Json<VerifyResponse>, ApiError> {
    let response = match state.gate.verify_ledger() {
        Ok(entries) => VerifyResponse {
            ok: true,
            entries: Some(entries),
            seq: None,
            detail: None,
        },
        Err(Error::ChainBroken { seq, detail }) => VerifyResponse {
            ok: false,
            entries: None,
            seq: Some(seq),
            detail: Some(detail),
        },
        Err(e) => return Err(e.into()),
    };
    Ok(Json(response))
}

async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state
        .gate
        .metrics()
        .export()
        .map_err(|e| ApiError::Metrics(e.to_string()))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response())
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Build the router over a running gate
pub fn router(gate: GateService) -> Router {
    Router::new()
        .route("/event", post(post_event))
        .route("/status", get(get_status))
        .route("/ledger", get(get_ledger))
        .route("/ledger/export", get(export_ledger))
        .route("/ledger/verify", get(verify_ledger))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { gate })
}
