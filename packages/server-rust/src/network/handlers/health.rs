//! Health, liveness and readiness probes.
//!
//! Orchestrators poll these to decide whether the accounts server may take
//! traffic; operators read `/health` for drain progress.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Server state as JSON: `state`, `in_flight` calls and `uptime_secs`.
///
/// Always 200. A draining server still answers here, so monitoring can tell
/// "up but draining" apart from "down".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Liveness probe: 200 whenever the process can answer at all.
///
/// Health state and downstream collaborators (store, queue, OAuth provider)
/// are not consulted; a failing liveness probe restarts the process.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only in [`HealthState::Ready`], 503 otherwise.
///
/// The server is not ready before `serve` calls `set_ready`, nor once
/// shutdown has started draining in-flight RPC calls.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
