//! `GET /healthz`: a liveness probe reporting uptime and the active
//! session count, grounded in the teacher's `admin_api::HealthResponse`
//! shape minus the local-model-runtime fields this core has no use for.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
}

pub async fn health(State(state): State<AppState>) -> Response {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        active_sessions: state.sessions.active_session_count(),
    })
    .into_response()
}
