//! `GET /memory`: exposes a user's persisted profile facts, the one
//! piece of cross-session memory this core keeps outside a session's
//! own tiered messages.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;

#[derive(Debug, Serialize)]
struct MemoryResponse {
    user_profile_facts: Vec<String>,
}

pub async fn get_memory(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.db.facts.load(&user.user_id).await {
        Ok(facts) => Json(MemoryResponse { user_profile_facts: facts }).into_response(),
        Err(e) => e.into_response(),
    }
}
