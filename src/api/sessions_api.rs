//! Session lifecycle endpoints: list a user's sessions, fetch a
//! session's transcript, delete a session. Grounded in the teacher's
//! `conversation_api`/`admin_api` REST handlers, trimmed to what this
//! core's `Session`/`Message` model needs to expose.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::domain::MemoryStatus;
use crate::error::CoreError;

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    title: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    last_modified: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    sessions: Vec<SessionSummary>,
}

pub async fn list_sessions(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.db.list_sessions_for_user(&user.user_id) {
        Ok(sessions) => {
            let sessions = sessions
                .into_iter()
                .map(|s| SessionSummary {
                    id: s.id,
                    title: s.title,
                    created_at: s.created_at,
                    last_modified: s.last_activity_at,
                })
                .collect();
            Json(SessionsResponse { sessions }).into_response()
        }
        Err(e) => CoreError::storage(e).into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HistoryMessage {
    id: i64,
    role: String,
    content: String,
    timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    messages: Vec<HistoryMessage>,
}

pub async fn history(State(state): State<AppState>, user: AuthUser, Path(session_id): Path<String>) -> Response {
    match state.db.get_session(&session_id) {
        Ok(Some(session)) if session.user_id == user.user_id => {}
        Ok(Some(_)) | Ok(None) => {
            return CoreError::NotFound(format!("no session {session_id}")).into_response();
        }
        Err(e) => return CoreError::storage(e).into_response(),
    }

    let contextual = state.db.messages.list_by_status(&session_id, MemoryStatus::Contextual).await;
    let episodic = state.db.messages.list_by_status(&session_id, MemoryStatus::Episodic).await;
    let (contextual, episodic) = match (contextual, episodic) {
        (Ok(c), Ok(e)) => (c, e),
        (Err(e), _) | (_, Err(e)) => return e.into_response(),
    };

    let mut messages: Vec<HistoryMessage> = contextual
        .into_iter()
        .chain(episodic)
        .map(|m| HistoryMessage {
            id: m.id,
            role: m.role.as_str().to_string(),
            content: m.content_full,
            timestamp: m.timestamp,
        })
        .collect();
    messages.sort_by_key(|m| m.timestamp);

    Json(HistoryResponse { messages }).into_response()
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
}

pub async fn delete_session(State(state): State<AppState>, user: AuthUser, Path(session_id): Path<String>) -> Response {
    match state.db.get_session(&session_id) {
        Ok(Some(session)) if session.user_id == user.user_id => {}
        Ok(Some(_)) | Ok(None) => {
            return CoreError::NotFound(format!("no session {session_id}")).into_response();
        }
        Err(e) => return CoreError::storage(e).into_response(),
    }

    if let Err(e) = state.sessions.delete(&user.user_id, &session_id).await {
        return e.into_response();
    }
    if let Err(e) = state.db.delete_session(&session_id) {
        return CoreError::storage(e).into_response();
    }
    Json(StatusResponse { status: "ok" }).into_response()
}
