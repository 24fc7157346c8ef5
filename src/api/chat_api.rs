//! `POST /chat`: accepts one user turn and returns either a single
//! terminal JSON event or, when `streaming` is set, an ndjson body
//! with one `OrchestratorEvent` per line. Grounded in the teacher's
//! `stream_api`/SSE handlers, trimmed to the event shapes this core's
//! orchestrator actually emits.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::auth::AuthUser;
use crate::context_engine::orchestrator::OrchestratorEvent;
use crate::error::CoreError;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Serialize)]
struct ChatRequestError {
    error: String,
}

pub async fn chat(State(state): State<AppState>, user: AuthUser, Json(req): Json<ChatRequest>) -> Response {
    if req.message.trim().is_empty() {
        return CoreError::InvalidInput("message must not be empty".to_string()).into_response();
    }

    let (session_id, orchestrator) = match state.sessions.acquire(&user.user_id, req.session_id).await {
        Ok(pair) => pair,
        Err(e) => return e.into_response(),
    };
    let _ = session_id;

    let mut events = orchestrator.process_turn(req.message);

    if req.streaming {
        let body_stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                let terminal = event.is_terminal();
                match serde_json::to_string(&event) {
                    Ok(mut line) => {
                        line.push('\n');
                        yield Ok::<_, std::io::Error>(axum::body::Bytes::from(line));
                    }
                    Err(e) => {
                        yield Ok(axum::body::Bytes::from(format!(
                            "{{\"kind\":\"error\",\"error\":\"failed to encode event: {e}\"}}\n"
                        )));
                    }
                }
                if terminal {
                    break;
                }
            }
        };
        let body = axum::body::Body::from_stream(body_stream);
        return Response::builder()
            .status(axum::http::StatusCode::OK)
            .header(axum::http::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .unwrap_or_else(|_| axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    while let Some(event) = events.next().await {
        if event.is_terminal() {
            return Json(event).into_response();
        }
    }
    CoreError::Internal(anyhow::anyhow!("turn ended without a terminal event")).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_defaults_streaming_false() {
        let req: ChatRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert!(!req.streaming);
        assert!(req.session_id.is_none());
    }

    #[test]
    fn orchestrator_events_serialize_with_kind_tag() {
        let event = OrchestratorEvent::System {
            id: "1".to_string(),
            action: "web_search".to_string(),
            phase: "active".to_string(),
            query: Some("rust".to_string()),
            content: None,
            timestamp: chrono::Utc::now(),
            session_id: "s1".to_string(),
        };
        let value: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "system");
    }
}
