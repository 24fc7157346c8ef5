//! Error taxonomy for the memory core.
//!
//! Store and gateway implementations return `anyhow::Result` internally;
//! this module gives the orchestrator and HTTP layer a typed kind to
//! branch on at the trait boundary instead of matching on error strings.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("upstream network error: {0}")]
    UpstreamNetwork(#[source] anyhow::Error),

    #[error("upstream returned malformed response: {0}")]
    UpstreamMalformed(String),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("internal error: {0}")]
    Internal(#[source] anyhow::Error),
}

impl CoreError {
    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Storage(err.into())
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        CoreError::Internal(err.into())
    }

    /// A short, user-facing message suitable for a terminal `error` event.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::InvalidInput(m) => format!("Invalid request: {m}"),
            CoreError::NotFound(m) => format!("Not found: {m}"),
            CoreError::Conflict(m) => format!("Conflict: {m}"),
            CoreError::UpstreamTimeout(_) => "The assistant took too long to respond.".to_string(),
            CoreError::UpstreamNetwork(_) => "The assistant is temporarily unavailable.".to_string(),
            CoreError::UpstreamMalformed(_) => "The assistant returned an unreadable response.".to_string(),
            CoreError::Storage(_) => "A storage error occurred.".to_string(),
            CoreError::Cancelled => "Request cancelled.".to_string(),
            CoreError::ResourceExhausted(m) => format!("Too many concurrent sessions: {m}"),
            CoreError::Internal(_) => "An internal error occurred.".to_string(),
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(feature = "cli")]
impl axum::response::IntoResponse for CoreError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = match &self {
            CoreError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Conflict(_) => StatusCode::CONFLICT,
            CoreError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CoreError::UpstreamNetwork(_) | CoreError::UpstreamMalformed(_) => StatusCode::BAD_GATEWAY,
            CoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            CoreError::ResourceExhausted(_) => StatusCode::TOO_MANY_REQUESTS,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({
            "error": self.user_message(),
            "code": status.as_u16(),
        }));
        (status, body).into_response()
    }
}
