//! Auth boundary stub: per §6 of the design, token issuance and
//! verification live outside this core — a transport-layer concern
//! that authenticates a request and hands the core a `(user_id,
//! username)` pair. This extractor stands in for that boundary with
//! the minimum needed to exercise the API: it trusts a bearer token
//! of the form `<user_id>` or `<user_id>:<username>` verbatim. A real
//! deployment replaces this with whatever session/JWT verification
//! the transport layer performs before the request reaches here.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub username: String,
}

pub struct AuthError(pub String);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.0, "code": 401 })),
        )
            .into_response()
    }
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError("missing Authorization header".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AuthError("Authorization header must be a Bearer token".to_string()))?
            .trim();

        if token.is_empty() {
            return Err(AuthError("empty bearer token".to_string()));
        }

        match token.split_once(':') {
            Some((user_id, username)) if !user_id.is_empty() => {
                Ok(AuthUser { user_id: user_id.to_string(), username: username.to_string() })
            }
            _ => Ok(AuthUser { user_id: token.to_string(), username: token.to_string() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<AuthUser, AuthError> {
        let mut builder = Request::builder().uri("/chat");
        if let Some(h) = header {
            builder = builder.header(axum::http::header::AUTHORIZATION, h);
        }
        let request = builder.body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_plain_token_as_user_id() {
        let user = extract(Some("Bearer u-123")).await.unwrap();
        assert_eq!(user.user_id, "u-123");
    }

    #[tokio::test]
    async fn parses_user_id_and_username() {
        let user = extract(Some("Bearer u-123:priya")).await.unwrap();
        assert_eq!(user.user_id, "u-123");
        assert_eq!(user.username, "priya");
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        assert!(extract(None).await.is_err());
    }
}
