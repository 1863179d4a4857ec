//! Bearer-token guard for the internal API

use crate::payments::utils::secure_eq;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::warn;

/// Expected token; `None` leaves the API open (local development).
#[derive(Debug, Clone, Default)]
pub struct InternalToken(pub Option<Arc<str>>);

impl InternalToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.map(Arc::from))
    }

    pub fn accepts(&self, header: Option<&str>) -> bool {
        let expected = match &self.0 {
            Some(expected) => expected,
            None => return true,
        };
        header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|given| secure_eq(given.trim().as_bytes(), expected.as_bytes()))
            .unwrap_or(false)
    }
}

pub async fn require_internal_token(
    State(token): State<InternalToken>,
    request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !token.accepts(header) {
        warn!(path = %request.uri().path(), "rejected internal API call without valid token");
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "UNAUTHORIZED",
                "message": "A valid bearer token is required",
            })),
        )
            .into_response();
    }
    next.run(request).await
}
