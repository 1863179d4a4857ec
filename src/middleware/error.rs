//! JSON envelopes for the internal API.
//!
//! Handlers return `Result<_, AppError>`; failures leave the service as an
//! [`ErrorResponse`] and successes as an [`ApiResponse`].

use crate::error::{AppError, AppErrorKind, DomainError, ErrorCode, ExternalError};
use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Seconds a client should wait before retrying a paused operation.
const RETRY_AFTER_SECS: &str = "60";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCode,
    /// Text safe to show the end user
    pub message: String,
    pub request_id: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub retryable: bool,
}

impl From<&AppError> for ErrorResponse {
    fn from(error: &AppError) -> Self {
        Self {
            error: error.error_code(),
            message: error.user_message(),
            request_id: error.request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
            context: error.context.clone(),
            retryable: error.is_retryable(),
        }
    }
}

/// Maintenance and an empty sending wallet clear up on their own.
fn retry_after(error: &AppError) -> Option<HeaderValue> {
    match &error.kind {
        AppErrorKind::Domain(DomainError::Maintenance)
        | AppErrorKind::External(ExternalError::FundingShortfall { .. }) => {
            Some(HeaderValue::from_static(RETRY_AFTER_SECS))
        }
        _ => None,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(error = %self, request_id = ?self.request_id, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, request_id = ?self.request_id, status = status.as_u16(), "request rejected");
        }

        let mut response = (status, Json(ErrorResponse::from(&self))).into_response();
        if let Some(value) = retry_after(&self) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    pub timestamp: String,
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

pub fn success_response<T: Serialize>(data: T) -> ApiResponse<T> {
    ApiResponse {
        success: true,
        data,
        timestamp: Utc::now().to_rfc3339(),
    }
}

/// Id assigned by `SetRequestIdLayer`, echoed into error bodies.
pub fn request_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn promo_rejection_keeps_request_id_and_context() {
        let error = AppError::domain(DomainError::PromoRejected {
            code: "SPRING".to_string(),
            reason: "already used".to_string(),
        })
        .with_request_id("req_123")
        .with_context("promo activation");

        let body = ErrorResponse::from(&error);
        assert_eq!(body.error, ErrorCode::PromoRejected);
        assert_eq!(body.request_id.as_deref(), Some("req_123"));
        assert_eq!(body.context.as_deref(), Some("promo activation"));
        assert!(!body.retryable);
    }

    #[test]
    fn maintenance_carries_retry_after() {
        let response = AppError::domain(DomainError::Maintenance).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).map(|v| v.as_bytes()),
            Some(RETRY_AFTER_SECS.as_bytes())
        );
    }

    #[test]
    fn validation_error_is_bad_request_without_retry_after() {
        let response = AppError::validation(ValidationError::InvalidRecipient {
            handle: "a b".to_string(),
            reason: "not a username".to_string(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn request_id_is_read_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("abc"));
        assert_eq!(request_id(&headers), Some("abc".to_string()));
        assert_eq!(request_id(&HeaderMap::new()), None);
    }
}
