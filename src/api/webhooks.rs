use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::payments::types::GatewayKind;
use crate::services::webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookProcessorError};

pub struct WebhookState {
    pub processor: Arc<WebhookProcessor>,
}

fn signature_header(gateway: &str) -> Option<&'static str> {
    GatewayKind::from_str(gateway)
        .ok()
        .and_then(|kind| kind.signature_header())
}

/// POST /webhooks/{gateway}
///
/// The body is taken as raw bytes; the signature is computed over them.
pub async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    info!(gateway = %gateway, bytes = body.len(), "Received webhook");

    let signature = signature_header(&gateway)
        .and_then(|name| headers.get(name))
        .and_then(|v| v.to_str().ok());

    match state
        .processor
        .process_webhook(&gateway, signature, &body)
        .await
    {
        Ok(WebhookOutcome::Settled { order_id }) => {
            info!(gateway = %gateway, order_id = %order_id, "Webhook settled payment");
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Ok(WebhookOutcome::AlreadySettled { .. }) | Ok(WebhookOutcome::Ignored { .. }) => {
            (StatusCode::OK, Json(serde_json::json!({"status": "ok"}))).into_response()
        }
        Err(e @ WebhookProcessorError::UnknownGateway(_)) => {
            warn!(gateway = %gateway, "Webhook for unknown gateway");
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
        Err(e @ WebhookProcessorError::InvalidSignature) => {
            warn!(gateway = %gateway, "Invalid webhook signature");
            (StatusCode::FORBIDDEN, e.to_string()).into_response()
        }
        Err(e @ WebhookProcessorError::Malformed(_)) => {
            warn!(gateway = %gateway, error = %e, "Malformed webhook payload");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        Err(e @ WebhookProcessorError::Ledger(_)) => {
            error!(gateway = %gateway, error = %e, "Webhook processing failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Processing failed").into_response()
        }
    }
}
