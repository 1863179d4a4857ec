use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use tracing::info;

use crate::api::ApiState;
use crate::error::AppError;
use crate::middleware::error::{request_id, success_response};
use crate::services::topup::TopUpRequest;

/// POST /api/topups
pub async fn create_topup(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<TopUpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = request_id(&headers);
    let invoice = state.topups.request_top_up(request).await.map_err(|e| {
        let err = AppError::from(e);
        match request_id {
            Some(id) => err.with_request_id(id),
            None => err,
        }
    })?;
    Ok((StatusCode::CREATED, success_response(invoice)))
}

/// POST /api/topups/{order_id}/cancel
pub async fn cancel_topup(
    State(state): State<ApiState>,
    Path(order_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let cancelled = state.topups.cancel_pending_payment(&order_id).await?;
    info!(order_id = %order_id, cancelled, "cancel requested");
    Ok(success_response(serde_json::json!({
        "order_id": order_id,
        "cancelled": cancelled,
    })))
}
