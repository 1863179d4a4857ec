use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::api::ApiState;
use crate::database::ledger::LedgerError;
use crate::error::AppError;
use crate::middleware::error::{request_id, success_response};
use crate::services::fulfillment::{PurchaseKind, PurchaseRequest};

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub user_id: i64,
    #[serde(flatten)]
    pub kind: PurchaseKind,
    pub recipient: String,
    /// Quoted total shown to the user; computed from the price list and the
    /// user's discount when absent.
    #[serde(default)]
    pub total: Option<Decimal>,
}

/// POST /api/purchases
pub async fn create_purchase(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreatePurchaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request_id = request_id(&headers);
    let with_id = |err: AppError| match &request_id {
        Some(id) => err.with_request_id(id.clone()),
        None => err,
    };

    let user = state
        .ledger
        .get_user(body.user_id)
        .await
        .map_err(|e| with_id(e.into()))?
        .ok_or_else(|| with_id(LedgerError::UserNotFound { user_id: body.user_id }.into()))?;
    let quote = state
        .pricing
        .quote(&body.kind, user.discount)
        .map_err(|e| with_id(e.into()))?;

    let receipt = state
        .fulfillment
        .purchase(PurchaseRequest {
            user_id: body.user_id,
            kind: body.kind,
            recipient: body.recipient,
            total: body.total.unwrap_or(quote.total),
        })
        .await
        .map_err(|e| with_id(e.into()))?;

    Ok(success_response(receipt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_flattened_into_the_body() {
        let body: CreatePurchaseRequest = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "kind": "stars",
            "quantity": 100,
            "recipient": "@someone"
        }))
        .unwrap();
        assert_eq!(body.kind, PurchaseKind::Stars { quantity: 100 });
        assert!(body.total.is_none());

        let body: CreatePurchaseRequest = serde_json::from_value(serde_json::json!({
            "user_id": 1,
            "kind": "premium",
            "months": 6,
            "recipient": "someone",
            "total": "1274.15"
        }))
        .unwrap();
        assert_eq!(body.kind, PurchaseKind::Premium { months: 6 });
        assert_eq!(body.total, Some(Decimal::new(127415, 2)));
    }
}
