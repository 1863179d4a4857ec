use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::api::ApiState;
use crate::database::ledger::{LedgerError, PurchaseRecord, User, UserStats};
use crate::error::AppError;
use crate::middleware::error::success_response;

const HISTORY_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub stats: UserStats,
    pub recent_purchases: Vec<PurchaseRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PromoRequest {
    pub code: String,
}

/// GET /api/users/{user_id}
pub async fn get_user(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .ledger
        .get_user(user_id)
        .await?
        .ok_or(LedgerError::UserNotFound { user_id })?;
    let stats = state.ledger.user_stats(user_id).await?;
    let recent_purchases = state.ledger.purchase_history(user_id, HISTORY_LIMIT).await?;

    Ok(success_response(UserProfile {
        user,
        stats,
        recent_purchases,
    }))
}

/// POST /api/users/{user_id}/promo
pub async fn activate_promo(
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(body): Json<PromoRequest>,
) -> Result<impl IntoResponse, AppError> {
    let code = body.code.trim();
    let activation = state.ledger.activate_promo(user_id, code).await?;
    Ok(success_response(activation))
}
