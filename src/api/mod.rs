//! HTTP surface: gateway webhooks plus the internal API used by the chat
//! front end.

pub mod purchases;
pub mod topups;
pub mod users;
pub mod webhooks;

use crate::database::ledger::LedgerStore;
use crate::middleware::auth::{require_internal_token, InternalToken};
use crate::services::fulfillment::FulfillmentEngine;
use crate::services::pricing::PricingService;
use crate::services::topup::TopUpService;
use crate::services::webhook_processor::WebhookProcessor;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Shared state of the internal API handlers
#[derive(Clone)]
pub struct ApiState {
    pub ledger: Arc<dyn LedgerStore>,
    pub topups: Arc<TopUpService>,
    pub fulfillment: Arc<FulfillmentEngine>,
    pub pricing: Arc<PricingService>,
}

pub fn internal_routes(state: ApiState, token: InternalToken) -> Router {
    Router::new()
        .route("/api/topups", post(topups::create_topup))
        .route("/api/topups/{order_id}/cancel", post(topups::cancel_topup))
        .route("/api/purchases", post(purchases::create_purchase))
        .route("/api/users/{user_id}", get(users::get_user))
        .route("/api/users/{user_id}/promo", post(users::activate_promo))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            token,
            require_internal_token,
        ))
}

pub fn webhook_routes(processor: Arc<WebhookProcessor>) -> Router {
    Router::new()
        .route("/webhooks/{gateway}", post(webhooks::handle_webhook))
        .with_state(Arc::new(webhooks::WebhookState { processor }))
}
