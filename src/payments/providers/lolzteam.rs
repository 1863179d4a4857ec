//! LolzTeam Market transfers. The pay link is built locally; settlement is
//! found by scanning the merchant's incoming payments for the order id in
//! the transfer comment.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{GatewayKind, Invoice, InvoiceRequest, StatusQuery};
use crate::payments::utils::{GatewayAuth, PaymentHttpClient};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LolzTeamConfig {
    pub token: String,
    /// Merchant account receiving transfers
    pub user_id: String,
    pub market_url: String,
    pub api_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for LolzTeamConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            user_id: String::new(),
            market_url: "https://lzt.market".to_string(),
            api_url: "https://prod-api.lzt.market".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl LolzTeamConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let token = std::env::var("LZT_TOKEN").ok().filter(|v| !v.trim().is_empty());
        let user_id = std::env::var("LZT_USER_ID")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let (token, user_id) = match (token, user_id) {
            (Some(token), Some(user_id)) => (token, user_id),
            _ => {
                return Err(PaymentError::NotConfigured {
                    gateway: "lzt".to_string(),
                })
            }
        };
        let defaults = Self::default();

        Ok(Self {
            token,
            user_id,
            market_url: std::env::var("LZT_MARKET_URL").unwrap_or(defaults.market_url),
            api_url: std::env::var("LZT_API_URL").unwrap_or(defaults.api_url),
            timeout_secs: std::env::var("LZT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("LZT_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct LolzTeamGateway {
    config: LolzTeamConfig,
    http: PaymentHttpClient,
}

impl LolzTeamGateway {
    pub fn new(config: LolzTeamConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "lzt",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(LolzTeamConfig::from_env()?)
    }

    pub fn payment_link(&self, request: &InvoiceRequest) -> String {
        format!(
            "{}/balance/transfer?user_id={}&hold=0&amount={}&comment={}",
            self.config.market_url.trim_end_matches('/'),
            self.config.user_id,
            request.amount.normalize(),
            request.order_id
        )
    }
}

fn is_matching_payment(payment: &JsonValue, order_id: &str) -> bool {
    let comment = payment
        .get("data")
        .and_then(|d| d.get("comment"))
        .and_then(|c| c.as_str());
    comment == Some(order_id)
        && payment.get("operation_type").and_then(|v| v.as_str()) == Some("receiving_money")
        && payment.get("payment_status").and_then(|v| v.as_str()) == Some("success_in")
}

/// The `payments` field is either an id-keyed map or a list.
pub fn payments_contain_order(response: &JsonValue, order_id: &str) -> bool {
    match response.get("payments") {
        Some(JsonValue::Object(map)) => map.values().any(|p| is_matching_payment(p, order_id)),
        Some(JsonValue::Array(list)) => list.iter().any(|p| is_matching_payment(p, order_id)),
        _ => false,
    }
}

#[async_trait]
impl PaymentGateway for LolzTeamGateway {
    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice> {
        Ok(Invoice {
            pay_url: self.payment_link(&request),
            order_id: request.order_id,
            external_id: None,
        })
    }

    async fn check_status(&self, query: StatusQuery) -> PaymentResult<bool> {
        let url = format!("{}/user/payments", self.config.api_url.trim_end_matches('/'));
        let response: JsonValue = self
            .http
            .get_json(&url, GatewayAuth::Bearer(&self.config.token))
            .await?;

        let paid = payments_contain_order(&response, &query.order_id);
        debug!(order_id = %query.order_id, paid, "lzt payment lookup");
        Ok(paid)
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::LolzTeam
    }
}
