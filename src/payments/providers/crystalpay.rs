use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{GatewayKind, Invoice, InvoiceRequest, StatusQuery};
use crate::payments::utils::{GatewayAuth, PaymentHttpClient};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct CrystalPayConfig {
    pub login: String,
    pub secret: String,
    pub api_url: String,
    /// Invoice lifetime in minutes
    pub lifetime_minutes: u64,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for CrystalPayConfig {
    fn default() -> Self {
        Self {
            login: String::new(),
            secret: String::new(),
            api_url: "https://api.crystalpay.io/v2".to_string(),
            lifetime_minutes: 15,
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl CrystalPayConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let login = std::env::var("CRYSTALPAY_LOGIN")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let secret = std::env::var("CRYSTALPAY_SECRET_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty());
        let (login, secret) = match (login, secret) {
            (Some(login), Some(secret)) => (login, secret),
            _ => {
                return Err(PaymentError::NotConfigured {
                    gateway: "crystalpay".to_string(),
                })
            }
        };
        let defaults = Self::default();

        Ok(Self {
            login,
            secret,
            api_url: std::env::var("CRYSTALPAY_API_URL").unwrap_or(defaults.api_url),
            lifetime_minutes: std::env::var("PAYMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| (secs / 60).max(1))
                .unwrap_or(defaults.lifetime_minutes),
            timeout_secs: std::env::var("CRYSTALPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("CRYSTALPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct CrystalPayGateway {
    config: CrystalPayConfig,
    http: PaymentHttpClient,
}

impl CrystalPayGateway {
    pub fn new(config: CrystalPayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "crystalpay",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        Ok(Self { config, http })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CrystalPayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.api_url.trim_end_matches('/'), path)
    }
}

fn is_paid_state(state: &str) -> bool {
    matches!(state, "payed" | "paid")
}

fn describe_errors(errors: &[JsonValue]) -> String {
    if errors.is_empty() {
        return "unknown error".to_string();
    }
    errors
        .iter()
        .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
impl PaymentGateway for CrystalPayGateway {
    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice> {
        let payload = serde_json::json!({
            "auth_login": self.config.login,
            "auth_secret": self.config.secret,
            "amount": request.amount.to_string(),
            "type": "purchase",
            "lifetime": self.config.lifetime_minutes,
            "extra": request.order_id,
        });

        let raw: CrystalPayCreated = self
            .http
            .post_json(&self.endpoint("/invoice/create/"), GatewayAuth::None, &payload)
            .await?;

        if raw.error {
            return Err(PaymentError::gateway(
                "crystalpay",
                format!("invoice/create failed: {}", describe_errors(&raw.errors)),
            ));
        }
        let (url, id) = match (raw.url, raw.id) {
            (Some(url), Some(id)) => (url, id),
            _ => {
                return Err(PaymentError::gateway(
                    "crystalpay",
                    "invoice/create returned no url or id",
                ))
            }
        };

        info!(order_id = %request.order_id, invoice_id = %id, "crystalpay invoice created");

        Ok(Invoice {
            pay_url: url,
            order_id: request.order_id,
            external_id: Some(id),
        })
    }

    async fn check_status(&self, query: StatusQuery) -> PaymentResult<bool> {
        let invoice_id = query
            .external_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::MissingInvoiceId {
                gateway: "crystalpay".to_string(),
                order_id: query.order_id.clone(),
            })?;

        let payload = serde_json::json!({
            "auth_login": self.config.login,
            "auth_secret": self.config.secret,
            "id": invoice_id,
        });

        let raw: CrystalPayInfo = self
            .http
            .post_json(&self.endpoint("/invoice/info/"), GatewayAuth::None, &payload)
            .await?;

        if raw.error {
            return Err(PaymentError::gateway(
                "crystalpay",
                format!("invoice/info failed: {}", describe_errors(&raw.errors)),
            ));
        }
        Ok(raw.state.as_deref().map(is_paid_state).unwrap_or(false))
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::CrystalPay
    }
}

#[derive(Debug, Deserialize)]
struct CrystalPayCreated {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    errors: Vec<JsonValue>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrystalPayInfo {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    errors: Vec<JsonValue>,
    #[serde(default)]
    state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payed_and_paid_both_count() {
        assert!(is_paid_state("payed"));
        assert!(is_paid_state("paid"));
        assert!(!is_paid_state("notpayed"));
        assert!(!is_paid_state("processing"));
    }

    #[test]
    fn info_response_deserializes() {
        let raw: CrystalPayInfo = serde_json::from_value(serde_json::json!({
            "error": false,
            "errors": [],
            "id": "abc",
            "state": "payed"
        }))
        .unwrap();
        assert!(!raw.error);
        assert_eq!(raw.state.as_deref(), Some("payed"));
    }

    #[test]
    fn errors_are_joined() {
        let errors = vec![serde_json::json!("bad auth"), serde_json::json!({"code": 1})];
        assert_eq!(describe_errors(&errors), "bad auth; {\"code\":1}");
        assert_eq!(describe_errors(&[]), "unknown error");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let gateway = CrystalPayGateway::new(CrystalPayConfig {
            login: "login".to_string(),
            secret: "secret".to_string(),
            api_url: "https://api.crystalpay.io/v2/".to_string(),
            ..CrystalPayConfig::default()
        })
        .unwrap();
        assert_eq!(
            gateway.endpoint("/invoice/info/"),
            "https://api.crystalpay.io/v2/invoice/info/"
        );
    }
}
