//! Crypto Pay (CryptoBot) adapter. Push-only: invoices are settled from the
//! signed `invoice_paid` webhook, never polled by the reconciliation loop.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::types::{
    GatewayKind, Invoice, InvoiceRequest, StatusQuery, WebhookEvent, WebhookVerificationResult,
};
use crate::payments::utils::{verify_hmac_sha256_hex, GatewayAuth, PaymentHttpClient};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

const TOKEN_HEADER: &str = "Crypto-Pay-API-Token";
const INVOICE_PAID: &str = "invoice_paid";

#[derive(Debug, Clone)]
pub struct CryptoBotConfig {
    pub api_token: String,
    pub base_url: String,
    pub invoice_ttl_secs: u64,
    /// USDT→RUB rate used when `getExchangeRates` is unavailable
    pub fallback_rate: Decimal,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for CryptoBotConfig {
    fn default() -> Self {
        Self {
            api_token: String::new(),
            base_url: "https://pay.crypt.bot/api/".to_string(),
            invoice_ttl_secs: 900,
            fallback_rate: Decimal::from(95),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl CryptoBotConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let api_token = std::env::var("CRYPTOPAY_TOKEN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::NotConfigured {
                gateway: "cryptobot".to_string(),
            })?;
        let defaults = Self::default();

        Ok(Self {
            api_token,
            base_url: std::env::var("CRYPTOPAY_BASE_URL").unwrap_or(defaults.base_url),
            invoice_ttl_secs: std::env::var("PAYMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.invoice_ttl_secs),
            fallback_rate: std::env::var("CRYPTOPAY_FALLBACK_RATE")
                .ok()
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or(defaults.fallback_rate),
            timeout_secs: std::env::var("CRYPTOPAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(defaults.timeout_secs),
            max_retries: std::env::var("CRYPTOPAY_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(defaults.max_retries),
        })
    }
}

pub struct CryptoBotGateway {
    config: CryptoBotConfig,
    http: PaymentHttpClient,
    /// SHA-256 of the API token, the HMAC key for webhook signatures
    webhook_key: [u8; 32],
}

impl CryptoBotGateway {
    pub fn new(config: CryptoBotConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(
            "cryptobot",
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;
        let webhook_key: [u8; 32] = Sha256::digest(config.api_token.as_bytes()).into();
        Ok(Self {
            config,
            http,
            webhook_key,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(CryptoBotConfig::from_env()?)
    }

    fn auth(&self) -> GatewayAuth<'_> {
        GatewayAuth::Header(TOKEN_HEADER, &self.config.api_token)
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}{}", self.config.base_url, method)
    }

    /// Current USDT→RUB rate, or the configured fallback.
    pub async fn usdt_rub_rate(&self) -> Decimal {
        let response: PaymentResult<CryptoBotEnvelope<Vec<ExchangeRate>>> = self
            .http
            .get_json(&self.endpoint("getExchangeRates"), self.auth())
            .await;

        match response {
            Ok(envelope) if envelope.ok => {
                let rate = envelope.result.unwrap_or_default().into_iter().find_map(|r| {
                    (r.source == "USDT" && r.target == "RUB")
                        .then(|| Decimal::from_str(&r.rate).ok())
                        .flatten()
                });
                match rate {
                    Some(rate) if rate > Decimal::ZERO => return rate,
                    _ => warn!("USDT/RUB pair missing from exchange rates"),
                }
            }
            Ok(envelope) => warn!(error = ?envelope.error, "getExchangeRates rejected"),
            Err(e) => warn!(error = %e, "getExchangeRates failed"),
        }
        warn!(rate = %self.config.fallback_rate, "falling back to default USDT/RUB rate");
        self.config.fallback_rate
    }
}

/// Settlement-currency amount converted to USD, two decimal places.
pub fn convert_to_usd(amount: Decimal, rate: Decimal) -> Decimal {
    if rate <= Decimal::ZERO {
        return amount.round_dp(2);
    }
    (amount / rate).round_dp(2)
}

#[async_trait]
impl PaymentGateway for CryptoBotGateway {
    async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice> {
        let rate = self.usdt_rub_rate().await;
        let amount_usd = convert_to_usd(request.amount, rate);
        if amount_usd <= Decimal::ZERO {
            return Err(PaymentError::AmountRejected {
                gateway: "cryptobot".to_string(),
                amount: request.amount,
                reason: "below the smallest crypto invoice".to_string(),
            });
        }

        let payload = serde_json::json!({
            "currency_type": "fiat",
            "fiat": "USD",
            "amount": amount_usd.to_string(),
            "description": format!("Balance top-up for user {}", request.user_id),
            "payload": request.order_id,
            "expires_in": self.config.invoice_ttl_secs,
        });

        let raw: CryptoBotEnvelope<CreatedInvoice> = self
            .http
            .post_json(&self.endpoint("createInvoice"), self.auth(), &payload)
            .await?;

        let created = match (raw.ok, raw.result) {
            (true, Some(created)) => created,
            (_, _) => {
                return Err(PaymentError::gateway(
                    "cryptobot",
                    format!("createInvoice failed: {}", raw.error.unwrap_or_default()),
                ))
            }
        };
        let pay_url = created
            .bot_invoice_url
            .or(created.pay_url)
            .ok_or_else(|| PaymentError::gateway("cryptobot", "invoice has no payment url"))?;

        info!(
            order_id = %request.order_id,
            invoice_id = created.invoice_id,
            amount_usd = %amount_usd,
            "cryptobot invoice created"
        );

        Ok(Invoice {
            pay_url,
            order_id: request.order_id,
            external_id: Some(created.invoice_id.to_string()),
        })
    }

    async fn check_status(&self, query: StatusQuery) -> PaymentResult<bool> {
        let invoice_id = query
            .external_id
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::MissingInvoiceId {
                gateway: "cryptobot".to_string(),
                order_id: query.order_id.clone(),
            })?;

        let raw: CryptoBotEnvelope<InvoiceList> = self
            .http
            .get_json(
                &self.endpoint(&format!("getInvoices?invoice_ids={}", invoice_id)),
                self.auth(),
            )
            .await?;

        Ok(raw
            .result
            .map(|list| list.items.iter().any(|i| i.status == "paid"))
            .unwrap_or(false))
    }

    fn kind(&self) -> GatewayKind {
        GatewayKind::CryptoBot
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        let valid = !signature.trim().is_empty()
            && verify_hmac_sha256_hex(payload, &self.webhook_key, signature);
        Ok(WebhookVerificationResult {
            valid,
            reason: if valid {
                None
            } else {
                Some("invalid cryptobot signature".to_string())
            },
        })
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        parse_update(payload)
    }
}

/// Parse a Crypto Pay update. Only `invoice_paid` carries an order id.
pub fn parse_update(payload: &[u8]) -> PaymentResult<WebhookEvent> {
    let parsed: JsonValue =
        serde_json::from_slice(payload).map_err(|e| PaymentError::MalformedPayload {
            message: format!("invalid webhook JSON payload: {}", e),
        })?;

    let event_type = parsed
        .get("update_type")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let order_id = if event_type == INVOICE_PAID {
        let invoice = parsed.get("payload");
        let order_id = invoice
            .and_then(|v| v.get("payload"))
            .and_then(|v| v.as_str())
            .or_else(|| {
                invoice
                    .and_then(|v| v.get("order_id"))
                    .and_then(|v| v.as_str())
            })
            .filter(|v| !v.trim().is_empty())
            .ok_or(PaymentError::MalformedPayload {
                message: "invoice_paid update without order id".to_string(),
            })?;
        Some(order_id.to_string())
    } else {
        None
    };

    Ok(WebhookEvent {
        gateway: GatewayKind::CryptoBot,
        event_type,
        order_id,
        payload: parsed,
        received_at: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct CryptoBotEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct ExchangeRate {
    source: String,
    target: String,
    rate: String,
}

#[derive(Debug, Deserialize)]
struct CreatedInvoice {
    invoice_id: i64,
    #[serde(default)]
    pay_url: Option<String>,
    #[serde(default)]
    bot_invoice_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InvoiceList {
    #[serde(default)]
    items: Vec<InvoiceItem>,
}

#[derive(Debug, Deserialize)]
struct InvoiceItem {
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};

    fn gateway() -> CryptoBotGateway {
        CryptoBotGateway::new(CryptoBotConfig {
            api_token: "12345:AAAtoken".to_string(),
            timeout_secs: 5,
            max_retries: 0,
            ..CryptoBotConfig::default()
        })
        .expect("gateway init should succeed")
    }

    fn sign(token: &str, body: &[u8]) -> String {
        let key = Sha256::digest(token.as_bytes());
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn webhook_signature_uses_sha256_of_token() {
        let gateway = gateway();
        let body = br#"{"update_type":"invoice_paid","payload":{"payload":"starbot-1-1000"}}"#;

        let good = gateway
            .verify_webhook(body, &sign("12345:AAAtoken", body))
            .unwrap();
        assert!(good.valid);

        let wrong_key = gateway.verify_webhook(body, &sign("other", body)).unwrap();
        assert!(!wrong_key.valid);

        let empty = gateway.verify_webhook(body, "").unwrap();
        assert!(!empty.valid);
    }

    #[test]
    fn invoice_paid_update_yields_order_id() {
        let event = parse_update(
            br#"{"update_id":1,"update_type":"invoice_paid","payload":{"invoice_id":9,"status":"paid","payload":"starbot-1700000000-4321"}}"#,
        )
        .unwrap();
        assert_eq!(event.order_id.as_deref(), Some("starbot-1700000000-4321"));
        assert!(event.is_payment());
    }

    #[test]
    fn order_id_falls_back_to_order_id_field() {
        let event = parse_update(
            br#"{"update_type":"invoice_paid","payload":{"order_id":"starbot-1-2000"}}"#,
        )
        .unwrap();
        assert_eq!(event.order_id.as_deref(), Some("starbot-1-2000"));
    }

    #[test]
    fn other_updates_are_not_payments() {
        let event = parse_update(br#"{"update_type":"invoice_expired","payload":{}}"#).unwrap();
        assert!(!event.is_payment());
        assert_eq!(event.event_type, "invoice_expired");
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        assert!(matches!(
            parse_update(b"not json"),
            Err(PaymentError::MalformedPayload { .. })
        ));
        assert!(matches!(
            parse_update(br#"{"update_type":"invoice_paid","payload":{}}"#),
            Err(PaymentError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn rub_amount_is_converted_to_usd() {
        assert_eq!(
            convert_to_usd(Decimal::from(950), Decimal::from(95)),
            Decimal::from(10)
        );
        assert_eq!(
            convert_to_usd(Decimal::from(100), Decimal::new(925, 1)),
            Decimal::new(108, 2)
        );
    }
}
