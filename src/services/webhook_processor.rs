use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::database::ledger::LedgerError;
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{GatewayKind, SettlementMode};
use crate::services::settlement::{SettlementOutcome, SettlementService, SettlementSource};

#[derive(Debug, Error)]
pub enum WebhookProcessorError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Unknown gateway: {0}")]
    UnknownGateway(String),
    #[error("Malformed payload: {0}")]
    Malformed(String),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl WebhookProcessorError {
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookProcessorError::InvalidSignature => 403,
            WebhookProcessorError::UnknownGateway(_) => 404,
            WebhookProcessorError::Malformed(_) => 400,
            WebhookProcessorError::Ledger(_) => 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WebhookOutcome {
    Settled { order_id: String },
    AlreadySettled { order_id: String },
    /// Verified, but not an "invoice paid" event
    Ignored { event_type: String },
}

pub struct WebhookProcessor {
    gateways: Arc<GatewayRegistry>,
    settlement: Arc<SettlementService>,
}

impl WebhookProcessor {
    pub fn new(gateways: Arc<GatewayRegistry>, settlement: Arc<SettlementService>) -> Self {
        Self {
            gateways,
            settlement,
        }
    }

    /// Verify and apply one push notification. `payload` must be the raw
    /// request body; the signature covers its exact bytes.
    pub async fn process_webhook(
        &self,
        gateway_name: &str,
        signature: Option<&str>,
        payload: &[u8],
    ) -> Result<WebhookOutcome, WebhookProcessorError> {
        let kind: GatewayKind = gateway_name
            .parse()
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;
        if kind.settlement_mode() != SettlementMode::Push {
            return Err(WebhookProcessorError::UnknownGateway(gateway_name.to_string()));
        }
        let gateway = self
            .gateways
            .get(kind)
            .map_err(|_| WebhookProcessorError::UnknownGateway(gateway_name.to_string()))?;

        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookProcessorError::InvalidSignature)?;
        let verification = gateway
            .verify_webhook(payload, signature)
            .map_err(|_| WebhookProcessorError::InvalidSignature)?;
        if !verification.valid {
            error!(gateway = %kind, reason = ?verification.reason, "Invalid webhook signature");
            return Err(WebhookProcessorError::InvalidSignature);
        }

        let event = gateway.parse_webhook_event(payload).map_err(|e| match e {
            PaymentError::MalformedPayload { message } => WebhookProcessorError::Malformed(message),
            other => WebhookProcessorError::Malformed(other.to_string()),
        })?;

        let order_id = match event.order_id {
            Some(order_id) => order_id,
            None => {
                info!(gateway = %kind, event_type = %event.event_type, "Ignoring webhook event");
                return Ok(WebhookOutcome::Ignored {
                    event_type: event.event_type,
                });
            }
        };

        match self
            .settlement
            .settle(&order_id, SettlementSource::Webhook)
            .await
        {
            Ok(SettlementOutcome::Settled(_)) => Ok(WebhookOutcome::Settled { order_id }),
            Ok(SettlementOutcome::AlreadySettled) => {
                info!(order_id = %order_id, "Webhook for payment that is no longer pending");
                Ok(WebhookOutcome::AlreadySettled { order_id })
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Webhook settlement failed");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ledger::{LedgerStore, NewPayment};
    use crate::database::memory::InMemoryLedgerStore;
    use crate::payments::providers::{CryptoBotConfig, CryptoBotGateway};
    use crate::payments::utils::verify_hmac_sha256_hex;
    use crate::services::notification::LogNotifier;
    use hmac::{Hmac, Mac};
    use rust_decimal::Decimal;
    use sha2::{Digest, Sha256};

    const TOKEN: &str = "12345:AAAtesttoken";

    fn sign(body: &[u8]) -> String {
        let key = Sha256::digest(TOKEN.as_bytes());
        let mut mac = Hmac::<Sha256>::new_from_slice(&key).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    async fn processor() -> (WebhookProcessor, Arc<InMemoryLedgerStore>) {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger
            .create_payment(NewPayment {
                order_id: "starbot-1-4242".to_string(),
                user_id: 3,
                gateway: GatewayKind::CryptoBot,
                amount: Decimal::from(50),
                invoice_url: None,
                external_invoice_id: None,
                message_id: None,
            })
            .await
            .unwrap();
        let gateway = CryptoBotGateway::new(CryptoBotConfig {
            api_token: TOKEN.to_string(),
            ..CryptoBotConfig::default()
        })
        .unwrap();
        let registry = Arc::new(GatewayRegistry::new().with_gateway(Arc::new(gateway)));
        let settlement = Arc::new(SettlementService::new(ledger.clone(), Arc::new(LogNotifier)));
        (WebhookProcessor::new(registry, settlement), ledger)
    }

    fn paid_body() -> Vec<u8> {
        br#"{"update_type":"invoice_paid","payload":{"invoice_id":9,"status":"paid","payload":"starbot-1-4242"}}"#.to_vec()
    }

    #[tokio::test]
    async fn signed_invoice_paid_settles_once() {
        let (processor, ledger) = processor().await;
        let body = paid_body();
        let sig = sign(&body);
        assert!(verify_hmac_sha256_hex(&body, &Sha256::digest(TOKEN.as_bytes()), &sig));

        let first = processor.process_webhook("cryptobot", Some(&sig), &body).await.unwrap();
        let second = processor.process_webhook("cryptobot", Some(&sig), &body).await.unwrap();
        assert!(matches!(first, WebhookOutcome::Settled { .. }));
        assert!(matches!(second, WebhookOutcome::AlreadySettled { .. }));
        assert_eq!(ledger.get_user(3).await.unwrap().unwrap().balance, Decimal::from(50));
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_without_settling() {
        let (processor, ledger) = processor().await;
        let err = processor
            .process_webhook("cryptobot", Some("deadbeef"), &paid_body())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        let err = processor
            .process_webhook("cryptobot", None, &paid_body())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(ledger.get_user(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn poll_gateways_and_unknown_names_are_404() {
        let (processor, _) = processor().await;
        for name in ["lzt", "crystalpay", "paypal"] {
            let err = processor
                .process_webhook(name, Some("x"), b"{}")
                .await
                .unwrap_err();
            assert_eq!(err.status_code(), 404, "{}", name);
        }
    }

    #[tokio::test]
    async fn other_events_are_acknowledged() {
        let (processor, _) = processor().await;
        let body = br#"{"update_type":"invoice_expired","payload":{}}"#;
        let outcome = processor
            .process_webhook("cryptobot", Some(&sign(body)), body)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Ignored {
                event_type: "invoice_expired".to_string()
            }
        );
    }

    #[tokio::test]
    async fn malformed_signed_body_is_400() {
        let (processor, _) = processor().await;
        let body = b"not json";
        let err = processor
            .process_webhook("cryptobot", Some(&sign(body)), body)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);

        let body = br#"{"update_type":"invoice_paid","payload":{}}"#;
        let err = processor
            .process_webhook("cryptobot", Some(&sign(body)), body)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
