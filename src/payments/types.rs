use crate::payments::error::PaymentError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum GatewayKind {
    #[serde(rename = "cryptobot")]
    CryptoBot,
    #[serde(rename = "lzt")]
    LolzTeam,
    #[serde(rename = "crystalpay")]
    CrystalPay,
}

/// How a gateway tells us an invoice was paid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Signed webhook callback; never polled
    Push,
    /// Status is polled by the reconciliation loop
    Poll,
}

impl GatewayKind {
    pub const ALL: [GatewayKind; 3] = [
        GatewayKind::CryptoBot,
        GatewayKind::LolzTeam,
        GatewayKind::CrystalPay,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayKind::CryptoBot => "cryptobot",
            GatewayKind::LolzTeam => "lzt",
            GatewayKind::CrystalPay => "crystalpay",
        }
    }

    pub fn settlement_mode(&self) -> SettlementMode {
        match self {
            GatewayKind::CryptoBot => SettlementMode::Push,
            GatewayKind::LolzTeam | GatewayKind::CrystalPay => SettlementMode::Poll,
        }
    }

    pub fn is_polled(&self) -> bool {
        self.settlement_mode() == SettlementMode::Poll
    }

    /// Header carrying the webhook signature, for push gateways.
    pub fn signature_header(&self) -> Option<&'static str> {
        match self {
            GatewayKind::CryptoBot => Some("crypto-pay-api-signature"),
            GatewayKind::LolzTeam | GatewayKind::CrystalPay => None,
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for GatewayKind {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cryptobot" | "cryptopay" => Ok(GatewayKind::CryptoBot),
            "lzt" | "lolz" | "lolzteam" => Ok(GatewayKind::LolzTeam),
            "crystalpay" => Ok(GatewayKind::CrystalPay),
            _ => Err(PaymentError::UnknownGateway {
                name: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRequest {
    pub user_id: i64,
    /// Amount in the settlement currency
    pub amount: Decimal,
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Invoice {
    pub pay_url: String,
    pub order_id: String,
    /// Gateway-side invoice id, when the gateway issues one
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusQuery {
    pub order_id: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookVerificationResult {
    pub valid: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub gateway: GatewayKind,
    pub event_type: String,
    /// Set only for "invoice paid" events
    pub order_id: Option<String>,
    pub payload: JsonValue,
    pub received_at: String,
}

impl WebhookEvent {
    pub fn is_payment(&self) -> bool {
        self.order_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_kind_parses_aliases() {
        assert_eq!(
            GatewayKind::from_str("CryptoBot").unwrap(),
            GatewayKind::CryptoBot
        );
        assert_eq!(GatewayKind::from_str("lzt").unwrap(), GatewayKind::LolzTeam);
        assert_eq!(
            GatewayKind::from_str("lolzteam").unwrap(),
            GatewayKind::LolzTeam
        );
        assert!(GatewayKind::from_str("paypal").is_err());
    }

    #[test]
    fn only_cryptobot_is_push() {
        assert_eq!(
            GatewayKind::CryptoBot.settlement_mode(),
            SettlementMode::Push
        );
        assert!(GatewayKind::LolzTeam.is_polled());
        assert!(GatewayKind::CrystalPay.is_polled());
    }

    #[test]
    fn gateway_kind_serializes_as_wire_name() {
        let json = serde_json::to_value(GatewayKind::LolzTeam).unwrap();
        assert_eq!(json, serde_json::json!("lzt"));
    }
}
