//! User notifications and operator alerts.
//!
//! Notifications are fire-and-forget: a failed delivery is logged and never
//! propagated into the ledger or saga that triggered it.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Nano-units to whole TON for display.
pub fn format_ton(nano: u64) -> String {
    Decimal::from_i128_with_scale(i128::from(nano), 9)
        .normalize()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorAlert {
    RecipientNotFound {
        user_id: i64,
        handle: String,
    },
    PlatformRejected {
        user_id: i64,
        message: String,
    },
    FundingShortfall {
        user_id: i64,
        required_nano: u64,
        available_nano: u64,
    },
    OnChainFailure {
        user_id: i64,
        message: String,
    },
    /// Delivery platform cookies were rejected
    SessionExpired {
        platform: String,
    },
    Sale {
        user_id: i64,
        description: String,
        amount: Decimal,
        profit: Decimal,
        margin_percent: Decimal,
    },
}

impl OperatorAlert {
    pub fn render(&self) -> String {
        match self {
            OperatorAlert::RecipientNotFound { user_id, handle } => format!(
                "⚠️ <b>Recipient not found</b>\nUser: <code>{}</code>\nHandle: @{}",
                user_id, handle
            ),
            OperatorAlert::PlatformRejected { user_id, message } => format!(
                "⚠️ <b>Delivery platform rejected a purchase</b>\nUser: <code>{}</code>\n{}",
                user_id, message
            ),
            OperatorAlert::FundingShortfall {
                user_id,
                required_nano,
                available_nano,
            } => format!(
                "🚨 <b>Wallet balance too low</b>\nRequired: {} TON\nAvailable: {} TON\nPurchase by <code>{}</code> was refunded",
                format_ton(*required_nano),
                format_ton(*available_nano),
                user_id
            ),
            OperatorAlert::OnChainFailure { user_id, message } => format!(
                "🚨 <b>On-chain transfer failed</b>\nUser: <code>{}</code>\n{}",
                user_id, message
            ),
            OperatorAlert::SessionExpired { platform } => format!(
                "🔑 <b>{} session expired</b>\nUpdate the session cookies, purchases will fail until then",
                platform
            ),
            OperatorAlert::Sale {
                user_id,
                description,
                amount,
                profit,
                margin_percent,
            } => format!(
                "💰 <b>New sale</b>\nUser: <code>{}</code>\n{}\nAmount: {}\nProfit: {} ({}%)",
                user_id,
                description,
                amount.round_dp(2),
                profit.round_dp(2),
                margin_percent.round_dp(1)
            ),
        }
    }
}

#[async_trait]
pub trait UserNotifier: Send + Sync {
    async fn payment_settled(
        &self,
        user_id: i64,
        amount: Decimal,
        new_balance: Decimal,
        message_id: Option<i64>,
    );

    /// Edits the invoice message in place when `message_id` is known.
    async fn invoice_expired(&self, user_id: i64, order_id: &str, message_id: Option<i64>);

    async fn purchase_completed(&self, user_id: i64, description: &str, tx_ref: &str);

    async fn purchase_failed(&self, user_id: i64, reason: &str);
}

#[async_trait]
pub trait OperatorAlerts: Send + Sync {
    async fn alert(&self, alert: OperatorAlert);
}

// ---------------------------------------------------------------------------
// Log-only
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl UserNotifier for LogNotifier {
    async fn payment_settled(
        &self,
        user_id: i64,
        amount: Decimal,
        new_balance: Decimal,
        _message_id: Option<i64>,
    ) {
        info!(user_id, amount = %amount, new_balance = %new_balance, "🔔 NOTIFICATION: payment settled");
    }

    async fn invoice_expired(&self, user_id: i64, order_id: &str, message_id: Option<i64>) {
        info!(user_id, order_id, ?message_id, "🔔 NOTIFICATION: invoice expired");
    }

    async fn purchase_completed(&self, user_id: i64, description: &str, tx_ref: &str) {
        info!(user_id, description, tx_ref, "🔔 NOTIFICATION: purchase completed");
    }

    async fn purchase_failed(&self, user_id: i64, reason: &str) {
        warn!(user_id, reason, "🔔 NOTIFICATION: purchase failed, funds returned");
    }
}

#[async_trait]
impl OperatorAlerts for LogNotifier {
    async fn alert(&self, alert: OperatorAlert) {
        match &alert {
            OperatorAlert::Sale { .. } => info!(alert = ?alert, "📣 operator alert"),
            _ => error!(alert = ?alert, "📣 operator alert"),
        }
    }
}

// ---------------------------------------------------------------------------
// Telegram Bot API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TelegramNotifierConfig {
    pub bot_token: String,
    pub admin_ids: Vec<i64>,
    pub api_base: String,
    pub timeout_secs: u64,
}

impl TelegramNotifierConfig {
    pub fn new(bot_token: impl Into<String>, admin_ids: Vec<i64>) -> Self {
        Self {
            bot_token: bot_token.into(),
            admin_ids,
            api_base: "https://api.telegram.org".to_string(),
            timeout_secs: 10,
        }
    }
}

pub struct TelegramNotifier {
    config: TelegramNotifierConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct BotApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramNotifierConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), String> {
        let response = self
            .client
            .post(self.endpoint(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let parsed: BotApiResponse = response.json().await.map_err(|e| e.to_string())?;
        if parsed.ok {
            Ok(())
        } else {
            Err(parsed
                .description
                .unwrap_or_else(|| "unknown Bot API error".to_string()))
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Err(e) = self.call("sendMessage", body).await {
            warn!(chat_id, error = %e, "sendMessage failed");
        }
    }

    /// Falls back to a fresh message when the original cannot be edited.
    pub async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
            "parse_mode": "HTML",
        });
        if let Err(e) = self.call("editMessageText", body).await {
            warn!(chat_id, message_id, error = %e, "editMessageText failed, sending new message");
            self.send_message(chat_id, text).await;
        }
    }
}

#[async_trait]
impl UserNotifier for TelegramNotifier {
    async fn payment_settled(
        &self,
        user_id: i64,
        amount: Decimal,
        new_balance: Decimal,
        message_id: Option<i64>,
    ) {
        let text = format!(
            "✅ Payment of {} received.\nYour balance: {}",
            amount.round_dp(2),
            new_balance.round_dp(2)
        );
        match message_id {
            Some(message_id) => self.edit_message(user_id, message_id, &text).await,
            None => self.send_message(user_id, &text).await,
        }
    }

    async fn invoice_expired(&self, user_id: i64, order_id: &str, message_id: Option<i64>) {
        let text = format!(
            "⌛ Invoice <code>{}</code> has expired. Create a new one to top up.",
            order_id
        );
        match message_id {
            Some(message_id) => self.edit_message(user_id, message_id, &text).await,
            None => self.send_message(user_id, &text).await,
        }
    }

    async fn purchase_completed(&self, user_id: i64, description: &str, tx_ref: &str) {
        let text = format!(
            "🎉 {} delivered.\nTransaction: <code>{}</code>",
            description, tx_ref
        );
        self.send_message(user_id, &text).await;
    }

    async fn purchase_failed(&self, user_id: i64, reason: &str) {
        let text = format!(
            "❌ Purchase failed: {}\nThe funds have been returned to your balance.",
            reason
        );
        self.send_message(user_id, &text).await;
    }
}

#[async_trait]
impl OperatorAlerts for TelegramNotifier {
    async fn alert(&self, alert: OperatorAlert) {
        let text = alert.render();
        for admin_id in &self.config.admin_ids {
            self.send_message(*admin_id, &text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ton_amounts_are_formatted() {
        assert_eq!(format_ton(2_000_000_000), "2");
        assert_eq!(format_ton(1_500_000_000), "1.5");
        assert_eq!(format_ton(1), "0.000000001");
    }

    #[test]
    fn shortfall_alert_mentions_both_amounts() {
        let text = OperatorAlert::FundingShortfall {
            user_id: 5,
            required_nano: 2_000_000_000,
            available_nano: 1_000_000_000,
        }
        .render();
        assert!(text.contains("Required: 2 TON"));
        assert!(text.contains("Available: 1 TON"));
    }

    #[test]
    fn sale_alert_rounds_values() {
        let text = OperatorAlert::Sale {
            user_id: 1,
            description: "100 Stars".to_string(),
            amount: Decimal::new(18000, 2),
            profit: Decimal::new(1812345, 5),
            margin_percent: Decimal::new(11189, 3),
        }
        .render();
        assert!(text.contains("Amount: 180.00"));
        assert!(text.contains("Profit: 18.12 (11.2%)"));
    }

    #[test]
    fn bot_endpoint_embeds_token() {
        let notifier =
            TelegramNotifier::new(TelegramNotifierConfig::new("123:abc", vec![1])).unwrap();
        assert_eq!(
            notifier.endpoint("sendMessage"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }
}
