//! Ledger store: payments, balances, discounts and purchase history.
//!
//! Every mutating operation is atomic per order id / user id. State
//! transitions out of `pending` are compare-and-swap: a call that finds the
//! payment in any other state changes nothing and reports "no transition"
//! (`false` / `None`), which callers treat as a normal outcome.

use crate::error::{AppError, AppErrorKind, DomainError, InfrastructureError};
use crate::payments::types::GatewayKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("order {order_id} already exists")]
    DuplicateOrder { order_id: String },

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("user {user_id} not found")]
    UserNotFound { user_id: i64 },

    #[error("promo code {code} not found")]
    PromoNotFound { code: String },

    #[error("promo code {code} has no activations left")]
    PromoExhausted { code: String },

    #[error("promo code {code} was already used by this user")]
    PromoAlreadyUsed { code: String },

    #[error("storage error: {message}")]
    Storage { message: String, retryable: bool },
}

impl LedgerError {
    pub fn storage(message: impl Into<String>) -> Self {
        LedgerError::Storage {
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let kind = match err {
            LedgerError::DuplicateOrder { order_id } => {
                AppErrorKind::Domain(DomainError::DuplicateOrder { order_id })
            }
            LedgerError::InsufficientFunds {
                available,
                required,
            } => AppErrorKind::Domain(DomainError::InsufficientFunds {
                available: available.to_string(),
                required: required.to_string(),
            }),
            LedgerError::UserNotFound { user_id } => {
                AppErrorKind::Domain(DomainError::UserNotFound { user_id })
            }
            LedgerError::PromoNotFound { code } => AppErrorKind::Domain(DomainError::PromoRejected {
                code,
                reason: "not found".to_string(),
            }),
            LedgerError::PromoExhausted { code } => {
                AppErrorKind::Domain(DomainError::PromoRejected {
                    code,
                    reason: "no activations left".to_string(),
                })
            }
            LedgerError::PromoAlreadyUsed { code } => {
                AppErrorKind::Domain(DomainError::PromoRejected {
                    code,
                    reason: "already used".to_string(),
                })
            }
            LedgerError::Storage { message, retryable } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: retryable,
                })
            }
        };
        AppError::new(kind)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "expired" => Some(PaymentStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub order_id: String,
    pub user_id: i64,
    pub gateway: GatewayKind,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub invoice_url: Option<String>,
    pub external_invoice_id: Option<String>,
    /// UI message showing the invoice, edited on settlement or expiry
    pub message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// True once `now` is strictly past `created_at + timeout`.
    pub fn is_expired_at(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now > self.created_at + timeout,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: String,
    pub user_id: i64,
    pub gateway: GatewayKind,
    pub amount: Decimal,
    pub invoice_url: Option<String>,
    pub external_invoice_id: Option<String>,
    pub message_id: Option<i64>,
}

/// Result of a winning settlement
#[derive(Debug, Clone, PartialEq)]
pub struct SettledPayment {
    pub payment: Payment,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub balance: Decimal,
    pub is_blocked: bool,
    /// Single-use discount percentage
    pub discount: Option<u8>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub user_id: i64,
    pub purchase_type: String,
    pub description: String,
    pub quantity: i32,
    pub cost: Decimal,
    pub profit: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total_top_up: Decimal,
    pub total_stars: i64,
    pub purchases: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoKind {
    /// Sets the user's single-use discount percentage
    Discount,
    /// Credits the value to the balance
    Balance,
}

impl PromoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromoKind::Discount => "discount",
            PromoKind::Balance => "balance",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "discount" => Some(PromoKind::Discount),
            "balance" => Some(PromoKind::Balance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromoActivation {
    pub code: String,
    pub kind: PromoKind,
    pub value: Decimal,
    pub new_balance: Decimal,
    pub discount: Option<u8>,
}

/// Clamp a promo value into a discount percentage.
pub fn promo_discount_percent(value: Decimal) -> u8 {
    let clamped = value.round().clamp(Decimal::ZERO, Decimal::from(100));
    clamped.to_string().parse::<u8>().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create the user on first contact and refresh the display handle.
    async fn ensure_user(&self, user_id: i64, username: Option<&str>) -> LedgerResult<User>;

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>>;

    async fn set_blocked(&self, user_id: i64, blocked: bool) -> LedgerResult<bool>;

    /// Fails with `DuplicateOrder` when the order id is taken.
    async fn create_payment(&self, payment: NewPayment) -> LedgerResult<Payment>;

    async fn get_payment(&self, order_id: &str) -> LedgerResult<Option<Payment>>;

    async fn pending_payments(&self) -> LedgerResult<Vec<Payment>>;

    /// Newest pending payment of the user still inside the payment window.
    async fn active_payment(&self, user_id: i64, timeout: Duration)
        -> LedgerResult<Option<Payment>>;

    /// CAS-expire the user's pending payments older than `timeout`.
    async fn expire_stale_payments(&self, user_id: i64, timeout: Duration) -> LedgerResult<u64>;

    async fn attach_message(&self, order_id: &str, message_id: i64) -> LedgerResult<bool>;

    /// `pending -> paid` plus the balance credit, as one atomic unit.
    /// `None` when the payment is missing or no longer pending.
    async fn settle_payment(&self, order_id: &str) -> LedgerResult<Option<SettledPayment>>;

    async fn cancel_payment(&self, order_id: &str) -> LedgerResult<bool>;

    async fn expire_payment(&self, order_id: &str) -> LedgerResult<bool>;

    /// Apply a signed delta and return the new balance. A debit that would
    /// make the balance negative fails with `InsufficientFunds`.
    async fn adjust_balance(&self, user_id: i64, delta: Decimal) -> LedgerResult<Decimal>;

    async fn set_discount(&self, user_id: i64, discount: Option<u8>) -> LedgerResult<()>;

    /// Read and clear the discount in one step.
    async fn take_discount(&self, user_id: i64) -> LedgerResult<Option<u8>>;

    async fn record_purchase(&self, record: PurchaseRecord) -> LedgerResult<()>;

    async fn purchase_history(&self, user_id: i64, limit: i64)
        -> LedgerResult<Vec<PurchaseRecord>>;

    async fn user_stats(&self, user_id: i64) -> LedgerResult<UserStats>;

    async fn activate_promo(&self, user_id: i64, code: &str) -> LedgerResult<PromoActivation>;
}
