//! Fulfillment engine
//!
//! Spends a user's balance on a Stars or Premium gift. The attempt is a
//! saga: the balance is debited first, then the delivery platform is asked
//! for a payment intent which is paid from the operator's TON wallet. Any
//! failure after the debit refunds the full total before the error is
//! returned, so a failed attempt nets to zero.

use crate::chains::traits::{OnChainWallet, TransferRequest};
use crate::database::ledger::{LedgerError, LedgerStore, PurchaseRecord};
use crate::database::settings::{SettingKey, SettingsStore};
use crate::delivery::errors::FragmentError;
use crate::delivery::payload::extract_comment;
use crate::delivery::traits::DeliveryPlatform;
use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};
use crate::services::notification::{format_ton, OperatorAlert, OperatorAlerts, UserNotifier};
use crate::services::pricing::{validate_kind, PricingError};
use crate::services::profit::{ProfitEstimate, ProfitEstimator};
use chrono::Utc;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PurchaseKind {
    Stars { quantity: u32 },
    Premium { months: u32 },
}

impl PurchaseKind {
    /// Purchase-history type
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseKind::Stars { .. } => "stars",
            PurchaseKind::Premium { .. } => "premium",
        }
    }

    pub fn quantity(&self) -> u32 {
        match *self {
            PurchaseKind::Stars { quantity } => quantity,
            PurchaseKind::Premium { months } => months,
        }
    }
}

impl fmt::Display for PurchaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseKind::Stars { quantity } => write!(f, "{} Stars", quantity),
            PurchaseKind::Premium { months } => write!(f, "Premium {} months", months),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: i64,
    pub kind: PurchaseKind,
    /// Recipient handle, with or without the leading `@`
    pub recipient: String,
    /// Amount to debit, discount already applied
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    pub user_id: i64,
    pub kind: PurchaseKind,
    pub recipient: String,
    pub description: String,
    pub total: Decimal,
    pub amount_nano: u64,
    pub tx_ref: String,
    pub new_balance: Decimal,
    pub profit: ProfitEstimate,
}

fn recipient_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^@?([a-zA-Z0-9_]{5,32})$").expect("recipient pattern"))
}

/// Handle without the `@`, or `None` when it is not a valid username.
pub fn normalize_recipient(raw: &str) -> Option<String> {
    recipient_pattern()
        .captures(raw.trim())
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Purchase-history description.
pub fn describe_purchase(kind: &PurchaseKind, handle: &str, for_self: bool) -> String {
    match *kind {
        PurchaseKind::Stars { quantity } if for_self => format!("{} Stars", quantity),
        PurchaseKind::Stars { quantity } => format!("{} Stars for @{}", quantity, handle),
        PurchaseKind::Premium { months } => format!("Premium {} months for @{}", months, handle),
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("invalid recipient handle: {handle}")]
    InvalidRecipient { handle: String },

    #[error("invalid purchase: {0}")]
    InvalidKind(#[from] PricingError),

    #[error("purchase total must be positive, got {total}")]
    InvalidTotal { total: Decimal },

    #[error("purchases are paused for maintenance")]
    Maintenance,

    #[error("user {user_id} is blocked")]
    UserBlocked { user_id: i64 },

    #[error("insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        available: Decimal,
        required: Decimal,
    },

    #[error("recipient @{handle} not found")]
    RecipientNotFound { handle: String },

    #[error("delivery platform error: {message}")]
    Platform { message: String },

    #[error("wallet balance too low: required {required_nano} nanoton, available {available_nano} nanoton")]
    FundingShortfall {
        required_nano: u64,
        available_nano: u64,
    },

    #[error("wallet balance unavailable: {message}")]
    BalanceUnavailable { message: String },

    #[error("on-chain transfer failed: {message}")]
    OnChain { message: String },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The attempt failed and the refund did not go through either
    #[error("refund of {total} failed after {cause}: {message}")]
    RefundFailed {
        total: Decimal,
        cause: String,
        message: String,
    },
}

impl FulfillmentError {
    /// True when the debit happened and was reversed.
    pub fn funds_returned(&self) -> bool {
        matches!(
            self,
            FulfillmentError::RecipientNotFound { .. }
                | FulfillmentError::Platform { .. }
                | FulfillmentError::FundingShortfall { .. }
                | FulfillmentError::BalanceUnavailable { .. }
                | FulfillmentError::OnChain { .. }
        )
    }

    /// Reason shown to the buyer; operator details stay in the alert.
    pub fn user_reason(&self) -> String {
        match self {
            FulfillmentError::RecipientNotFound { handle } => {
                format!("user @{} was not found", handle)
            }
            FulfillmentError::Platform { .. } => {
                "the delivery platform rejected the request".to_string()
            }
            FulfillmentError::FundingShortfall { .. }
            | FulfillmentError::BalanceUnavailable { .. }
            | FulfillmentError::OnChain { .. } => {
                "delivery is temporarily unavailable".to_string()
            }
            other => other.to_string(),
        }
    }

    fn operator_alert(&self, user_id: i64) -> Option<OperatorAlert> {
        match self {
            FulfillmentError::RecipientNotFound { handle } => Some(OperatorAlert::RecipientNotFound {
                user_id,
                handle: handle.clone(),
            }),
            FulfillmentError::Platform { message } => Some(OperatorAlert::PlatformRejected {
                user_id,
                message: message.clone(),
            }),
            FulfillmentError::FundingShortfall {
                required_nano,
                available_nano,
            } => Some(OperatorAlert::FundingShortfall {
                user_id,
                required_nano: *required_nano,
                available_nano: *available_nano,
            }),
            FulfillmentError::BalanceUnavailable { message }
            | FulfillmentError::OnChain { message } => Some(OperatorAlert::OnChainFailure {
                user_id,
                message: message.clone(),
            }),
            FulfillmentError::RefundFailed { message, cause, .. } => {
                Some(OperatorAlert::OnChainFailure {
                    user_id,
                    message: format!("REFUND FAILED after {}: {}", cause, message),
                })
            }
            _ => None,
        }
    }
}

impl From<FragmentError> for FulfillmentError {
    fn from(err: FragmentError) -> Self {
        match err {
            FragmentError::RecipientNotFound { handle } => {
                FulfillmentError::RecipientNotFound { handle }
            }
            other => FulfillmentError::Platform {
                message: other.to_string(),
            },
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        let kind = match err {
            FulfillmentError::InvalidRecipient { handle } => {
                AppErrorKind::Validation(ValidationError::InvalidRecipient {
                    handle,
                    reason: "must be 5-32 letters, digits or underscores".to_string(),
                })
            }
            FulfillmentError::InvalidTotal { total } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: total.to_string(),
                    reason: "must be positive".to_string(),
                })
            }
            FulfillmentError::Maintenance => AppErrorKind::Domain(DomainError::Maintenance),
            FulfillmentError::UserBlocked { user_id } => {
                AppErrorKind::Domain(DomainError::UserBlocked { user_id })
            }
            FulfillmentError::InsufficientFunds {
                available,
                required,
            } => AppErrorKind::Domain(DomainError::InsufficientFunds {
                available: available.to_string(),
                required: required.to_string(),
            }),
            FulfillmentError::RecipientNotFound { handle } => {
                AppErrorKind::Validation(ValidationError::InvalidRecipient {
                    handle,
                    reason: "not found on the delivery platform".to_string(),
                })
            }
            FulfillmentError::Platform { message } => {
                AppErrorKind::External(ExternalError::DeliveryPlatform { message })
            }
            FulfillmentError::FundingShortfall {
                required_nano,
                available_nano,
            } => AppErrorKind::External(ExternalError::FundingShortfall {
                required: format_ton(required_nano),
                available: format_ton(available_nano),
            }),
            FulfillmentError::BalanceUnavailable { message }
            | FulfillmentError::OnChain { message } => {
                AppErrorKind::External(ExternalError::Blockchain {
                    message,
                    is_retryable: false,
                })
            }
            FulfillmentError::InvalidKind(e) => return e.into(),
            FulfillmentError::Ledger(e) => return e.into(),
            FulfillmentError::RefundFailed { message, .. } => {
                AppErrorKind::Infrastructure(crate::error::InfrastructureError::Database {
                    message,
                    is_retryable: false,
                })
            }
        };
        AppError::new(kind)
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Outcome of the external steps, before commit.
struct Delivery {
    amount_nano: u64,
    tx_ref: String,
}

pub struct FulfillmentEngine {
    ledger: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsStore>,
    platform: Arc<dyn DeliveryPlatform>,
    wallet: Arc<dyn OnChainWallet>,
    estimator: Arc<ProfitEstimator>,
    notifier: Arc<dyn UserNotifier>,
    alerts: Arc<dyn OperatorAlerts>,
    /// Serialises preflight + submission on the sending wallet
    wallet_lock: Mutex<()>,
}

impl FulfillmentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsStore>,
        platform: Arc<dyn DeliveryPlatform>,
        wallet: Arc<dyn OnChainWallet>,
        estimator: Arc<ProfitEstimator>,
        notifier: Arc<dyn UserNotifier>,
        alerts: Arc<dyn OperatorAlerts>,
    ) -> Self {
        Self {
            ledger,
            settings,
            platform,
            wallet,
            estimator,
            notifier,
            alerts,
            wallet_lock: Mutex::new(()),
        }
    }

    /// Run one purchase to a terminal state. Errors for which
    /// [`FulfillmentError::funds_returned`] holds were refunded.
    #[instrument(skip(self, request), fields(user_id = request.user_id, kind = %request.kind))]
    pub async fn purchase(
        &self,
        request: PurchaseRequest,
    ) -> Result<PurchaseReceipt, FulfillmentError> {
        validate_kind(&request.kind)?;
        let handle = normalize_recipient(&request.recipient).ok_or_else(|| {
            FulfillmentError::InvalidRecipient {
                handle: request.recipient.clone(),
            }
        })?;
        if request.total <= Decimal::ZERO {
            return Err(FulfillmentError::InvalidTotal {
                total: request.total,
            });
        }
        if self.settings.is_enabled(SettingKey::MaintenanceMode).await? {
            return Err(FulfillmentError::Maintenance);
        }
        let user = self
            .ledger
            .get_user(request.user_id)
            .await?
            .ok_or(LedgerError::UserNotFound {
                user_id: request.user_id,
            })?;
        if user.is_blocked {
            return Err(FulfillmentError::UserBlocked {
                user_id: request.user_id,
            });
        }
        let for_self = user
            .username
            .as_deref()
            .map(|u| u.trim_start_matches('@').eq_ignore_ascii_case(&handle))
            .unwrap_or(false);

        // Step 1: debit. Nothing to compensate if this fails.
        let debited_balance = match self
            .ledger
            .adjust_balance(request.user_id, -request.total)
            .await
        {
            Ok(balance) => balance,
            Err(LedgerError::InsufficientFunds {
                available,
                required,
            }) => {
                info!(available = %available, required = %required, "purchase rejected, insufficient funds");
                return Err(FulfillmentError::InsufficientFunds {
                    available,
                    required,
                });
            }
            Err(e) => return Err(e.into()),
        };
        info!(total = %request.total, balance = %debited_balance, handle = %handle, "balance debited");

        match self.deliver(&request.kind, &handle).await {
            Ok(delivery) => Ok(self
                .commit(&request, &handle, for_self, delivery, debited_balance)
                .await),
            Err(err) => Err(self.compensate(&request, err).await),
        }
    }

    /// Steps 2 to 6.
    async fn deliver(&self, kind: &PurchaseKind, handle: &str) -> Result<Delivery, FulfillmentError> {
        let recipient = self.platform.resolve_recipient(handle, kind).await?;
        let request_id = self.platform.init_request(handle, &recipient, kind).await?;
        let intent = self
            .platform
            .transaction_intent(&recipient, &request_id, kind)
            .await?;
        let memo = extract_comment(&intent.payload, kind)?;
        info!(request_id = %request_id, amount_nano = intent.amount_nano, memo = %memo, "transaction intent received");

        let _guard = self.wallet_lock.lock().await;

        let available_nano = self.wallet.balance_nano().await.map_err(|e| {
            FulfillmentError::BalanceUnavailable {
                message: e.to_string(),
            }
        })?;
        if available_nano < intent.amount_nano {
            error!(
                required = %format_ton(intent.amount_nano),
                available = %format_ton(available_nano),
                wallet = %self.wallet.address(),
                "sending wallet cannot cover the transfer"
            );
            return Err(FulfillmentError::FundingShortfall {
                required_nano: intent.amount_nano,
                available_nano,
            });
        }

        let receipt = self
            .wallet
            .transfer(TransferRequest {
                destination: intent.address.clone(),
                amount_nano: intent.amount_nano,
                memo,
            })
            .await
            .map_err(|e| FulfillmentError::OnChain {
                message: e.to_string(),
            })?;

        Ok(Delivery {
            amount_nano: intent.amount_nano,
            tx_ref: receipt.tx_ref,
        })
    }

    /// Step 7. The transfer is out, so bookkeeping failures are logged only.
    async fn commit(
        &self,
        request: &PurchaseRequest,
        handle: &str,
        for_self: bool,
        delivery: Delivery,
        new_balance: Decimal,
    ) -> PurchaseReceipt {
        let description = describe_purchase(&request.kind, handle, for_self);
        let profit = self.estimator.estimate(&request.kind, request.total).await;

        let record = PurchaseRecord {
            user_id: request.user_id,
            purchase_type: request.kind.as_str().to_string(),
            description: description.clone(),
            quantity: i32::try_from(request.kind.quantity()).unwrap_or(i32::MAX),
            cost: request.total,
            profit: profit.profit,
            created_at: Utc::now(),
        };
        if let Err(e) = self.ledger.record_purchase(record).await {
            error!(error = %e, tx_ref = %delivery.tx_ref, "failed to record purchase history");
        }
        match self.ledger.take_discount(request.user_id).await {
            Ok(Some(discount)) => info!(discount, "discount consumed"),
            Ok(None) => {}
            Err(e) => error!(error = %e, "failed to clear discount"),
        }

        info!(tx_ref = %delivery.tx_ref, description = %description, "purchase completed");
        self.alerts
            .alert(OperatorAlert::Sale {
                user_id: request.user_id,
                description: description.clone(),
                amount: request.total,
                profit: profit.profit,
                margin_percent: profit.margin_percent,
            })
            .await;
        self.notifier
            .purchase_completed(request.user_id, &description, &delivery.tx_ref)
            .await;

        PurchaseReceipt {
            user_id: request.user_id,
            kind: request.kind,
            recipient: handle.to_string(),
            description,
            total: request.total,
            amount_nano: delivery.amount_nano,
            tx_ref: delivery.tx_ref,
            new_balance,
            profit,
        }
    }

    /// Refund the debit, then report. Returns the error to surface.
    async fn compensate(&self, request: &PurchaseRequest, err: FulfillmentError) -> FulfillmentError {
        warn!(error = %err, total = %request.total, "purchase failed, refunding");

        let surfaced = match self
            .ledger
            .adjust_balance(request.user_id, request.total)
            .await
        {
            Ok(balance) => {
                info!(balance = %balance, "refund applied");
                err
            }
            Err(refund_err) => {
                error!(error = %refund_err, cause = %err, "refund failed, manual correction required");
                FulfillmentError::RefundFailed {
                    total: request.total,
                    cause: err.to_string(),
                    message: refund_err.to_string(),
                }
            }
        };

        if let Some(alert) = surfaced.operator_alert(request.user_id) {
            self.alerts.alert(alert).await;
        }
        if surfaced.funds_returned() {
            self.notifier
                .purchase_failed(request.user_id, &surfaced.user_reason())
                .await;
        }
        surfaced
    }
}
