//! Top-up service
//!
//! Issues invoices through the gateway registry and records them as pending
//! payments. A user holds at most one pending payment; stale ones are
//! expired here before the check so a lapsed invoice never blocks a new one.

use crate::config::PaymentsConfig;
use crate::database::ledger::{LedgerError, LedgerStore, NewPayment};
use crate::database::settings::{SettingKey, SettingsStore};
use crate::error::{AppError, DomainError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::{GatewayKind, InvoiceRequest};
use crate::payments::utils::generate_order_id;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const ORDER_ID_ATTEMPTS: usize = 5;

#[derive(Debug, Error)]
pub enum TopUpError {
    #[error("user {user_id} is blocked")]
    UserBlocked { user_id: i64 },

    #[error("top-ups are paused for maintenance")]
    Maintenance,

    #[error("amount {amount} is below the minimum of {min}")]
    BelowMinimum { amount: Decimal, min: Decimal },

    #[error("payment {order_id} is still waiting to be paid")]
    ActivePaymentExists { order_id: String },

    #[error("payment {order_id} not found")]
    PaymentNotFound { order_id: String },

    #[error(transparent)]
    Gateway(#[from] PaymentError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<TopUpError> for AppError {
    fn from(err: TopUpError) -> Self {
        match err {
            TopUpError::UserBlocked { user_id } => {
                AppError::domain(DomainError::UserBlocked { user_id })
            }
            TopUpError::Maintenance => AppError::domain(DomainError::Maintenance),
            TopUpError::BelowMinimum { amount, min } => {
                AppError::validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason: format!("minimum top-up is {}", min),
                })
            }
            TopUpError::ActivePaymentExists { order_id } => {
                AppError::domain(DomainError::ActivePaymentExists { order_id })
            }
            TopUpError::PaymentNotFound { order_id } => {
                AppError::domain(DomainError::PaymentNotFound { order_id })
            }
            TopUpError::Gateway(e) => e.into(),
            TopUpError::Ledger(e) => e.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopUpRequest {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    pub gateway: GatewayKind,
    pub amount: Decimal,
    /// Chat message that will show the invoice
    #[serde(default)]
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpInvoice {
    pub order_id: String,
    pub pay_url: String,
    pub gateway: GatewayKind,
    pub amount: Decimal,
}

pub struct TopUpService {
    ledger: Arc<dyn LedgerStore>,
    settings: Arc<dyn SettingsStore>,
    gateways: Arc<GatewayRegistry>,
    config: PaymentsConfig,
}

impl TopUpService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        settings: Arc<dyn SettingsStore>,
        gateways: Arc<GatewayRegistry>,
        config: PaymentsConfig,
    ) -> Self {
        Self {
            ledger,
            settings,
            gateways,
            config,
        }
    }

    pub fn available_gateways(&self) -> Vec<GatewayKind> {
        self.gateways.list_available()
    }

    pub async fn request_top_up(&self, request: TopUpRequest) -> Result<TopUpInvoice, TopUpError> {
        let user = self
            .ledger
            .ensure_user(request.user_id, request.username.as_deref())
            .await?;
        if user.is_blocked {
            return Err(TopUpError::UserBlocked {
                user_id: request.user_id,
            });
        }
        if self.settings.is_enabled(SettingKey::MaintenanceMode).await? {
            return Err(TopUpError::Maintenance);
        }
        if request.amount < self.config.min_payment_amount {
            return Err(TopUpError::BelowMinimum {
                amount: request.amount,
                min: self.config.min_payment_amount,
            });
        }
        let gateway = self.gateways.get(request.gateway)?;

        let expired = self
            .ledger
            .expire_stale_payments(request.user_id, self.config.payment_timeout)
            .await?;
        if expired > 0 {
            info!(user_id = request.user_id, expired, "expired stale payments before top-up");
        }
        if let Some(active) = self
            .ledger
            .active_payment(request.user_id, self.config.payment_timeout)
            .await?
        {
            return Err(TopUpError::ActivePaymentExists {
                order_id: active.order_id,
            });
        }

        let order_id = self.fresh_order_id().await?;
        let invoice = gateway
            .create_invoice(InvoiceRequest {
                user_id: request.user_id,
                amount: request.amount,
                order_id: order_id.clone(),
            })
            .await?;

        self.ledger
            .create_payment(NewPayment {
                order_id: order_id.clone(),
                user_id: request.user_id,
                gateway: request.gateway,
                amount: request.amount,
                invoice_url: Some(invoice.pay_url.clone()),
                external_invoice_id: invoice.external_id,
                message_id: request.message_id,
            })
            .await?;

        info!(
            user_id = request.user_id,
            order_id = %order_id,
            gateway = %request.gateway,
            amount = %request.amount,
            "top-up invoice issued"
        );

        Ok(TopUpInvoice {
            order_id,
            pay_url: invoice.pay_url,
            gateway: request.gateway,
            amount: request.amount,
        })
    }

    /// `false` when the payment already left `pending`.
    pub async fn cancel_pending_payment(&self, order_id: &str) -> Result<bool, TopUpError> {
        if self.ledger.get_payment(order_id).await?.is_none() {
            return Err(TopUpError::PaymentNotFound {
                order_id: order_id.to_string(),
            });
        }
        let cancelled = self.ledger.cancel_payment(order_id).await?;
        if cancelled {
            info!(order_id, "payment cancelled by user");
        }
        Ok(cancelled)
    }

    pub async fn attach_message(&self, order_id: &str, message_id: i64) -> Result<bool, TopUpError> {
        Ok(self.ledger.attach_message(order_id, message_id).await?)
    }

    async fn fresh_order_id(&self) -> Result<String, TopUpError> {
        for _ in 0..ORDER_ID_ATTEMPTS {
            let order_id = generate_order_id(chrono::Utc::now().timestamp());
            if self.ledger.get_payment(&order_id).await?.is_none() {
                return Ok(order_id);
            }
            warn!(order_id = %order_id, "order id collision, regenerating");
        }
        Err(LedgerError::storage("could not allocate a unique order id").into())
    }
}
