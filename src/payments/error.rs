use crate::error::{AppError, AppErrorKind, ExternalError, ValidationError};
use rust_decimal::Decimal;
use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("unknown payment gateway: {name}")]
    UnknownGateway { name: String },

    #[error("payment gateway not configured: {gateway}")]
    NotConfigured { gateway: String },

    #[error("{gateway} cannot invoice {amount}: {reason}")]
    AmountRejected {
        gateway: String,
        amount: Decimal,
        reason: String,
    },

    /// Status lookups on gateways that key invoices by their own id
    #[error("{gateway} status lookup for {order_id} needs the gateway invoice id")]
    MissingInvoiceId { gateway: String, order_id: String },

    #[error("network error: {message}")]
    NetworkError { message: String },

    #[error("rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("malformed webhook payload: {message}")]
    MalformedPayload { message: String },

    #[error("{gateway} error: {message}")]
    GatewayError {
        gateway: String,
        message: String,
        gateway_code: Option<String>,
        retryable: bool,
    },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::NetworkError { .. } | PaymentError::RateLimitError { .. } => true,
            PaymentError::GatewayError { retryable, .. } => *retryable,
            _ => false,
        }
    }

    pub(crate) fn gateway(gateway: &str, message: impl Into<String>) -> Self {
        PaymentError::GatewayError {
            gateway: gateway.to_string(),
            message: message.into(),
            gateway_code: None,
            retryable: false,
        }
    }
}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let kind = match err {
            PaymentError::UnknownGateway { name } => {
                AppErrorKind::Validation(ValidationError::OutOfRange {
                    field: format!("gateway ({})", name),
                    min: None,
                    max: None,
                })
            }
            PaymentError::AmountRejected { amount, reason, .. } => {
                AppErrorKind::Validation(ValidationError::InvalidAmount {
                    amount: amount.to_string(),
                    reason,
                })
            }
            PaymentError::MalformedPayload { message } => {
                AppErrorKind::Validation(ValidationError::MissingField { field: message })
            }
            PaymentError::RateLimitError {
                retry_after_seconds,
                ..
            } => AppErrorKind::External(ExternalError::RateLimit {
                service: "payment gateway".to_string(),
                retry_after: retry_after_seconds,
            }),
            other => {
                let gateway = match &other {
                    PaymentError::GatewayError { gateway, .. }
                    | PaymentError::NotConfigured { gateway }
                    | PaymentError::MissingInvoiceId { gateway, .. } => gateway.clone(),
                    _ => "payments".to_string(),
                };
                AppErrorKind::External(ExternalError::PaymentGateway {
                    gateway,
                    is_retryable: other.is_retryable(),
                    message: other.to_string(),
                })
            }
        };
        AppError::new(kind)
    }
}
