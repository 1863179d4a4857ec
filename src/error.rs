//! Unified error handling for the starfund backend
//!
//! Subsystem errors (`LedgerError`, `PaymentError`, `FulfillmentError`, ...)
//! convert into `AppError`, which carries the HTTP status mapping, a stable
//! error code and the message shown to users.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by the UI collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "INSUFFICIENT_FUNDS")]
    InsufficientFunds,
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DUPLICATE_ORDER")]
    DuplicateOrder,
    #[serde(rename = "ACTIVE_PAYMENT_EXISTS")]
    ActivePaymentExists,
    #[serde(rename = "USER_NOT_FOUND")]
    UserNotFound,
    #[serde(rename = "USER_BLOCKED")]
    UserBlocked,
    #[serde(rename = "PROMO_REJECTED")]
    PromoRejected,
    #[serde(rename = "MAINTENANCE")]
    Maintenance,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503, 504)
    #[serde(rename = "GATEWAY_ERROR")]
    GatewayError,
    #[serde(rename = "PLATFORM_ERROR")]
    PlatformError,
    #[serde(rename = "ON_CHAIN_ERROR")]
    OnChainError,
    #[serde(rename = "FUNDING_SHORTFALL")]
    FundingShortfall,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "SIGNATURE_INVALID")]
    SignatureInvalid,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Balance is lower than the requested debit
    InsufficientFunds { available: String, required: String },
    PaymentNotFound { order_id: String },
    DuplicateOrder { order_id: String },
    /// The user already has an unpaid invoice
    ActivePaymentExists { order_id: String },
    UserNotFound { user_id: i64 },
    UserBlocked { user_id: i64 },
    PromoRejected { code: String, reason: String },
    /// Purchases and top-ups are paused by the operators
    Maintenance,
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

/// Failures of external collaborators
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentGateway {
        gateway: String,
        message: String,
        is_retryable: bool,
    },
    DeliveryPlatform { message: String },
    Blockchain { message: String, is_retryable: bool },
    /// The sending wallet cannot cover an outbound transfer
    FundingShortfall { required: String, available: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidAmount { amount: String, reason: String },
    InvalidRecipient { handle: String, reason: String },
    MissingField { field: String },
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    InvalidSignature,
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => 422,
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicateOrder { .. } => 409,
                DomainError::ActivePaymentExists { .. } => 409,
                DomainError::UserNotFound { .. } => 404,
                DomainError::UserBlocked { .. } => 403,
                DomainError::PromoRejected { .. } => 422,
                DomainError::Maintenance => 503,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => 502,
                ExternalError::DeliveryPlatform { .. } => 502,
                ExternalError::Blockchain { .. } => 502,
                ExternalError::FundingShortfall { .. } => 503,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidSignature => 403,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicateOrder { .. } => ErrorCode::DuplicateOrder,
                DomainError::ActivePaymentExists { .. } => ErrorCode::ActivePaymentExists,
                DomainError::UserNotFound { .. } => ErrorCode::UserNotFound,
                DomainError::UserBlocked { .. } => ErrorCode::UserBlocked,
                DomainError::PromoRejected { .. } => ErrorCode::PromoRejected,
                DomainError::Maintenance => ErrorCode::Maintenance,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::GatewayError,
                ExternalError::DeliveryPlatform { .. } => ErrorCode::PlatformError,
                ExternalError::Blockchain { .. } => ErrorCode::OnChainError,
                ExternalError::FundingShortfall { .. } => ErrorCode::FundingShortfall,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(ValidationError::InvalidSignature) => {
                ErrorCode::SignatureInvalid
            }
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::InsufficientFunds {
                    available,
                    required,
                } => format!(
                    "Insufficient balance. Available: {}, required: {}",
                    available, required
                ),
                DomainError::PaymentNotFound { order_id } => {
                    format!("Payment '{}' not found", order_id)
                }
                DomainError::DuplicateOrder { order_id } => {
                    format!("Order '{}' already exists", order_id)
                }
                DomainError::ActivePaymentExists { order_id } => format!(
                    "You already have an unpaid invoice ({}). Pay or cancel it first",
                    order_id
                ),
                DomainError::UserNotFound { user_id } => format!("User {} not found", user_id),
                DomainError::UserBlocked { .. } => "Your account is blocked".to_string(),
                DomainError::PromoRejected { code, reason } => {
                    format!("Promo code '{}' cannot be used: {}", code, reason)
                }
                DomainError::Maintenance => {
                    "The service is under maintenance. Please try again later".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway {
                    gateway,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment gateway ({}) is temporarily unavailable. Please try again",
                            gateway
                        )
                    } else {
                        format!("Payment gateway ({}) rejected the request", gateway)
                    }
                }
                ExternalError::DeliveryPlatform { message } => {
                    format!("Delivery failed: {}. Funds were returned", message)
                }
                ExternalError::Blockchain { .. } => {
                    "Blockchain transfer failed. Funds were returned".to_string()
                }
                ExternalError::FundingShortfall { .. } => {
                    "Delivery is temporarily unavailable. Funds were returned".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!(
                        "Rate limit exceeded for {}. Please try again later",
                        service
                    ),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidRecipient { handle, reason } => {
                    format!("Invalid recipient '{}': {}", handle, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::InvalidSignature => "Invalid signature".to_string(),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(DomainError::Maintenance) => true,
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::DeliveryPlatform { .. } => true,
                ExternalError::Blockchain { is_retryable, .. } => *is_retryable,
                ExternalError::FundingShortfall { .. } => true,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_funds_error() {
        let error = AppError::domain(DomainError::InsufficientFunds {
            available: "50".to_string(),
            required: "100".to_string(),
        });

        assert_eq!(error.status_code(), 422);
        assert_eq!(error.error_code(), ErrorCode::InsufficientFunds);
        assert!(error.user_message().contains("Insufficient balance"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_active_payment_conflict() {
        let error = AppError::domain(DomainError::ActivePaymentExists {
            order_id: "starbot-1-1000".to_string(),
        });
        assert_eq!(error.status_code(), 409);
        assert!(error.user_message().contains("starbot-1-1000"));
    }

    #[test]
    fn test_signature_error_is_forbidden() {
        let error = AppError::validation(ValidationError::InvalidSignature);
        assert_eq!(error.status_code(), 403);
        assert_eq!(error.error_code(), ErrorCode::SignatureInvalid);
    }

    #[test]
    fn test_funding_shortfall_mentions_refund() {
        let error = AppError::new(AppErrorKind::External(ExternalError::FundingShortfall {
            required: "2".to_string(),
            available: "1".to_string(),
        }));
        assert_eq!(error.status_code(), 503);
        assert!(error.user_message().contains("Funds were returned"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }
}
