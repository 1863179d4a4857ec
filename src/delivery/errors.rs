use thiserror::Error;

pub type FragmentResult<T> = Result<T, FragmentError>;

#[derive(Debug, Clone, Error)]
pub enum FragmentError {
    #[error("Recipient @{handle} not found on the delivery platform")]
    RecipientNotFound { handle: String },

    /// The platform answered `ok: false` or left out a required field
    #[error("Delivery platform rejected {method}: {message}")]
    Rejected { method: &'static str, message: String },

    #[error("Delivery platform returned HTTP {status} for {method}")]
    HttpStatus { method: &'static str, status: u16 },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Malformed platform response: {message}")]
    MalformedResponse { message: String },

    #[error("Delivery platform is not configured: {message}")]
    NotConfigured { message: String },
}

impl FragmentError {
    pub fn rejected(method: &'static str, message: impl Into<String>) -> Self {
        Self::Rejected {
            method,
            message: message.into(),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn is_recipient_not_found(&self) -> bool {
        matches!(self, FragmentError::RecipientNotFound { .. })
    }
}
