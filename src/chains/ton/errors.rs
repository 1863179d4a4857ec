use crate::chains::traits::WalletError;
use thiserror::Error;

pub type TonResult<T> = Result<T, TonError>;

#[derive(Debug, Error)]
pub enum TonError {
    #[error("Invalid TON address: {address}")]
    InvalidAddress { address: String },

    #[error("Invalid mnemonic: {message}")]
    InvalidMnemonic { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("{service} returned HTTP {status}: {message}")]
    ApiError {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Timeout error: operation timed out after {seconds} seconds")]
    TimeoutError { seconds: u64 },

    #[error("Wallet {address} is not deployed (seqno 0)")]
    WalletNotDeployed { address: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },
}

impl TonError {
    pub fn invalid_address(address: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
        }
    }

    pub fn invalid_mnemonic(message: impl Into<String>) -> Self {
        Self::InvalidMnemonic {
            message: message.into(),
        }
    }

    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Network hiccups and 5xx answers may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TonError::NetworkError { .. } | TonError::TimeoutError { .. } => true,
            TonError::ApiError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<TonError> for WalletError {
    fn from(err: TonError) -> Self {
        if err.is_retryable() {
            if let TonError::TimeoutError { seconds } = err {
                return WalletError::Timeout { seconds };
            }
            return WalletError::Unavailable {
                message: err.to_string(),
            };
        }
        match err {
            TonError::InvalidAddress { address } => WalletError::InvalidAddress { address },
            TonError::SerializationError { message } => {
                WalletError::Encoding { message }
            }
            TonError::ConfigError { message } | TonError::InvalidMnemonic { message } => {
                WalletError::Misconfigured { message }
            }
            other => WalletError::Rejected {
                message: other.to_string(),
            },
        }
    }
}
