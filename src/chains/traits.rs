//! The sending wallet as seen by the fulfillment saga.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type WalletResult<T> = Result<T, WalletError>;

#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum WalletError {
    #[error("invalid address: {address}")]
    InvalidAddress { address: String },
    #[error("chain API unavailable: {message}")]
    Unavailable { message: String },
    #[error("chain API timed out after {seconds} seconds")]
    Timeout { seconds: u64 },
    /// The transfer was built but not accepted
    #[error("transfer rejected: {message}")]
    Rejected { message: String },
    #[error("wallet misconfigured: {message}")]
    Misconfigured { message: String },
    #[error("message encoding failed: {message}")]
    Encoding { message: String },
}

impl WalletError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WalletError::Unavailable { .. } | WalletError::Timeout { .. }
        )
    }
}

/// A payment the delivery platform asked for, paid from the service wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub destination: String,
    pub amount_nano: u64,
    /// Comment the platform uses to match the payment to its order
    pub memo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub tx_ref: String,
    pub seqno: u32,
}

#[async_trait]
pub trait OnChainWallet: Send + Sync {
    fn chain_id(&self) -> &str;

    fn address(&self) -> String;

    async fn balance_nano(&self) -> WalletResult<u64>;

    /// Sign and broadcast one transfer. Success means the message was
    /// accepted for broadcast, not that it is final.
    async fn transfer(&self, request: TransferRequest) -> WalletResult<TransferReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        let err = WalletError::Timeout { seconds: 30 };
        assert_eq!(err.to_string(), "chain API timed out after 30 seconds");
        assert!(err.is_retryable());
        assert!(!WalletError::Rejected {
            message: "bad seqno".into()
        }
        .is_retryable());
        assert!(!WalletError::Misconfigured {
            message: "no mnemonic".into()
        }
        .is_retryable());
    }
}
