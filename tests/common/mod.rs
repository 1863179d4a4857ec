//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rust_decimal::Decimal;
use starfund_backend::chains::traits::{
    OnChainWallet, TransferReceipt, TransferRequest, WalletError, WalletResult,
};
use starfund_backend::delivery::errors::{FragmentError, FragmentResult};
use starfund_backend::delivery::traits::{DeliveryPlatform, TransactionIntent};
use starfund_backend::services::fulfillment::PurchaseKind;
use starfund_backend::services::notification::{OperatorAlert, OperatorAlerts, UserNotifier};
use starfund_backend::services::profit::{RateError, RateProvider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Platform call that should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFailure {
    InitRequest,
    TransactionIntent,
    /// Intent comes back with a payload that is not base64
    BadPayload,
}

/// Delivery platform that answers from fixed data.
pub struct FakePlatform {
    pub known_recipients: Vec<String>,
    pub amount_nano: u64,
    pub failure: Option<PlatformFailure>,
}

impl FakePlatform {
    pub fn knowing(handles: &[&str], amount_nano: u64) -> Self {
        Self {
            known_recipients: handles.iter().map(|h| h.to_string()).collect(),
            amount_nano,
            failure: None,
        }
    }

    pub fn failing(mut self, failure: PlatformFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[async_trait]
impl DeliveryPlatform for FakePlatform {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve_recipient(&self, handle: &str, _kind: &PurchaseKind) -> FragmentResult<String> {
        if self.known_recipients.iter().any(|h| h == handle) {
            Ok(format!("recipient-{}", handle))
        } else {
            Err(FragmentError::RecipientNotFound {
                handle: handle.to_string(),
            })
        }
    }

    async fn init_request(
        &self,
        _handle: &str,
        _recipient: &str,
        _kind: &PurchaseKind,
    ) -> FragmentResult<String> {
        if self.failure == Some(PlatformFailure::InitRequest) {
            return Err(FragmentError::rejected("initBuyStarsRequest", "request expired"));
        }
        Ok("req-1".to_string())
    }

    async fn transaction_intent(
        &self,
        _recipient: &str,
        _request_id: &str,
        kind: &PurchaseKind,
    ) -> FragmentResult<TransactionIntent> {
        match self.failure {
            Some(PlatformFailure::TransactionIntent) => {
                return Err(FragmentError::rejected("getBuyStarsLink", "wallet not accepted"));
            }
            Some(PlatformFailure::BadPayload) => {
                return Ok(TransactionIntent {
                    address: "EQfragment".to_string(),
                    amount_nano: self.amount_nano,
                    payload: "!!not base64!!".to_string(),
                });
            }
            _ => {}
        }
        let comment = match *kind {
            PurchaseKind::Stars { quantity } => format!("{} Telegram Stars Ref#T3st", quantity),
            PurchaseKind::Premium { months } => {
                format!("Telegram Premium for {} months Ref #T3st", months)
            }
        };
        let mut body = vec![0xb5, 0xee, 0x9c, 0x72, 0x01];
        body.extend_from_slice(comment.as_bytes());
        Ok(TransactionIntent {
            address: "EQfragment".to_string(),
            amount_nano: self.amount_nano,
            payload: STANDARD.encode(body),
        })
    }

    async fn check_session(&self) -> FragmentResult<bool> {
        Ok(true)
    }
}

/// Wallet with a fixed balance that records transfers.
pub struct FakeWallet {
    pub balance_nano: u64,
    pub transfers: Mutex<Vec<TransferRequest>>,
    pub balance_unreadable: bool,
    pub reject_transfers: bool,
}

impl FakeWallet {
    pub fn with_balance(balance_nano: u64) -> Self {
        Self {
            balance_nano,
            transfers: Mutex::new(Vec::new()),
            balance_unreadable: false,
            reject_transfers: false,
        }
    }

    pub fn unreadable() -> Self {
        Self {
            balance_unreadable: true,
            ..Self::with_balance(0)
        }
    }

    pub fn rejecting(balance_nano: u64) -> Self {
        Self {
            reject_transfers: true,
            ..Self::with_balance(balance_nano)
        }
    }

    pub fn transfer_count(&self) -> usize {
        self.transfers.lock().map(|t| t.len()).unwrap_or(0)
    }
}

#[async_trait]
impl OnChainWallet for FakeWallet {
    fn chain_id(&self) -> &str {
        "ton-test"
    }

    fn address(&self) -> String {
        "EQsender".to_string()
    }

    async fn balance_nano(&self) -> WalletResult<u64> {
        if self.balance_unreadable {
            return Err(WalletError::Unavailable {
                message: "toncenter timed out".to_string(),
            });
        }
        Ok(self.balance_nano)
    }

    async fn transfer(&self, request: TransferRequest) -> WalletResult<TransferReceipt> {
        if self.reject_transfers {
            return Err(WalletError::Rejected {
                message: "external message rejected: seqno mismatch".to_string(),
            });
        }
        let mut transfers = self.transfers.lock().map_err(|_| WalletError::Rejected {
            message: "poisoned".to_string(),
        })?;
        transfers.push(request);
        Ok(TransferReceipt {
            tx_ref: format!("tx-{}", transfers.len()),
            seqno: transfers.len() as u32,
        })
    }
}

#[derive(Default)]
pub struct Recorder {
    pub alerts: Mutex<Vec<OperatorAlert>>,
    pub settled: AtomicUsize,
    pub expired: AtomicUsize,
    pub completed: AtomicUsize,
    pub failed: AtomicUsize,
}

impl Recorder {
    pub fn alerts(&self) -> Vec<OperatorAlert> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserNotifier for Recorder {
    async fn payment_settled(
        &self,
        _user_id: i64,
        _amount: Decimal,
        _new_balance: Decimal,
        _message_id: Option<i64>,
    ) {
        self.settled.fetch_add(1, Ordering::SeqCst);
    }

    async fn invoice_expired(&self, _user_id: i64, _order_id: &str, _message_id: Option<i64>) {
        self.expired.fetch_add(1, Ordering::SeqCst);
    }

    async fn purchase_completed(&self, _user_id: i64, _description: &str, _tx_ref: &str) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    async fn purchase_failed(&self, _user_id: i64, _reason: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OperatorAlerts for Recorder {
    async fn alert(&self, alert: OperatorAlert) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(alert);
        }
    }
}

pub struct FixedRate(pub Decimal);

#[async_trait]
impl RateProvider for FixedRate {
    async fn fetch_ton_rate(&self) -> Result<Decimal, RateError> {
        Ok(self.0)
    }

    fn name(&self) -> &str {
        "fixed"
    }
}
