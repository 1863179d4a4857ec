//! In-process ledger used in `SKIP_EXTERNALS` mode and by tests.
//!
//! One async mutex guards the whole state so every operation is atomic with
//! respect to every other, the same guarantee the Postgres store gets from
//! row locks and transactions.

use crate::database::ledger::{
    promo_discount_percent, LedgerError, LedgerResult, LedgerStore, NewPayment, Payment,
    PaymentStatus, PromoActivation, PromoKind, PurchaseRecord, SettledPayment, User, UserStats,
};
use crate::database::settings::{SettingKey, SettingsStore};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct PromoEntry {
    kind: PromoKind,
    value: Decimal,
    uses_left: i64,
    used_by: HashSet<i64>,
}

#[derive(Debug, Default)]
struct LedgerState {
    users: HashMap<i64, User>,
    payments: HashMap<String, Payment>,
    purchases: Vec<PurchaseRecord>,
    promos: HashMap<String, PromoEntry>,
}

impl LedgerState {
    fn user_entry(&mut self, user_id: i64) -> &mut User {
        self.users.entry(user_id).or_insert_with(|| User {
            user_id,
            username: None,
            balance: Decimal::ZERO,
            is_blocked: false,
            discount: None,
            created_at: Utc::now(),
        })
    }

    fn transition(&mut self, order_id: &str, to: PaymentStatus) -> bool {
        match self.payments.get_mut(order_id) {
            Some(payment) if payment.status == PaymentStatus::Pending => {
                payment.status = to;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a user with a starting balance.
    pub async fn insert_user(&self, user_id: i64, username: Option<&str>, balance: Decimal) {
        let mut state = self.state.lock().await;
        let user = state.user_entry(user_id);
        user.username = username.map(str::to_string);
        user.balance = balance;
    }

    pub async fn insert_promo(&self, code: &str, kind: PromoKind, value: Decimal, uses: i64) {
        let mut state = self.state.lock().await;
        state.promos.insert(
            code.to_string(),
            PromoEntry {
                kind,
                value,
                uses_left: uses,
                used_by: HashSet::new(),
            },
        );
    }

    /// Rewrite `created_at` of a payment, for exercising the payment window.
    pub async fn backdate_payment(&self, order_id: &str, by: Duration) {
        let mut state = self.state.lock().await;
        if let Some(payment) = state.payments.get_mut(order_id) {
            if let Ok(by) = chrono::Duration::from_std(by) {
                payment.created_at = payment.created_at - by;
            }
        }
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ensure_user(&self, user_id: i64, username: Option<&str>) -> LedgerResult<User> {
        let mut state = self.state.lock().await;
        let user = state.user_entry(user_id);
        if username.is_some() {
            user.username = username.map(str::to_string);
        }
        Ok(user.clone())
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&user_id).cloned())
    }

    async fn set_blocked(&self, user_id: i64, blocked: bool) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(user) => {
                user.is_blocked = blocked;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_payment(&self, payment: NewPayment) -> LedgerResult<Payment> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&payment.order_id) {
            return Err(LedgerError::DuplicateOrder {
                order_id: payment.order_id,
            });
        }
        let record = Payment {
            order_id: payment.order_id.clone(),
            user_id: payment.user_id,
            gateway: payment.gateway,
            amount: payment.amount,
            status: PaymentStatus::Pending,
            invoice_url: payment.invoice_url,
            external_invoice_id: payment.external_invoice_id,
            message_id: payment.message_id,
            created_at: Utc::now(),
        };
        state.payments.insert(payment.order_id, record.clone());
        Ok(record)
    }

    async fn get_payment(&self, order_id: &str) -> LedgerResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(order_id).cloned())
    }

    async fn pending_payments(&self) -> LedgerResult<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut pending: Vec<Payment> = state
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn active_payment(
        &self,
        user_id: i64,
        timeout: Duration,
    ) -> LedgerResult<Option<Payment>> {
        let now = Utc::now();
        let state = self.state.lock().await;
        Ok(state
            .payments
            .values()
            .filter(|p| {
                p.user_id == user_id
                    && p.status == PaymentStatus::Pending
                    && !p.is_expired_at(now, timeout)
            })
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    async fn expire_stale_payments(&self, user_id: i64, timeout: Duration) -> LedgerResult<u64> {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut expired = 0;
        for payment in state.payments.values_mut() {
            if payment.user_id == user_id
                && payment.status == PaymentStatus::Pending
                && payment.is_expired_at(now, timeout)
            {
                payment.status = PaymentStatus::Expired;
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn attach_message(&self, order_id: &str, message_id: i64) -> LedgerResult<bool> {
        let mut state = self.state.lock().await;
        match state.payments.get_mut(order_id) {
            Some(payment) => {
                payment.message_id = Some(message_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn settle_payment(&self, order_id: &str) -> LedgerResult<Option<SettledPayment>> {
        let mut state = self.state.lock().await;
        if !state.transition(order_id, PaymentStatus::Paid) {
            return Ok(None);
        }
        let payment = match state.payments.get(order_id) {
            Some(payment) => payment.clone(),
            None => return Ok(None),
        };
        let user = state.user_entry(payment.user_id);
        user.balance += payment.amount;
        let new_balance = user.balance;
        Ok(Some(SettledPayment {
            payment,
            new_balance,
        }))
    }

    async fn cancel_payment(&self, order_id: &str) -> LedgerResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .transition(order_id, PaymentStatus::Cancelled))
    }

    async fn expire_payment(&self, order_id: &str) -> LedgerResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .transition(order_id, PaymentStatus::Expired))
    }

    async fn adjust_balance(&self, user_id: i64, delta: Decimal) -> LedgerResult<Decimal> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound { user_id })?;
        let next = user.balance + delta;
        if next < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                available: user.balance,
                required: -delta,
            });
        }
        user.balance = next;
        Ok(next)
    }

    async fn set_discount(&self, user_id: i64, discount: Option<u8>) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(LedgerError::UserNotFound { user_id })?;
        user.discount = discount;
        Ok(())
    }

    async fn take_discount(&self, user_id: i64) -> LedgerResult<Option<u8>> {
        let mut state = self.state.lock().await;
        Ok(state
            .users
            .get_mut(&user_id)
            .and_then(|user| user.discount.take()))
    }

    async fn record_purchase(&self, record: PurchaseRecord) -> LedgerResult<()> {
        self.state.lock().await.purchases.push(record);
        Ok(())
    }

    async fn purchase_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> LedgerResult<Vec<PurchaseRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .purchases
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn user_stats(&self, user_id: i64) -> LedgerResult<UserStats> {
        let state = self.state.lock().await;
        let total_top_up = state
            .payments
            .values()
            .filter(|p| p.user_id == user_id && p.status == PaymentStatus::Paid)
            .map(|p| p.amount)
            .sum();
        let mine: Vec<&PurchaseRecord> = state
            .purchases
            .iter()
            .filter(|r| r.user_id == user_id)
            .collect();
        let total_stars = mine
            .iter()
            .filter(|r| r.purchase_type == "stars")
            .map(|r| i64::from(r.quantity))
            .sum();
        Ok(UserStats {
            total_top_up,
            total_stars,
            purchases: mine.len() as i64,
        })
    }

    async fn activate_promo(&self, user_id: i64, code: &str) -> LedgerResult<PromoActivation> {
        let mut state = self.state.lock().await;
        let promo = state
            .promos
            .get_mut(code)
            .ok_or_else(|| LedgerError::PromoNotFound {
                code: code.to_string(),
            })?;
        if promo.used_by.contains(&user_id) {
            return Err(LedgerError::PromoAlreadyUsed {
                code: code.to_string(),
            });
        }
        if promo.uses_left <= 0 {
            return Err(LedgerError::PromoExhausted {
                code: code.to_string(),
            });
        }
        promo.uses_left -= 1;
        promo.used_by.insert(user_id);
        let (kind, value) = (promo.kind, promo.value);

        let user = state.user_entry(user_id);
        let discount = match kind {
            PromoKind::Discount => {
                let percent = promo_discount_percent(value);
                user.discount = Some(percent);
                Some(percent)
            }
            PromoKind::Balance => {
                user.balance += value;
                None
            }
        };
        Ok(PromoActivation {
            code: code.to_string(),
            kind,
            value,
            new_balance: user.balance,
            discount,
        })
    }
}

/// Settings kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: Mutex<HashMap<SettingKey, String>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    async fn get(&self, key: SettingKey) -> LedgerResult<Option<String>> {
        Ok(self.values.lock().await.get(&key).cloned())
    }

    async fn set(&self, key: SettingKey, value: &str) -> LedgerResult<()> {
        self.values.lock().await.insert(key, value.to_string());
        Ok(())
    }
}
