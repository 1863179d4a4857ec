//! PostgreSQL implementations of [`LedgerStore`] and [`SettingsStore`].
//!
//! Status transitions are `UPDATE ... WHERE status = 'pending'` statements;
//! the affected row count is the compare-and-swap result. Settlement and
//! promo activation run inside a transaction.

use crate::database::error::DatabaseError;
use crate::database::ledger::{
    promo_discount_percent, LedgerError, LedgerResult, LedgerStore, NewPayment, Payment,
    PaymentStatus, PromoActivation, PromoKind, PurchaseRecord, SettledPayment, User, UserStats,
};
use crate::database::settings::{SettingKey, SettingsStore};
use crate::payments::types::GatewayKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use std::time::Duration;

const USER_COLUMNS: &str = "user_id, username, balance, is_blocked, discount, created_at";
const PAYMENT_COLUMNS: &str = "order_id, user_id, gateway, amount, status, invoice_url, \
     external_invoice_id, message_id, created_at";

fn db(err: sqlx::Error) -> LedgerError {
    DatabaseError::from_sqlx(err).into()
}

fn secs(timeout: Duration) -> i64 {
    i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX)
}

#[derive(Debug, FromRow)]
struct UserRow {
    user_id: i64,
    username: Option<String>,
    balance: Decimal,
    is_blocked: bool,
    discount: Option<i16>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            user_id: row.user_id,
            username: row.username,
            balance: row.balance,
            is_blocked: row.is_blocked,
            discount: row.discount.and_then(|d| u8::try_from(d).ok()),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PaymentRow {
    order_id: String,
    user_id: i64,
    gateway: String,
    amount: Decimal,
    status: String,
    invoice_url: Option<String>,
    external_invoice_id: Option<String>,
    message_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = LedgerError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let gateway = GatewayKind::from_str(&row.gateway).map_err(|_| {
            LedgerError::storage(format!(
                "payment {} has unknown gateway {}",
                row.order_id, row.gateway
            ))
        })?;
        let status = PaymentStatus::from_str(&row.status).ok_or_else(|| {
            LedgerError::storage(format!(
                "payment {} has unknown status {}",
                row.order_id, row.status
            ))
        })?;
        Ok(Payment {
            order_id: row.order_id,
            user_id: row.user_id,
            gateway,
            amount: row.amount,
            status,
            invoice_url: row.invoice_url,
            external_invoice_id: row.external_invoice_id,
            message_id: row.message_id,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct PurchaseRow {
    user_id: i64,
    purchase_type: String,
    description: String,
    quantity: i32,
    cost: Decimal,
    profit: Decimal,
    created_at: DateTime<Utc>,
}

impl From<PurchaseRow> for PurchaseRecord {
    fn from(row: PurchaseRow) -> Self {
        PurchaseRecord {
            user_id: row.user_id,
            purchase_type: row.purchase_type,
            description: row.description,
            quantity: row.quantity,
            cost: row.cost,
            profit: row.profit,
            created_at: row.created_at,
        }
    }
}

/// Ledger backed by PostgreSQL
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn transition(&self, order_id: &str, to: PaymentStatus) -> LedgerResult<bool> {
        let result = sqlx::query(
            "UPDATE payments SET status = $2 WHERE order_id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn ensure_user(&self, user_id: i64, username: Option<&str>) -> LedgerResult<User> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (user_id, username) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE
             SET username = COALESCE(EXCLUDED.username, users.username)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(user_id)
        .bind(username)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.into())
    }

    async fn get_user(&self, user_id: i64) -> LedgerResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE user_id = $1",
            USER_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(row.map(User::from))
    }

    async fn set_blocked(&self, user_id: i64, blocked: bool) -> LedgerResult<bool> {
        let result = sqlx::query("UPDATE users SET is_blocked = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(blocked)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn create_payment(&self, payment: NewPayment) -> LedgerResult<Payment> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "INSERT INTO payments
                (order_id, user_id, gateway, amount, status, invoice_url, external_invoice_id, message_id)
             VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7)
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(&payment.order_id)
        .bind(payment.user_id)
        .bind(payment.gateway.as_str())
        .bind(payment.amount)
        .bind(&payment.invoice_url)
        .bind(&payment.external_invoice_id)
        .bind(payment.message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            let err = DatabaseError::from_sqlx(e);
            if err.is_unique_violation() {
                LedgerError::DuplicateOrder {
                    order_id: payment.order_id.clone(),
                }
            } else {
                err.into()
            }
        })?;
        row.try_into()
    }

    async fn get_payment(&self, order_id: &str) -> LedgerResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE order_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(Payment::try_from).transpose()
    }

    async fn pending_payments(&self) -> LedgerResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn active_payment(
        &self,
        user_id: i64,
        timeout: Duration,
    ) -> LedgerResult<Option<Payment>> {
        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {} FROM payments
             WHERE user_id = $1 AND status = 'pending'
               AND created_at >= NOW() - ($2::bigint * INTERVAL '1 second')
             ORDER BY created_at DESC
             LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(user_id)
        .bind(secs(timeout))
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        row.map(Payment::try_from).transpose()
    }

    async fn expire_stale_payments(&self, user_id: i64, timeout: Duration) -> LedgerResult<u64> {
        let result = sqlx::query(
            "UPDATE payments SET status = 'expired'
             WHERE user_id = $1 AND status = 'pending'
               AND created_at < NOW() - ($2::bigint * INTERVAL '1 second')",
        )
        .bind(user_id)
        .bind(secs(timeout))
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(result.rows_affected())
    }

    async fn attach_message(&self, order_id: &str, message_id: i64) -> LedgerResult<bool> {
        let result = sqlx::query("UPDATE payments SET message_id = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(db)?;
        Ok(result.rows_affected() == 1)
    }

    async fn settle_payment(&self, order_id: &str) -> LedgerResult<Option<SettledPayment>> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let row = sqlx::query_as::<_, PaymentRow>(&format!(
            "UPDATE payments SET status = 'paid'
             WHERE order_id = $1 AND status = 'pending'
             RETURNING {}",
            PAYMENT_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;

        let payment: Payment = match row {
            Some(row) => row.try_into()?,
            None => {
                tx.rollback().await.map_err(db)?;
                return Ok(None);
            }
        };

        let new_balance: Decimal = sqlx::query_scalar(
            "INSERT INTO users (user_id, balance) VALUES ($1, $2)
             ON CONFLICT (user_id) DO UPDATE SET balance = users.balance + EXCLUDED.balance
             RETURNING balance",
        )
        .bind(payment.user_id)
        .bind(payment.amount)
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(Some(SettledPayment {
            payment,
            new_balance,
        }))
    }

    async fn cancel_payment(&self, order_id: &str) -> LedgerResult<bool> {
        self.transition(order_id, PaymentStatus::Cancelled).await
    }

    async fn expire_payment(&self, order_id: &str) -> LedgerResult<bool> {
        self.transition(order_id, PaymentStatus::Expired).await
    }

    async fn adjust_balance(&self, user_id: i64, delta: Decimal) -> LedgerResult<Decimal> {
        let updated: Option<Decimal> = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $2
             WHERE user_id = $1 AND balance + $2 >= 0
             RETURNING balance",
        )
        .bind(user_id)
        .bind(delta)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        if let Some(balance) = updated {
            return Ok(balance);
        }

        let current: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db)?;
        match current {
            Some(available) => Err(LedgerError::InsufficientFunds {
                available,
                required: -delta,
            }),
            None => Err(LedgerError::UserNotFound { user_id }),
        }
    }

    async fn set_discount(&self, user_id: i64, discount: Option<u8>) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE users SET discount = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(discount.map(i16::from))
            .execute(&self.pool)
            .await
            .map_err(db)?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::UserNotFound { user_id });
        }
        Ok(())
    }

    async fn take_discount(&self, user_id: i64) -> LedgerResult<Option<u8>> {
        let previous: Option<Option<i16>> = sqlx::query_scalar(
            "UPDATE users u SET discount = NULL
             FROM (SELECT user_id, discount FROM users WHERE user_id = $1 FOR UPDATE) old
             WHERE u.user_id = old.user_id
             RETURNING old.discount",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db)?;
        Ok(previous.flatten().and_then(|d| u8::try_from(d).ok()))
    }

    async fn record_purchase(&self, record: PurchaseRecord) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO purchases
                (user_id, purchase_type, description, quantity, cost, profit, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.user_id)
        .bind(&record.purchase_type)
        .bind(&record.description)
        .bind(record.quantity)
        .bind(record.cost)
        .bind(record.profit)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }

    async fn purchase_history(
        &self,
        user_id: i64,
        limit: i64,
    ) -> LedgerResult<Vec<PurchaseRecord>> {
        let rows = sqlx::query_as::<_, PurchaseRow>(
            "SELECT user_id, purchase_type, description, quantity, cost, profit, created_at
             FROM purchases WHERE user_id = $1
             ORDER BY created_at DESC, id DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db)?;
        Ok(rows.into_iter().map(PurchaseRecord::from).collect())
    }

    async fn user_stats(&self, user_id: i64) -> LedgerResult<UserStats> {
        let total_top_up: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE user_id = $1 AND status = 'paid'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        let (total_stars, purchases): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(quantity) FILTER (WHERE purchase_type = 'stars'), 0)::bigint,
                    COUNT(*)
             FROM purchases WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db)?;
        Ok(UserStats {
            total_top_up,
            total_stars,
            purchases,
        })
    }

    async fn activate_promo(&self, user_id: i64, code: &str) -> LedgerResult<PromoActivation> {
        let mut tx = self.pool.begin().await.map_err(db)?;

        let promo: Option<(String, Decimal, i64)> = sqlx::query_as(
            "SELECT kind, value, uses_left FROM promo_codes WHERE code = $1 FOR UPDATE",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?;
        let (kind, value, uses_left) = promo.ok_or_else(|| LedgerError::PromoNotFound {
            code: code.to_string(),
        })?;
        let kind = PromoKind::from_str(&kind).ok_or_else(|| {
            LedgerError::storage(format!("promo {} has unknown kind {}", code, kind))
        })?;

        let used: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM promo_activations WHERE code = $1 AND user_id = $2)",
        )
        .bind(code)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;
        if used {
            return Err(LedgerError::PromoAlreadyUsed {
                code: code.to_string(),
            });
        }
        if uses_left <= 0 {
            return Err(LedgerError::PromoExhausted {
                code: code.to_string(),
            });
        }

        sqlx::query("UPDATE promo_codes SET uses_left = uses_left - 1 WHERE code = $1")
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        sqlx::query("INSERT INTO promo_activations (code, user_id) VALUES ($1, $2)")
            .bind(code)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(db)?;

        let (discount, credit) = match kind {
            PromoKind::Discount => (Some(promo_discount_percent(value)), Decimal::ZERO),
            PromoKind::Balance => (None, value),
        };
        let (new_balance, stored_discount): (Decimal, Option<i16>) = sqlx::query_as(
            "INSERT INTO users (user_id, balance, discount) VALUES ($1, $2, $3)
             ON CONFLICT (user_id) DO UPDATE
             SET balance = users.balance + EXCLUDED.balance,
                 discount = COALESCE(EXCLUDED.discount, users.discount)
             RETURNING balance, discount",
        )
        .bind(user_id)
        .bind(credit)
        .bind(discount.map(i16::from))
        .fetch_one(&mut *tx)
        .await
        .map_err(db)?;

        tx.commit().await.map_err(db)?;
        Ok(PromoActivation {
            code: code.to_string(),
            kind,
            value,
            new_balance,
            discount: match kind {
                PromoKind::Discount => stored_discount.and_then(|d| u8::try_from(d).ok()),
                PromoKind::Balance => None,
            },
        })
    }
}

/// Settings table
#[derive(Clone)]
pub struct PgSettingsStore {
    pool: PgPool,
}

impl PgSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get(&self, key: SettingKey) -> LedgerResult<Option<String>> {
        sqlx::query_scalar("SELECT value FROM settings WHERE key = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db)
    }

    async fn set(&self, key: SettingKey, value: &str) -> LedgerResult<()> {
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES ($1, $2, NOW())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db)?;
        Ok(())
    }
}
