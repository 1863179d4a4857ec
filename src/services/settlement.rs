//! Settlement service
//!
//! The single place where a payment is turned into balance. Both the webhook
//! receiver and the reconciliation loop call [`SettlementService::settle`];
//! the ledger's compare-and-swap decides the winner and the loser sees
//! [`SettlementOutcome::AlreadySettled`], which is not an error.

use crate::database::ledger::{LedgerResult, LedgerStore, SettledPayment};
use crate::services::notification::UserNotifier;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementSource {
    Webhook,
    Reconciliation,
}

impl fmt::Display for SettlementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementSource::Webhook => write!(f, "webhook"),
            SettlementSource::Reconciliation => write!(f, "reconciliation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    Settled(SettledPayment),
    /// Unknown order, or no longer pending
    AlreadySettled,
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled(_))
    }
}

pub struct SettlementService {
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn UserNotifier>,
}

impl SettlementService {
    pub fn new(ledger: Arc<dyn LedgerStore>, notifier: Arc<dyn UserNotifier>) -> Self {
        Self { ledger, notifier }
    }

    pub async fn settle(
        &self,
        order_id: &str,
        source: SettlementSource,
    ) -> LedgerResult<SettlementOutcome> {
        match self.ledger.settle_payment(order_id).await? {
            Some(settled) => {
                info!(
                    order_id,
                    %source,
                    user_id = settled.payment.user_id,
                    amount = %settled.payment.amount,
                    new_balance = %settled.new_balance,
                    "payment settled"
                );
                self.notifier
                    .payment_settled(
                        settled.payment.user_id,
                        settled.payment.amount,
                        settled.new_balance,
                        settled.payment.message_id,
                    )
                    .await;
                Ok(SettlementOutcome::Settled(settled))
            }
            None => {
                debug!(order_id, %source, "settlement skipped, payment not pending");
                Ok(SettlementOutcome::AlreadySettled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ledger::NewPayment;
    use crate::database::memory::InMemoryLedgerStore;
    use crate::payments::types::GatewayKind;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        settled: AtomicUsize,
    }

    #[async_trait]
    impl UserNotifier for CountingNotifier {
        async fn payment_settled(&self, _: i64, _: Decimal, _: Decimal, _: Option<i64>) {
            self.settled.fetch_add(1, Ordering::SeqCst);
        }
        async fn invoice_expired(&self, _: i64, _: &str, _: Option<i64>) {}
        async fn purchase_completed(&self, _: i64, _: &str, _: &str) {}
        async fn purchase_failed(&self, _: i64, _: &str) {}
    }

    #[tokio::test]
    async fn second_settle_is_a_no_op_and_notifies_once() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        ledger
            .create_payment(NewPayment {
                order_id: "starbot-1-1000".to_string(),
                user_id: 7,
                gateway: GatewayKind::CrystalPay,
                amount: Decimal::from(250),
                invoice_url: None,
                external_invoice_id: None,
                message_id: Some(11),
            })
            .await
            .unwrap();
        let notifier = Arc::new(CountingNotifier::default());
        let service = SettlementService::new(ledger.clone(), notifier.clone());

        let first = service
            .settle("starbot-1-1000", SettlementSource::Webhook)
            .await
            .unwrap();
        let second = service
            .settle("starbot-1-1000", SettlementSource::Reconciliation)
            .await
            .unwrap();

        assert!(first.is_settled());
        assert_eq!(second, SettlementOutcome::AlreadySettled);
        assert_eq!(notifier.settled.load(Ordering::SeqCst), 1);
        let user = ledger.get_user(7).await.unwrap().unwrap();
        assert_eq!(user.balance, Decimal::from(250));
    }
}
