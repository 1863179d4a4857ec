//! Reconciliation loop
//!
//! Expires lapsed invoices and polls poll-based gateways for payments that
//! never produce a webhook. Settlement goes through the same
//! [`SettlementService`] the webhook receiver uses, so a payment confirmed by
//! both paths is credited once.

use crate::database::ledger::{LedgerStore, Payment};
use crate::payments::factory::GatewayRegistry;
use crate::payments::types::StatusQuery;
use crate::services::notification::UserNotifier;
use crate::services::settlement::{SettlementOutcome, SettlementService, SettlementSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ReconciliationConfig {
    /// Pause between two cycles
    pub interval: Duration,
    /// Age after which a pending payment is expired
    pub payment_timeout: Duration,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(20),
            payment_timeout: Duration::from_secs(900),
        }
    }
}

impl ReconciliationConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("RECONCILIATION_INTERVAL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg.payment_timeout = Duration::from_secs(
            std::env::var("PAYMENT_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(cfg.payment_timeout.as_secs()),
        );
        cfg
    }
}

/// What one cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    pub expired: usize,
    pub settled: usize,
    pub still_pending: usize,
    pub errors: usize,
}

enum PaymentCheck {
    Expired,
    Settled,
    Pending,
    /// Lost a race with the webhook or another transition
    Skipped,
}

pub struct ReconciliationWorker {
    ledger: Arc<dyn LedgerStore>,
    gateways: Arc<GatewayRegistry>,
    settlement: Arc<SettlementService>,
    notifier: Arc<dyn UserNotifier>,
    config: ReconciliationConfig,
}

impl ReconciliationWorker {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateways: Arc<GatewayRegistry>,
        settlement: Arc<SettlementService>,
        notifier: Arc<dyn UserNotifier>,
        config: ReconciliationConfig,
    ) -> Self {
        Self {
            ledger,
            gateways,
            settlement,
            notifier,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            payment_timeout_secs = self.config.payment_timeout.as_secs(),
            "reconciliation worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("reconciliation worker stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.run_cycle_at(Utc::now()).await {
                        Ok(report) if report != ReconciliationReport::default() => {
                            info!(
                                expired = report.expired,
                                settled = report.settled,
                                still_pending = report.still_pending,
                                errors = report.errors,
                                "reconciliation cycle finished"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "reconciliation cycle failed"),
                    }
                }
            }
        }

        info!("reconciliation worker stopped");
    }

    /// One pass over all pending payments as of `now`. Only the initial load
    /// can fail the cycle; per-payment failures are counted and skipped.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> anyhow::Result<ReconciliationReport> {
        let pending = self.ledger.pending_payments().await?;
        let mut report = ReconciliationReport::default();

        for payment in pending {
            match self.check_payment(&payment, now).await {
                Ok(PaymentCheck::Expired) => report.expired += 1,
                Ok(PaymentCheck::Settled) => report.settled += 1,
                Ok(PaymentCheck::Pending) => report.still_pending += 1,
                Ok(PaymentCheck::Skipped) => {}
                Err(e) => {
                    report.errors += 1;
                    error!(
                        order_id = %payment.order_id,
                        gateway = %payment.gateway,
                        error = %e,
                        "failed to reconcile payment"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn check_payment(
        &self,
        payment: &Payment,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PaymentCheck> {
        if payment.is_expired_at(now, self.config.payment_timeout) {
            if !self.ledger.expire_payment(&payment.order_id).await? {
                return Ok(PaymentCheck::Skipped);
            }
            info!(order_id = %payment.order_id, user_id = payment.user_id, "payment expired");
            self.notifier
                .invoice_expired(payment.user_id, &payment.order_id, payment.message_id)
                .await;
            return Ok(PaymentCheck::Expired);
        }

        if !payment.gateway.is_polled() {
            return Ok(PaymentCheck::Pending);
        }

        let gateway = self.gateways.get(payment.gateway)?;
        let paid = gateway
            .check_status(StatusQuery {
                order_id: payment.order_id.clone(),
                external_id: payment.external_invoice_id.clone(),
            })
            .await?;
        if !paid {
            debug!(order_id = %payment.order_id, "payment not paid yet");
            return Ok(PaymentCheck::Pending);
        }

        match self
            .settlement
            .settle(&payment.order_id, SettlementSource::Reconciliation)
            .await?
        {
            SettlementOutcome::Settled(_) => Ok(PaymentCheck::Settled),
            SettlementOutcome::AlreadySettled => Ok(PaymentCheck::Skipped),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ledger::NewPayment;
    use crate::database::memory::InMemoryLedgerStore;
    use crate::payments::error::{PaymentError, PaymentResult};
    use crate::payments::provider::PaymentGateway;
    use crate::payments::types::{GatewayKind, Invoice, InvoiceRequest};
    use crate::services::notification::LogNotifier;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::collections::HashSet;

    struct ScriptedGateway {
        kind: GatewayKind,
        paid: HashSet<String>,
        broken: HashSet<String>,
    }

    #[async_trait]
    impl PaymentGateway for ScriptedGateway {
        async fn create_invoice(&self, request: InvoiceRequest) -> PaymentResult<Invoice> {
            Ok(Invoice {
                pay_url: String::new(),
                order_id: request.order_id,
                external_id: None,
            })
        }

        async fn check_status(&self, query: StatusQuery) -> PaymentResult<bool> {
            if self.broken.contains(&query.order_id) {
                return Err(PaymentError::NetworkError {
                    message: "connection reset".to_string(),
                });
            }
            Ok(self.paid.contains(&query.order_id))
        }

        fn kind(&self) -> GatewayKind {
            self.kind
        }
    }

    async fn add_payment(ledger: &InMemoryLedgerStore, order_id: &str, gateway: GatewayKind) {
        ledger
            .create_payment(NewPayment {
                order_id: order_id.to_string(),
                user_id: 1,
                gateway,
                amount: Decimal::from(100),
                invoice_url: None,
                external_invoice_id: None,
                message_id: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn one_failing_payment_does_not_stop_the_cycle() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        add_payment(&ledger, "a-broken", GatewayKind::LolzTeam).await;
        add_payment(&ledger, "b-paid", GatewayKind::LolzTeam).await;
        add_payment(&ledger, "c-unpaid", GatewayKind::LolzTeam).await;
        add_payment(&ledger, "d-push", GatewayKind::CryptoBot).await;

        let gateway = ScriptedGateway {
            kind: GatewayKind::LolzTeam,
            paid: ["b-paid".to_string(), "d-push".to_string()].into_iter().collect(),
            broken: ["a-broken".to_string()].into_iter().collect(),
        };
        let registry = Arc::new(GatewayRegistry::new().with_gateway(Arc::new(gateway)));
        let notifier = Arc::new(LogNotifier);
        let settlement = Arc::new(SettlementService::new(ledger.clone(), notifier.clone()));
        let worker = ReconciliationWorker::new(
            ledger.clone(),
            registry,
            settlement,
            notifier,
            ReconciliationConfig::default(),
        );

        let report = worker.run_cycle_at(Utc::now()).await.unwrap();
        assert_eq!(
            report,
            ReconciliationReport {
                expired: 0,
                settled: 1,
                still_pending: 2,
                errors: 1,
            }
        );
        assert_eq!(
            ledger.get_user(1).await.unwrap().unwrap().balance,
            Decimal::from(100)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn worker_stops_on_shutdown_signal() {
        let ledger = Arc::new(InMemoryLedgerStore::new());
        let notifier = Arc::new(LogNotifier);
        let worker = ReconciliationWorker::new(
            ledger.clone(),
            Arc::new(GatewayRegistry::new()),
            Arc::new(SettlementService::new(ledger, notifier.clone())),
            notifier,
            ReconciliationConfig::default(),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));
        tokio::time::advance(Duration::from_secs(45)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
