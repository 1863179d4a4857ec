mod common;

use common::{FakePlatform, FakeWallet, FixedRate, PlatformFailure, Recorder};
use rust_decimal::Decimal;
use starfund_backend::database::{InMemoryLedgerStore, InMemorySettingsStore, LedgerStore};
use starfund_backend::services::fulfillment::{
    FulfillmentEngine, FulfillmentError, PurchaseKind, PurchaseRequest,
};
use starfund_backend::services::notification::OperatorAlert;
use starfund_backend::services::profit::{ProfitEstimator, ProfitEstimatorConfig};
use std::sync::Arc;

const TON: u64 = 1_000_000_000;

struct Harness {
    ledger: Arc<InMemoryLedgerStore>,
    wallet: Arc<FakeWallet>,
    recorder: Arc<Recorder>,
    engine: FulfillmentEngine,
}

async fn harness(platform: FakePlatform, wallet_nano: u64) -> Harness {
    harness_with(platform, FakeWallet::with_balance(wallet_nano)).await
}

async fn harness_with(platform: FakePlatform, wallet: FakeWallet) -> Harness {
    let ledger = Arc::new(InMemoryLedgerStore::new());
    ledger
        .insert_user(42, Some("buyer_one"), Decimal::from(100))
        .await;
    let wallet = Arc::new(wallet);
    let recorder = Arc::new(Recorder::default());
    let estimator = Arc::new(ProfitEstimator::new(
        ProfitEstimatorConfig::default(),
        Arc::new(FixedRate(Decimal::from(250))),
    ));
    let engine = FulfillmentEngine::new(
        ledger.clone(),
        Arc::new(InMemorySettingsStore::new()),
        Arc::new(platform),
        wallet.clone(),
        estimator,
        recorder.clone(),
        recorder.clone(),
    );
    Harness {
        ledger,
        wallet,
        recorder,
        engine,
    }
}

fn stars_for(recipient: &str, total: i64) -> PurchaseRequest {
    PurchaseRequest {
        user_id: 42,
        kind: PurchaseKind::Stars { quantity: 50 },
        recipient: recipient.to_string(),
        total: Decimal::from(total),
    }
}

/// Balance back to where it started, nothing recorded, buyer told.
async fn assert_net_zero(h: &Harness) {
    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.balance, Decimal::from(100));
    assert!(h.ledger.purchase_history(42, 10).await.unwrap().is_empty());
    assert_eq!(Recorder::count(&h.recorder.failed), 1);
    assert_eq!(Recorder::count(&h.recorder.completed), 0);
}

#[tokio::test]
async fn unknown_recipient_refunds_the_debit() {
    let h = harness(FakePlatform::knowing(&["buyer_one"], TON), 10 * TON).await;

    let err = h
        .engine
        .purchase(stars_for("@ghost_user", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::RecipientNotFound { .. }));
    assert!(err.funds_returned());
    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.balance, Decimal::from(100));
    assert!(h.ledger.purchase_history(42, 10).await.unwrap().is_empty());
    assert_eq!(h.wallet.transfer_count(), 0);
    assert_eq!(Recorder::count(&h.recorder.failed), 1);
}

#[tokio::test]
async fn wallet_shortfall_aborts_before_transfer() {
    let h = harness(FakePlatform::knowing(&["friend_two"], 2 * TON), TON).await;

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        FulfillmentError::FundingShortfall {
            required_nano,
            available_nano,
        } if required_nano == 2 * TON && available_nano == TON
    ));
    assert_eq!(h.wallet.transfer_count(), 0);
    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.balance, Decimal::from(100));
    assert!(h.recorder.alerts().iter().any(|a| matches!(
        a,
        OperatorAlert::FundingShortfall { user_id: 42, .. }
    )));
}

#[tokio::test]
async fn successful_purchase_records_history_and_consumes_discount() {
    let h = harness(FakePlatform::knowing(&["buyer_one"], TON / 2), 10 * TON).await;
    h.ledger.set_discount(42, Some(10)).await.unwrap();

    let receipt = h
        .engine
        .purchase(stars_for("buyer_one", 81))
        .await
        .unwrap();

    assert_eq!(receipt.new_balance, Decimal::from(19));
    assert_eq!(receipt.description, "50 Stars");
    assert_eq!(receipt.tx_ref, "tx-1");

    let transfers = h.wallet.transfers.lock().unwrap().clone();
    assert_eq!(transfers.len(), 1);
    assert_eq!(transfers[0].destination, "EQfragment");
    assert_eq!(transfers[0].amount_nano, TON / 2);
    assert_eq!(transfers[0].memo, "50 Telegram Stars Ref#T3st");

    let history = h.ledger.purchase_history(42, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].purchase_type, "stars");
    assert_eq!(history[0].quantity, 50);
    assert_eq!(history[0].cost, Decimal::from(81));

    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.discount, None);
    assert_eq!(Recorder::count(&h.recorder.completed), 1);
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::Sale { user_id: 42, .. })));
}

#[tokio::test]
async fn insufficient_balance_touches_nothing() {
    let h = harness(FakePlatform::knowing(&["buyer_one"], TON), 10 * TON).await;

    let err = h
        .engine
        .purchase(stars_for("buyer_one", 150))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::InsufficientFunds { .. }));
    assert!(!err.funds_returned());
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h.recorder.alerts().is_empty());
    assert_eq!(Recorder::count(&h.recorder.failed), 0);
}

#[tokio::test]
async fn rejected_init_request_refunds() {
    let platform = FakePlatform::knowing(&["friend_two"], TON).failing(PlatformFailure::InitRequest);
    let h = harness(platform, 10 * TON).await;

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Platform { .. }));
    assert!(err.funds_returned());
    assert_net_zero(&h).await;
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::PlatformRejected { user_id: 42, .. })));
}

#[tokio::test]
async fn rejected_transaction_intent_refunds() {
    let platform =
        FakePlatform::knowing(&["friend_two"], TON).failing(PlatformFailure::TransactionIntent);
    let h = harness(platform, 10 * TON).await;

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Platform { .. }));
    assert_net_zero(&h).await;
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::PlatformRejected { user_id: 42, .. })));
}

#[tokio::test]
async fn undecodable_payload_refunds() {
    let platform = FakePlatform::knowing(&["friend_two"], TON).failing(PlatformFailure::BadPayload);
    let h = harness(platform, 10 * TON).await;

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::Platform { .. }));
    assert_net_zero(&h).await;
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::PlatformRejected { user_id: 42, .. })));
}

#[tokio::test]
async fn unreadable_wallet_balance_refunds() {
    let h = harness_with(FakePlatform::knowing(&["friend_two"], TON), FakeWallet::unreadable()).await;

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::BalanceUnavailable { .. }));
    assert!(err.funds_returned());
    assert_net_zero(&h).await;
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::OnChainFailure { user_id: 42, .. })));
}

#[tokio::test]
async fn failed_transfer_refunds() {
    let h = harness_with(
        FakePlatform::knowing(&["friend_two"], TON),
        FakeWallet::rejecting(10 * TON),
    )
    .await;
    h.ledger.set_discount(42, Some(10)).await.unwrap();

    let err = h
        .engine
        .purchase(stars_for("friend_two", 60))
        .await
        .unwrap_err();

    assert!(matches!(err, FulfillmentError::OnChain { .. }));
    assert_net_zero(&h).await;
    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.discount, Some(10));
    assert!(h
        .recorder
        .alerts()
        .iter()
        .any(|a| matches!(a, OperatorAlert::OnChainFailure { user_id: 42, .. })));
}

#[tokio::test]
async fn invalid_kinds_are_rejected_before_the_debit() {
    let h = harness(FakePlatform::knowing(&["buyer_one"], TON), 10 * TON).await;

    for kind in [
        PurchaseKind::Stars { quantity: 1 },
        PurchaseKind::Premium { months: 7 },
    ] {
        let err = h
            .engine
            .purchase(PurchaseRequest {
                user_id: 42,
                kind,
                recipient: "buyer_one".to_string(),
                total: Decimal::from(2),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidKind(_)));
        assert!(!err.funds_returned());
    }

    let user = h.ledger.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.balance, Decimal::from(100));
    assert_eq!(h.wallet.transfer_count(), 0);
    assert!(h.recorder.alerts().is_empty());
}
