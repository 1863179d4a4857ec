use axum::Router;
use dotenv::dotenv;
use starfund_backend::api::{self, ApiState};
use starfund_backend::chains::ton::{TonConfig, TonWallet};
use starfund_backend::chains::traits::OnChainWallet;
use starfund_backend::config::AppConfig;
use starfund_backend::database::postgres::{PgLedgerStore, PgSettingsStore};
use starfund_backend::database::{
    init_pool_from_config, run_migrations, InMemoryLedgerStore, InMemorySettingsStore,
    LedgerStore, SettingsStore,
};
use starfund_backend::delivery::{DeliveryPlatform, FragmentClient};
use starfund_backend::health::{health_routes, HealthChecker};
use starfund_backend::logging::init_tracing_with;
use starfund_backend::middleware::auth::InternalToken;
use starfund_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use starfund_backend::payments::GatewayRegistry;
use starfund_backend::services::notification::{
    LogNotifier, OperatorAlerts, TelegramNotifier, TelegramNotifierConfig, UserNotifier,
};
use starfund_backend::services::profit::{CoinGeckoRateProvider, ProfitEstimatorConfig};
use starfund_backend::services::{
    FulfillmentEngine, PricingService, ProfitEstimator, SettlementService, TopUpService,
    WebhookProcessor,
};
use starfund_backend::workers::{
    FragmentSessionWorker, ReconciliationConfig, ReconciliationWorker, SessionKeeperConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate()?;

    let skip_externals = std::env::var("SKIP_EXTERNALS")
        .unwrap_or_else(|_| "false".to_string())
        .to_lowercase()
        == "true";

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Starfund backend service"
    );

    // Persistence
    let mut health_checker = HealthChecker::new();
    let (ledger, settings): (Arc<dyn LedgerStore>, Arc<dyn SettingsStore>) = if skip_externals {
        info!("⏭️  Using in-memory ledger (SKIP_EXTERNALS=true)");
        (
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(InMemorySettingsStore::new()),
        )
    } else {
        info!("📊 Initializing database connection pool...");
        config.database.require_url()?;
        let pool = init_pool_from_config(&config.database).await.map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
        run_migrations(&pool).await?;
        info!(
            max_connections = pool.options().get_max_connections(),
            "✅ Database connection pool initialized"
        );
        health_checker = health_checker.with_database(pool.clone());
        (
            Arc::new(PgLedgerStore::new(pool.clone())),
            Arc::new(PgSettingsStore::new(pool)),
        )
    };

    // Notifications
    let telegram = match config.bot.token.as_deref() {
        Some(token) => Some(Arc::new(TelegramNotifier::new(TelegramNotifierConfig::new(
            token,
            config.bot.admin_ids.clone(),
        ))?)),
        None => {
            warn!("BOT_TOKEN not set, notifications are logged only");
            None
        }
    };
    let (notifier, alerts): (Arc<dyn UserNotifier>, Arc<dyn OperatorAlerts>) = match telegram {
        Some(bot) => (
            bot.clone() as Arc<dyn UserNotifier>,
            bot as Arc<dyn OperatorAlerts>,
        ),
        None => (
            Arc::new(LogNotifier::new()) as Arc<dyn UserNotifier>,
            Arc::new(LogNotifier::new()) as Arc<dyn OperatorAlerts>,
        ),
    };

    // External integrations
    let gateways = Arc::new(GatewayRegistry::from_env()?);
    if gateways.is_empty() {
        warn!("No payment gateway is configured, top-ups are unavailable");
    }
    info!(gateways = ?gateways.list_available(), "✅ Payment gateways ready");

    let platform: Arc<dyn DeliveryPlatform> = Arc::new(FragmentClient::from_env()?);
    let wallet: Arc<dyn OnChainWallet> = Arc::new(TonWallet::new(TonConfig::from_env()?).await?);
    health_checker = health_checker
        .with_wallet(wallet.clone())
        .with_platform(platform.clone());

    // Services
    let pricing = Arc::new(PricingService::new(config.pricing.clone()));
    let rates = Arc::new(CoinGeckoRateProvider::new(Duration::from_secs(10))?);
    let estimator = Arc::new(ProfitEstimator::new(ProfitEstimatorConfig::from_env(), rates));
    let settlement = Arc::new(SettlementService::new(ledger.clone(), notifier.clone()));
    let topups = Arc::new(TopUpService::new(
        ledger.clone(),
        settings.clone(),
        gateways.clone(),
        config.payments.clone(),
    ));
    let fulfillment = Arc::new(FulfillmentEngine::new(
        ledger.clone(),
        settings.clone(),
        platform.clone(),
        wallet,
        estimator,
        notifier.clone(),
        alerts.clone(),
    ));
    let webhooks = Arc::new(WebhookProcessor::new(gateways.clone(), settlement.clone()));

    // Workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let reconciliation_config = ReconciliationConfig {
        payment_timeout: config.payments.payment_timeout,
        ..ReconciliationConfig::from_env()
    };
    info!(
        interval_secs = reconciliation_config.interval.as_secs(),
        payment_timeout_secs = reconciliation_config.payment_timeout.as_secs(),
        "Starting payment reconciliation worker"
    );
    let reconciliation = ReconciliationWorker::new(
        ledger.clone(),
        gateways,
        settlement,
        notifier,
        reconciliation_config,
    );
    let session_keeper = FragmentSessionWorker::new(
        platform,
        settings,
        alerts,
        SessionKeeperConfig::from_env(),
    );
    let worker_handles = vec![
        tokio::spawn(reconciliation.run(worker_shutdown_rx.clone())),
        tokio::spawn(session_keeper.run(worker_shutdown_rx)),
    ];

    // Routes
    let api_state = ApiState {
        ledger,
        topups,
        fulfillment,
        pricing,
    };
    let token = InternalToken::new(config.server.internal_api_token.clone());
    if token.0.is_none() {
        warn!("INTERNAL_API_TOKEN not set, the internal API is unauthenticated");
    }

    let app = Router::new()
        .merge(health_routes(health_checker))
        .merge(api::internal_routes(api_state, token))
        .merge(api::webhook_routes(webhooks))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "🚀 Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    for handle in worker_handles {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            error!("Timed out waiting for worker shutdown");
        }
    }

    info!("👋 Server shutdown complete");

    Ok(())
}
