//! Liveness and readiness of the storefront.
//!
//! The database is critical. The TON wallet and the delivery platform only
//! degrade the service: top-ups and settlement keep working without them,
//! purchases do not.

use crate::chains::traits::OnChainWallet;
use crate::delivery::traits::DeliveryPlatform;
use crate::services::notification::format_ton;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, warn};

/// Below this the wallet is reported with a warning (0.5 TON).
pub const DEFAULT_LOW_BALANCE_NANO: u64 = 500_000_000;

#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: BTreeMap<&'static str, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentState {
    Up,
    Warning,
    Down,
}

/// What a single probe found.
enum Probe {
    Up,
    Warning(String),
    Down(String),
}

impl HealthStatus {
    fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }

    fn component(&self, state: ComponentState) -> bool {
        self.checks.values().any(|c| c.status == state)
    }
}

#[derive(Clone, Default)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    wallet: Option<(Arc<dyn OnChainWallet>, u64)>,
    platform: Option<Arc<dyn DeliveryPlatform>>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    pub fn with_wallet(self, wallet: Arc<dyn OnChainWallet>) -> Self {
        self.with_wallet_threshold(wallet, DEFAULT_LOW_BALANCE_NANO)
    }

    pub fn with_wallet_threshold(mut self, wallet: Arc<dyn OnChainWallet>, low_nano: u64) -> Self {
        self.wallet = Some((wallet, low_nano));
        self
    }

    pub fn with_platform(mut self, platform: Arc<dyn DeliveryPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub async fn check_health(&self) -> HealthStatus {
        let mut status = HealthStatus::new();
        let database_up = self.check_database(&mut status).await;

        if let Some((wallet, low_nano)) = &self.wallet {
            let low_nano = *low_nano;
            run_probe(&mut status, "ton_wallet", Duration::from_secs(10), async move {
                match wallet.balance_nano().await {
                    Ok(nano) if nano < low_nano => Probe::Warning(format!(
                        "balance {} TON is below {} TON",
                        format_ton(nano),
                        format_ton(low_nano)
                    )),
                    Ok(_) => Probe::Up,
                    Err(e) => Probe::Down(e.to_string()),
                }
            })
            .await;
        }

        if let Some(platform) = &self.platform {
            run_probe(&mut status, "delivery_platform", Duration::from_secs(10), async move {
                match platform.check_session().await {
                    Ok(true) => Probe::Up,
                    Ok(false) => Probe::Down("session rejected".to_string()),
                    Err(e) => Probe::Down(e.to_string()),
                }
            })
            .await;
        }

        status.status = if !database_up {
            HealthState::Unhealthy
        } else if status.component(ComponentState::Down) || status.component(ComponentState::Warning)
        {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };
        status
    }

    #[cfg(feature = "database")]
    async fn check_database(&self, status: &mut HealthStatus) -> bool {
        let Some(pool) = &self.db_pool else {
            return true;
        };
        run_probe(status, "database", Duration::from_secs(5), async move {
            match crate::database::health_check(pool).await {
                Ok(()) => Probe::Up,
                Err(e) => Probe::Down(e.to_string()),
            }
        })
        .await
    }

    #[cfg(not(feature = "database"))]
    async fn check_database(&self, _status: &mut HealthStatus) -> bool {
        true
    }
}

/// Record one probe under `name`; true unless it came back down.
async fn run_probe<F>(status: &mut HealthStatus, name: &'static str, limit: Duration, check: F) -> bool
where
    F: Future<Output = Probe>,
{
    let start = Instant::now();
    let outcome = timeout(limit, check)
        .await
        .unwrap_or_else(|_| Probe::Down(format!("timed out after {}s", limit.as_secs())));
    let response_time_ms = start.elapsed().as_millis();

    let (state, details) = match outcome {
        Probe::Up => (ComponentState::Up, None),
        Probe::Warning(details) => {
            warn!(component = name, details = %details, "health check warning");
            (ComponentState::Warning, Some(details))
        }
        Probe::Down(details) => {
            error!(component = name, details = %details, "health check failed");
            (ComponentState::Down, Some(details))
        }
    };
    status.checks.insert(
        name,
        ComponentHealth {
            status: state,
            response_time_ms,
            details,
        },
    );
    state != ComponentState::Down
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub fn health_routes(checker: HealthChecker) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .with_state(checker)
}

async fn root() -> &'static str {
    "starfund backend"
}

/// 503 only when a critical component is down.
async fn health(State(checker): State<HealthChecker>) -> (StatusCode, Json<HealthStatus>) {
    let status = checker.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

async fn liveness() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::traits::{TransferReceipt, TransferRequest, WalletError, WalletResult};
    use async_trait::async_trait;

    struct FixedWallet(WalletResult<u64>);

    #[async_trait]
    impl OnChainWallet for FixedWallet {
        fn chain_id(&self) -> &str {
            "ton-test"
        }

        fn address(&self) -> String {
            "EQtest".to_string()
        }

        async fn balance_nano(&self) -> WalletResult<u64> {
            self.0.clone()
        }

        async fn transfer(&self, _request: TransferRequest) -> WalletResult<TransferReceipt> {
            Err(WalletError::Rejected {
                message: "read-only".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn checker_without_components_is_healthy() {
        let status = HealthChecker::new().check_health().await;
        assert!(status.is_healthy());
        assert!(status.checks.is_empty());
    }

    #[tokio::test]
    async fn low_wallet_balance_degrades() {
        let status = HealthChecker::new()
            .with_wallet(Arc::new(FixedWallet(Ok(100_000_000))))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Degraded);
        let wallet = &status.checks["ton_wallet"];
        assert_eq!(wallet.status, ComponentState::Warning);
        assert!(wallet.details.as_deref().unwrap_or("").contains("0.1 TON"));
    }

    #[tokio::test]
    async fn unreachable_wallet_is_down_but_not_critical() {
        let status = HealthChecker::new()
            .with_wallet(Arc::new(FixedWallet(Err(WalletError::Unavailable {
                message: "toncenter 502".to_string(),
            }))))
            .check_health()
            .await;
        assert_eq!(status.status, HealthState::Degraded);
        assert_eq!(status.checks["ton_wallet"].status, ComponentState::Down);
    }

    #[tokio::test]
    async fn funded_wallet_is_up() {
        let status = HealthChecker::new()
            .with_wallet(Arc::new(FixedWallet(Ok(5_000_000_000))))
            .check_health()
            .await;
        assert!(status.is_healthy());
    }
}
