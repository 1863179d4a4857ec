//! Profitability estimator
//!
//! Converts the on-chain cost of a purchase into the settlement currency
//! with a lazily refreshed TON rate. A failed refresh keeps the last known
//! rate, so estimation never fails a purchase.

use crate::services::fulfillment::PurchaseKind;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RateError {
    #[error("rate request failed: {0}")]
    Http(String),
    #[error("rate missing from response")]
    Missing,
}

#[async_trait]
pub trait RateProvider: Send + Sync {
    /// TON price in the settlement currency.
    async fn fetch_ton_rate(&self) -> Result<Decimal, RateError>;

    fn name(&self) -> &str;
}

pub struct CoinGeckoRateProvider {
    client: Client,
    url: String,
}

impl CoinGeckoRateProvider {
    pub fn new(timeout: Duration) -> Result<Self, RateError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RateError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url: "https://api.coingecko.com/api/v3/simple/price?ids=the-open-network&vs_currencies=rub"
                .to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Pull `the-open-network.rub` out of a CoinGecko simple-price response.
pub fn parse_coingecko_rate(body: &serde_json::Value) -> Option<Decimal> {
    let rate = body.get("the-open-network")?.get("rub")?;
    match rate {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(Decimal::from_f64)
            .filter(|r| *r > Decimal::ZERO),
        serde_json::Value::String(s) => s.parse::<Decimal>().ok().filter(|r| *r > Decimal::ZERO),
        _ => None,
    }
}

#[async_trait]
impl RateProvider for CoinGeckoRateProvider {
    async fn fetch_ton_rate(&self) -> Result<Decimal, RateError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RateError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RateError::Http(format!("HTTP {}", response.status())));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| RateError::Http(e.to_string()))?;
        parse_coingecko_rate(&body).ok_or(RateError::Missing)
    }

    fn name(&self) -> &str {
        "coingecko"
    }
}

#[derive(Debug, Clone)]
pub struct ProfitEstimatorConfig {
    pub rate_ttl: Duration,
    pub fallback_rate: Decimal,
    pub cost_per_star_ton: Decimal,
}

impl Default for ProfitEstimatorConfig {
    fn default() -> Self {
        Self {
            rate_ttl: Duration::from_secs(300),
            fallback_rate: Decimal::from(300),
            cost_per_star_ton: Decimal::new(54, 4),
        }
    }
}

impl ProfitEstimatorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rate_ttl: std::env::var("TON_RATE_TTL_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_ttl),
            fallback_rate: std::env::var("TON_RATE_FALLBACK")
                .ok()
                .and_then(|v| v.parse::<Decimal>().ok())
                .unwrap_or(defaults.fallback_rate),
            cost_per_star_ton: defaults.cost_per_star_ton,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfitEstimate {
    pub cost_ton: Decimal,
    /// Cost converted into the settlement currency
    pub cost: Decimal,
    pub profit: Decimal,
    pub margin_percent: Decimal,
}

#[derive(Debug)]
struct CachedRate {
    rate: Decimal,
    fetched_at: Option<Instant>,
}

pub struct ProfitEstimator {
    config: ProfitEstimatorConfig,
    provider: Arc<dyn RateProvider>,
    cached: RwLock<CachedRate>,
}

/// `profit / cost × 100`, 0 when the cost is not positive.
pub fn margin_percent(cost: Decimal, price: Decimal) -> Decimal {
    if cost <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (price - cost) / cost * Decimal::ONE_HUNDRED
}

impl ProfitEstimator {
    pub fn new(config: ProfitEstimatorConfig, provider: Arc<dyn RateProvider>) -> Self {
        let cached = CachedRate {
            rate: config.fallback_rate,
            fetched_at: None,
        };
        Self {
            config,
            provider,
            cached: RwLock::new(cached),
        }
    }

    pub fn cost_ton(&self, kind: &PurchaseKind) -> Decimal {
        match *kind {
            PurchaseKind::Stars { quantity } => Decimal::from(quantity) * self.config.cost_per_star_ton,
            PurchaseKind::Premium { months } => match months {
                3 => Decimal::new(43, 1),
                6 => Decimal::new(81, 1),
                12 => Decimal::new(135, 1),
                other => Decimal::from(other) * Decimal::new(143, 2),
            },
        }
    }

    /// Current rate, refreshed when older than the TTL. A failed refresh
    /// serves the last known rate until the TTL runs out again.
    pub async fn current_rate(&self) -> Decimal {
        {
            let cached = self.cached.read().await;
            if let Some(at) = cached.fetched_at {
                if at.elapsed() < self.config.rate_ttl {
                    return cached.rate;
                }
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(at) = cached.fetched_at {
            if at.elapsed() < self.config.rate_ttl {
                return cached.rate;
            }
        }
        match self.provider.fetch_ton_rate().await {
            Ok(rate) => {
                debug!(provider = self.provider.name(), rate = %rate, "TON rate refreshed");
                cached.rate = rate;
                cached.fetched_at = Some(Instant::now());
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, rate = %cached.rate, "TON rate refresh failed, keeping last known rate");
                // retry after a full TTL
                cached.fetched_at = Some(Instant::now());
            }
        }
        cached.rate
    }

    pub async fn estimate(&self, kind: &PurchaseKind, price: Decimal) -> ProfitEstimate {
        let cost_ton = self.cost_ton(kind);
        let rate = self.current_rate().await;
        let cost = cost_ton * rate;
        ProfitEstimate {
            cost_ton,
            cost,
            profit: price - cost,
            margin_percent: margin_percent(cost, price),
        }
    }
}
