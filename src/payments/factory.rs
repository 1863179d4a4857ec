use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentGateway;
use crate::payments::providers::{CryptoBotGateway, CrystalPayGateway, LolzTeamGateway};
use crate::payments::types::GatewayKind;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub enabled_gateways: Vec<GatewayKind>,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            enabled_gateways: GatewayKind::ALL.to_vec(),
        }
    }
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = std::env::var("ENABLED_PAYMENT_GATEWAYS")
            .unwrap_or_else(|_| "cryptobot,lzt,crystalpay".to_string());
        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let kind = GatewayKind::from_str(value)?;
            if !enabled_gateways.contains(&kind) {
                enabled_gateways.push(kind);
            }
        }
        Ok(Self { enabled_gateways })
    }
}

/// The set of gateways the service can issue invoices through.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<GatewayKind, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled gateway whose credentials are present. A gateway
    /// missing credentials is skipped with a warning.
    pub fn from_env() -> PaymentResult<Self> {
        let config = PaymentFactoryConfig::from_env()?;
        let mut registry = Self::new();

        for kind in config.enabled_gateways {
            let built: PaymentResult<Arc<dyn PaymentGateway>> = match kind {
                GatewayKind::CryptoBot => {
                    CryptoBotGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
                GatewayKind::LolzTeam => {
                    LolzTeamGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
                GatewayKind::CrystalPay => {
                    CrystalPayGateway::from_env().map(|g| Arc::new(g) as Arc<dyn PaymentGateway>)
                }
            };
            match built {
                Ok(gateway) => {
                    info!(gateway = %kind, "payment gateway enabled");
                    registry.register(gateway);
                }
                Err(PaymentError::NotConfigured { .. }) => {
                    warn!(gateway = %kind, "payment gateway credentials missing, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(registry)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.register(gateway);
        self
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.insert(gateway.kind(), gateway);
    }

    pub fn get(&self, kind: GatewayKind) -> PaymentResult<Arc<dyn PaymentGateway>> {
        self.gateways
            .get(&kind)
            .cloned()
            .ok_or(PaymentError::NotConfigured {
                gateway: kind.to_string(),
            })
    }

    pub fn list_available(&self) -> Vec<GatewayKind> {
        let mut kinds: Vec<GatewayKind> = self.gateways.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn is_empty(&self) -> bool {
        self.gateways.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::{LolzTeamConfig, LolzTeamGateway};

    #[test]
    fn gateway_name_parsing_works() {
        assert!(matches!(
            GatewayKind::from_str("crystalpay"),
            Ok(GatewayKind::CrystalPay)
        ));
        assert!(GatewayKind::from_str("unknown").is_err());
    }

    #[test]
    fn registry_returns_registered_gateways_only() {
        let lzt = LolzTeamGateway::new(LolzTeamConfig {
            token: "t".to_string(),
            user_id: "1".to_string(),
            ..LolzTeamConfig::default()
        })
        .unwrap();
        let registry = GatewayRegistry::new().with_gateway(Arc::new(lzt));

        assert_eq!(registry.list_available(), vec![GatewayKind::LolzTeam]);
        assert!(registry.get(GatewayKind::LolzTeam).is_ok());
        assert!(matches!(
            registry.get(GatewayKind::CryptoBot),
            Err(PaymentError::NotConfigured { .. })
        ));
    }
}
