//! Keeps the delivery platform session under watch.
//!
//! Every hour the worker asks the platform whether the session cookies are
//! still accepted and stamps `FragmentTokenLastUpdate` when the recorded
//! expiry is unknown or less than an hour away. Nothing here is fatal.

use crate::database::settings::{SettingKey, SettingsStore};
use crate::delivery::traits::DeliveryPlatform;
use crate::services::notification::{OperatorAlert, OperatorAlerts};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SessionKeeperConfig {
    pub interval: Duration,
    /// Refresh once the expiry is closer than this
    pub refresh_margin: ChronoDuration,
}

impl Default for SessionKeeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            refresh_margin: ChronoDuration::hours(1),
        }
    }
}

impl SessionKeeperConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.interval = Duration::from_secs(
            std::env::var("FRAGMENT_SESSION_CHECK_SECONDS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(cfg.interval.as_secs()),
        );
        cfg
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCheck {
    /// `None` when the platform could not be reached
    pub session_valid: Option<bool>,
    pub refreshed: bool,
}

/// Whether a token expiring at `expires_at` should be refreshed at `now`.
/// A missing or unreadable expiry always asks for a refresh.
pub fn needs_refresh(expires_at: Option<&str>, now: DateTime<Utc>, margin: ChronoDuration) -> bool {
    match expires_at
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
    {
        Some(expires_at) => now >= expires_at.with_timezone(&Utc) - margin,
        None => true,
    }
}

pub struct FragmentSessionWorker {
    platform: Arc<dyn DeliveryPlatform>,
    settings: Arc<dyn SettingsStore>,
    alerts: Arc<dyn OperatorAlerts>,
    config: SessionKeeperConfig,
}

impl FragmentSessionWorker {
    pub fn new(
        platform: Arc<dyn DeliveryPlatform>,
        settings: Arc<dyn SettingsStore>,
        alerts: Arc<dyn OperatorAlerts>,
        config: SessionKeeperConfig,
    ) -> Self {
        Self {
            platform,
            settings,
            alerts,
            config,
        }
    }

    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            platform = self.platform.name(),
            interval_secs = self.config.interval.as_secs(),
            "session keeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("session keeper stopping");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    self.run_once_at(Utc::now()).await;
                }
            }
        }

        info!("session keeper stopped");
    }

    pub async fn run_once_at(&self, now: DateTime<Utc>) -> SessionCheck {
        let mut check = SessionCheck::default();

        match self.platform.check_session().await {
            Ok(true) => check.session_valid = Some(true),
            Ok(false) => {
                check.session_valid = Some(false);
                warn!(platform = self.platform.name(), "delivery platform session rejected");
                self.alerts
                    .alert(OperatorAlert::SessionExpired {
                        platform: self.platform.name().to_string(),
                    })
                    .await;
            }
            Err(e) => warn!(platform = self.platform.name(), error = %e, "session check failed"),
        }

        let expires_at = match self.settings.get(SettingKey::FragmentTokenExpiresAt).await {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "could not read session expiry");
                return check;
            }
        };
        if needs_refresh(expires_at.as_deref(), now, self.config.refresh_margin) {
            match self
                .settings
                .set(SettingKey::FragmentTokenLastUpdate, &now.to_rfc3339())
                .await
            {
                Ok(()) => {
                    check.refreshed = true;
                    info!("delivery session timestamp refreshed");
                }
                Err(e) => error!(error = %e, "could not stamp session refresh"),
            }
        }

        check
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::InMemorySettingsStore;
    use crate::delivery::errors::{FragmentError, FragmentResult};
    use crate::delivery::traits::TransactionIntent;
    use crate::services::fulfillment::PurchaseKind;
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    struct SessionOnly(FragmentResult<bool>);

    #[async_trait]
    impl DeliveryPlatform for SessionOnly {
        fn name(&self) -> &str {
            "fragment"
        }

        async fn resolve_recipient(&self, _: &str, _: &PurchaseKind) -> FragmentResult<String> {
            Err(FragmentError::network_error("unused"))
        }

        async fn init_request(&self, _: &str, _: &str, _: &PurchaseKind) -> FragmentResult<String> {
            Err(FragmentError::network_error("unused"))
        }

        async fn transaction_intent(
            &self,
            _: &str,
            _: &str,
            _: &PurchaseKind,
        ) -> FragmentResult<TransactionIntent> {
            Err(FragmentError::network_error("unused"))
        }

        async fn check_session(&self) -> FragmentResult<bool> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct RecordingAlerts(Mutex<Vec<OperatorAlert>>);

    #[async_trait]
    impl OperatorAlerts for RecordingAlerts {
        async fn alert(&self, alert: OperatorAlert) {
            self.0.lock().await.push(alert);
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn refresh_window_is_one_hour_before_expiry() {
        let margin = ChronoDuration::hours(1);
        let expiry = "2026-01-01T12:00:00+00:00";
        assert!(!needs_refresh(Some(expiry), at("2026-01-01T10:59:59Z"), margin));
        assert!(needs_refresh(Some(expiry), at("2026-01-01T11:00:00Z"), margin));
        assert!(needs_refresh(None, at("2026-01-01T00:00:00Z"), margin));
        assert!(needs_refresh(Some(""), at("2026-01-01T00:00:00Z"), margin));
        assert!(needs_refresh(Some("garbage"), at("2026-01-01T00:00:00Z"), margin));
    }

    #[tokio::test]
    async fn missing_expiry_stamps_last_update() {
        let settings = Arc::new(InMemorySettingsStore::new());
        let alerts = Arc::new(RecordingAlerts::default());
        let worker = FragmentSessionWorker::new(
            Arc::new(SessionOnly(Ok(true))),
            settings.clone(),
            alerts.clone(),
            SessionKeeperConfig::default(),
        );
        let now = at("2026-03-01T08:00:00Z");
        let check = worker.run_once_at(now).await;
        assert_eq!(
            check,
            SessionCheck {
                session_valid: Some(true),
                refreshed: true
            }
        );
        assert_eq!(
            settings.get(SettingKey::FragmentTokenLastUpdate).await.unwrap(),
            Some(now.to_rfc3339())
        );
        assert!(alerts.0.lock().await.is_empty());
    }

    #[tokio::test]
    async fn rejected_session_alerts_and_far_expiry_is_left_alone() {
        let settings = Arc::new(InMemorySettingsStore::new());
        settings
            .set(SettingKey::FragmentTokenExpiresAt, "2026-03-10T00:00:00Z")
            .await
            .unwrap();
        let alerts = Arc::new(RecordingAlerts::default());
        let worker = FragmentSessionWorker::new(
            Arc::new(SessionOnly(Ok(false))),
            settings.clone(),
            alerts.clone(),
            SessionKeeperConfig::default(),
        );
        let check = worker.run_once_at(at("2026-03-01T08:00:00Z")).await;
        assert_eq!(check.session_valid, Some(false));
        assert!(!check.refreshed);
        assert_eq!(alerts.0.lock().await.len(), 1);
        assert!(settings
            .get(SettingKey::FragmentTokenLastUpdate)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unreachable_platform_is_not_fatal() {
        let settings = Arc::new(InMemorySettingsStore::new());
        let worker = FragmentSessionWorker::new(
            Arc::new(SessionOnly(Err(FragmentError::network_error("timeout")))),
            settings,
            Arc::new(RecordingAlerts::default()),
            SessionKeeperConfig::default(),
        );
        let check = worker.run_once_at(at("2026-03-01T08:00:00Z")).await;
        assert_eq!(check.session_valid, None);
        assert!(check.refreshed);
    }
}
