//! Runtime-mutable bot settings (toggles and the Fragment session).

use crate::database::ledger::LedgerResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    MaintenanceMode,
    ForceSubscribe,
    FragmentToken,
    FragmentTokenExpiresAt,
    FragmentTokenLastUpdate,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::MaintenanceMode => "maintenance_mode",
            SettingKey::ForceSubscribe => "force_subscribe",
            SettingKey::FragmentToken => "fragment_token",
            SettingKey::FragmentTokenExpiresAt => "fragment_token_expires_at",
            SettingKey::FragmentTokenLastUpdate => "fragment_token_last_update",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "maintenance_mode" => Some(SettingKey::MaintenanceMode),
            "force_subscribe" => Some(SettingKey::ForceSubscribe),
            "fragment_token" => Some(SettingKey::FragmentToken),
            "fragment_token_expires_at" => Some(SettingKey::FragmentTokenExpiresAt),
            "fragment_token_last_update" => Some(SettingKey::FragmentTokenLastUpdate),
            _ => None,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: SettingKey) -> LedgerResult<Option<String>>;

    async fn set(&self, key: SettingKey, value: &str) -> LedgerResult<()>;

    async fn is_enabled(&self, key: SettingKey) -> LedgerResult<bool> {
        Ok(self.get(key).await?.as_deref().map(is_truthy).unwrap_or(false))
    }

    async fn set_enabled(&self, key: SettingKey, enabled: bool) -> LedgerResult<()> {
        self.set(key, if enabled { "1" } else { "0" }).await
    }
}
