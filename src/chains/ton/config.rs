use crate::chains::ton::errors::{TonError, TonResult};
use crate::logging::mask_wallet_address;
use std::fmt;
use std::time::Duration;

pub const MNEMONIC_WORDS: usize = 24;

#[derive(Clone)]
pub struct TonConfig {
    pub mnemonic: Vec<String>,
    /// Deployed v4r2 wallet the mnemonic controls
    pub wallet_address: String,
    pub toncenter_url: String,
    pub toncenter_api_key: Option<String>,
    pub tonapi_url: String,
    pub tonapi_key: Option<String>,
    pub request_timeout: Duration,
}

impl Default for TonConfig {
    fn default() -> Self {
        Self {
            mnemonic: Vec::new(),
            wallet_address: String::new(),
            toncenter_url: "https://toncenter.com/api/v2".to_string(),
            toncenter_api_key: None,
            tonapi_url: "https://tonapi.io".to_string(),
            tonapi_key: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Words separated by commas or whitespace, lowercased.
pub fn parse_mnemonic(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl TonConfig {
    pub fn from_env() -> TonResult<Self> {
        let defaults = Self::default();
        let mnemonic = non_empty("MNEMONIC")
            .map(|raw| parse_mnemonic(&raw))
            .ok_or_else(|| TonError::config_error("MNEMONIC is not set"))?;
        let wallet_address = non_empty("TON_WALLET_ADDRESS")
            .ok_or_else(|| TonError::config_error("TON_WALLET_ADDRESS is not set"))?;

        let config = Self {
            mnemonic,
            wallet_address,
            toncenter_url: non_empty("TONCENTER_URL").unwrap_or(defaults.toncenter_url),
            toncenter_api_key: non_empty("TONCENTER_API_KEY"),
            tonapi_url: non_empty("TONAPI_URL").unwrap_or(defaults.tonapi_url),
            tonapi_key: non_empty("API_TON"),
            request_timeout: std::env::var("TON_REQUEST_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> TonResult<()> {
        if self.mnemonic.len() != MNEMONIC_WORDS {
            return Err(TonError::invalid_mnemonic(format!(
                "expected {} words, got {}",
                MNEMONIC_WORDS,
                self.mnemonic.len()
            )));
        }
        if self.wallet_address.trim().is_empty() {
            return Err(TonError::config_error("wallet address is empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(TonError::config_error("request timeout must be positive"));
        }
        Ok(())
    }
}

impl fmt::Debug for TonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TonConfig")
            .field("mnemonic", &format_args!("<{} words>", self.mnemonic.len()))
            .field("wallet_address", &mask_wallet_address(&self.wallet_address))
            .field("toncenter_url", &self.toncenter_url)
            .field("tonapi_url", &self.tonapi_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_accepts_commas_and_spaces() {
        assert_eq!(
            parse_mnemonic("Abandon, ability able\nabout"),
            vec!["abandon", "ability", "able", "about"]
        );
    }

    #[test]
    fn validate_requires_full_phrase() {
        let config = TonConfig {
            mnemonic: parse_mnemonic("one two three"),
            wallet_address: "EQ".to_string(),
            ..TonConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TonError::InvalidMnemonic { .. })
        ));
    }

    #[test]
    fn debug_hides_the_phrase() {
        let config = TonConfig {
            mnemonic: vec!["secretword".to_string(); 24],
            wallet_address: "EQAbcdefghijklmnopqrstuvwxyz0123456789ABCDEFGHIJ".to_string(),
            ..TonConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secretword"));
        assert!(rendered.contains("<24 words>"));
    }
}
