//! Tracing initialisation and log-safe formatting helpers

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber from `LOG_FORMAT` / `RUST_LOG`.
pub fn init_tracing() {
    let config = LoggingConfig::from_env().unwrap_or(LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Plain,
    });
    init_tracing_with(&config);
}

pub fn init_tracing_with(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Plain => registry.with(fmt::layer().with_target(false)).try_init(),
    };

    // A subscriber may already be installed by a test harness.
    let _ = result;
}

/// Keep the first and last four characters of a secret-like value.
pub fn mask_token(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Wallet addresses are public but long; shorten them in log lines.
pub fn mask_wallet_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 12 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 6..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_tokens_are_fully_hidden() {
        assert_eq!(mask_token("abc"), "****");
        assert_eq!(mask_token("12345678"), "****");
    }

    #[test]
    fn long_tokens_keep_edges() {
        assert_eq!(mask_token("1234567890abcdef"), "1234...cdef");
    }

    #[test]
    fn wallet_address_is_shortened() {
        let address = "UQD4Vn7gzYxqXYoOl4Vw0WdIzbvOYrTVZER20rbXadlu6sSb";
        assert_eq!(mask_wallet_address(address), "UQD4Vn...lu6sSb");
        assert_eq!(mask_wallet_address("short"), "short");
    }
}
