//! Application configuration module
//! Loads immutable startup settings from environment variables and validates them.
//!
//! Gateway, delivery platform and wallet settings are loaded next to their
//! clients (`CryptoBotConfig`, `FragmentConfig`, `TonConfig`, ...).

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub payments: PaymentsConfig,
    pub pricing: PricingConfig,
    pub bot: BotConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on the internal API, if set.
    pub internal_api_token: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Top-up rules shared by the gateways, the top-up service and the reconciliation loop
#[derive(Debug, Clone)]
pub struct PaymentsConfig {
    pub payment_timeout: Duration,
    pub min_payment_amount: Decimal,
}

/// Selling prices in the settlement currency
#[derive(Debug, Clone)]
pub struct PricingConfig {
    pub star_price: Decimal,
    pub premium_price_3: Decimal,
    pub premium_price_6: Decimal,
    pub premium_price_12: Decimal,
}

/// Chat bot credentials used for user and operator notifications
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: Option<String>,
    pub admin_ids: Vec<i64>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            payments: PaymentsConfig::from_env()?,
            pricing: PricingConfig::from_env()?,
            bot: BotConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.payments.validate()?;
        self.pricing.validate()?;
        self.bot.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
            internal_api_token: env::var("INTERNAL_API_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").unwrap_or_default(),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    /// The URL is only required when the database is actually used,
    /// so `SKIP_EXTERNALS` runs can leave it empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }

    pub fn require_url(&self) -> Result<&str, ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingVariable("DATABASE_URL".to_string()));
        }
        Ok(&self.url)
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let format = match env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "plain".to_string())
            .to_lowercase()
            .as_str()
        {
            "json" => LogFormat::Json,
            "plain" | "pretty" | "text" => LogFormat::Plain,
            _ => return Err(ConfigError::InvalidValue("LOG_FORMAT".to_string())),
        };

        Ok(LoggingConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            format,
        })
    }
}

impl PaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let timeout_secs: u64 = env::var("PAYMENT_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "900".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PAYMENT_TIMEOUT_SECONDS".to_string()))?;

        Ok(PaymentsConfig {
            payment_timeout: Duration::from_secs(timeout_secs),
            min_payment_amount: parse_decimal_var("MIN_PAYMENT_AMOUNT", "10")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_timeout.as_secs() < 60 {
            return Err(ConfigError::ValidationFailed(
                "PAYMENT_TIMEOUT_SECONDS must be at least 60".to_string(),
            ));
        }
        if self.min_payment_amount <= Decimal::ZERO {
            return Err(ConfigError::ValidationFailed(
                "MIN_PAYMENT_AMOUNT must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(900),
            min_payment_amount: Decimal::from(10),
        }
    }
}

impl PricingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PricingConfig {
            star_price: parse_decimal_var("STAR_PRICE", "1.8")?,
            premium_price_3: parse_decimal_var("PREMIUM_PRICE_3", "799")?,
            premium_price_6: parse_decimal_var("PREMIUM_PRICE_6", "1499")?,
            premium_price_12: parse_decimal_var("PREMIUM_PRICE_12", "2499")?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prices = [
            ("STAR_PRICE", self.star_price),
            ("PREMIUM_PRICE_3", self.premium_price_3),
            ("PREMIUM_PRICE_6", self.premium_price_6),
            ("PREMIUM_PRICE_12", self.premium_price_12),
        ];
        for (name, price) in prices {
            if price <= Decimal::ZERO {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        Ok(())
    }
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            star_price: Decimal::new(18, 1),
            premium_price_3: Decimal::from(799),
            premium_price_6: Decimal::from(1499),
            premium_price_12: Decimal::from(2499),
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(BotConfig {
            token: env::var("BOT_TOKEN").ok().filter(|v| !v.trim().is_empty()),
            admin_ids: parse_admin_ids(&env::var("ADMIN_IDS").unwrap_or_default())?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_some() && self.admin_ids.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "ADMIN_IDS must list at least one operator when BOT_TOKEN is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Admin ids may be separated by `,`, `;` or `|`.
pub fn parse_admin_ids(raw: &str) -> Result<Vec<i64>, ConfigError> {
    raw.split(|c: char| c == ',' || c == ';' || c == '|')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .map_err(|_| ConfigError::InvalidValue(format!("ADMIN_IDS entry '{}'", part)))
        })
        .collect()
}

fn parse_decimal_var(name: &str, default: &str) -> Result<Decimal, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    Decimal::from_str(raw.trim()).map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}
