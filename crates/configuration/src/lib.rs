use std::path::Path;

use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;
pub mod telemetry;

// Re-export the core types to provide a clean public API.
pub use settings::{
    BinanceConfig, Config, DatabaseConfig, LoggingConfig, TelegramConfig, TradingConfig,
    WebApiConfig,
};
pub use telemetry::init_tracing;

/// Loads the application configuration from a YAML file.
///
/// This function is the primary entry point for this crate. It reads the
/// configuration file, deserializes it into our strongly-typed `Config`
/// struct, validates the fields that are fatal when wrong, and returns it.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::from(path))
        // Environment variables override the file, e.g. MERIDIAN__TRADING__ENABLED=false.
        .add_source(config::Environment::with_prefix("MERIDIAN").separator("__"))
        .build()?;

    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;

    Ok(config)
}

/// Startup validation of the fields the system cannot run without.
///
/// A bad signal pattern is also fatal, but the regex is owned by the
/// extractor and validated when it is built.
fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.telegram.api_id == 0 {
        return Err(ConfigError::validation("telegram.api_id must be set"));
    }
    if config.telegram.api_hash.is_empty() {
        return Err(ConfigError::validation("telegram.api_hash must be set"));
    }
    if config.database.dsn.is_empty() {
        return Err(ConfigError::validation("database.dsn must be set"));
    }
    if !(1..=125).contains(&config.trading.leverage) {
        return Err(ConfigError::validation(format!(
            "trading.leverage must be within [1, 125], got {}",
            config.trading.leverage
        )));
    }
    if config.trading.order_amount <= rust_decimal::Decimal::ZERO {
        return Err(ConfigError::validation(
            "trading.order_amount must be positive",
        ));
    }
    if config.trading.signal_pattern.is_empty() {
        return Err(ConfigError::validation("trading.signal_pattern must be set"));
    }
    if config.trading.order_timeout < 60 {
        return Err(ConfigError::validation(
            "trading.order_timeout must be at least 60 seconds",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::*;
    use rust_decimal_macros::dec;

    fn base_config() -> Config {
        Config {
            telegram: TelegramConfig {
                api_id: 12345,
                api_hash: "abc123".to_string(),
                phone_number: None,
                bot_token: None,
                use_test_dc: false,
            },
            database: DatabaseConfig {
                kind: "sqlite".to_string(),
                dsn: "sqlite://meridian.db".to_string(),
            },
            channels: vec!["@signals".to_string()],
            binance: BinanceConfig::default(),
            trading: TradingConfig {
                enabled: true,
                leverage: 10,
                order_amount: dec!(100),
                target_percent: dec!(0.02),
                stoploss_percent: dec!(0.01),
                order_timeout: 600,
                signal_pattern: r"(?i)\$([A-Z]{2,10})\b".to_string(),
                ignored_symbols: String::new(),
                max_positions: 0,
                dry_run: false,
            },
            webapi: WebApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn leverage_out_of_range_is_fatal() {
        let mut config = base_config();
        config.trading.leverage = 0;
        assert!(validate(&config).is_err());
        config.trading.leverage = 126;
        assert!(validate(&config).is_err());
        config.trading.leverage = 1;
        assert!(validate(&config).is_ok());
        config.trading.leverage = 125;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn missing_telegram_credentials_are_fatal() {
        let mut config = base_config();
        config.telegram.api_hash = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn short_order_timeout_is_fatal() {
        let mut config = base_config();
        config.trading.order_timeout = 59;
        assert!(validate(&config).is_err());
    }
}
