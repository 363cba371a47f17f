use rust_decimal::Decimal;
use serde::Deserialize;

/// The root configuration structure for the entire application.
///
/// The file provides boot-time defaults only. The subset of trading fields
/// the dashboard may change live is overlaid from the `settings` table at
/// runtime; the store wins wherever both define a value.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub database: DatabaseConfig,
    /// Channel identifiers the messaging wrapper should join on startup.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub binance: BinanceConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub webapi: WebApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Credentials for the messaging-network wrapper.
///
/// The core never dials the network itself; these values are handed to the
/// external client that feeds the intake channel.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub api_id: i64,
    pub api_hash: String,
    pub phone_number: Option<String>,
    pub bot_token: Option<String>,
    #[serde(default)]
    pub use_test_dc: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store backend identifier. Only "sqlite" is supported.
    #[serde(rename = "type", default = "default_db_type")]
    pub kind: String,
    /// Connection string, e.g. `sqlite://meridian.db`.
    pub dsn: String,
}

fn default_db_type() -> String {
    "sqlite".to_string()
}

/// Optional overrides for the exchange endpoints. When absent, the
/// production or testnet URLs are chosen per account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BinanceConfig {
    pub base_url: Option<String>,
    pub ws_base_url: Option<String>,
}

/// Boot-time trading parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub leverage: i64,
    pub order_amount: Decimal,
    pub target_percent: Decimal,
    pub stoploss_percent: Decimal,
    /// Seconds before unfilled protective orders are swept.
    pub order_timeout: i64,
    /// Regex with one capture group that extracts the raw symbol token.
    pub signal_pattern: String,
    /// Comma-separated symbols the extractor must ignore.
    #[serde(default)]
    pub ignored_symbols: String,
    /// Kept for operators; the executor does not enforce a cap.
    #[serde(default)]
    pub max_positions: i64,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for WebApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "text" or "json".
    #[serde(default = "default_log_format")]
    pub format: String,
    /// When set, logs are additionally written to this file.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
