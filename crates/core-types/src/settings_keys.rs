//! Keys of the settings rows the dashboard may change live.
//!
//! The config file provides boot-time defaults; these rows are seeded from
//! it on first start and are authoritative afterwards. On read, store wins
//! over file.

pub const TRADING_ENABLED: &str = "trading.enabled";
pub const SIGNAL_PATTERN: &str = "trading.signal_pattern";
pub const IGNORED_SYMBOLS: &str = "trading.ignored_symbols";
pub const ORDER_TIMEOUT: &str = "trading.order_timeout";
pub const CHANNELS: &str = "telegram.channels";

/// Every key the dashboard is allowed to write through `PUT /api/config`.
pub const MUTABLE_KEYS: &[&str] = &[
    TRADING_ENABLED,
    SIGNAL_PATTERN,
    IGNORED_SYMBOLS,
    ORDER_TIMEOUT,
    CHANNELS,
];
