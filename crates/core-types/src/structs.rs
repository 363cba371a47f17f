use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{
    OrderPurpose, OrderSide, OrderStatus, OrderType, PositionStatus, SignalStatus,
};

/// A single chat message delivered by the messaging-network wrapper.
///
/// The wrapper is an external collaborator; the core only ever sees this
/// shape, pushed into an mpsc channel owned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel_id: i64,
    pub message_id: i64,
    pub sender: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

/// An exchange account with its per-account trading parameters.
///
/// Exactly one active account may be the default; the default account is
/// the one signals are executed against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub is_testnet: bool,
    pub is_active: bool,
    pub is_default: bool,
    pub leverage: i64,
    pub order_amount_usdt: Decimal,
    pub target_percent: Decimal,
    pub stoploss_percent: Decimal,
    pub order_timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Returns a copy safe to surface to the dashboard: the secret is
    /// reduced to its first and last four characters.
    pub fn masked(&self) -> Account {
        let mut masked = self.clone();
        masked.api_secret = mask_secret(&self.api_secret);
        masked
    }
}

/// Masks a credential to its first and last four characters.
///
/// Short secrets are fully redacted rather than partially revealed.
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 8 {
        return "****".to_string();
    }
    format!("{}****{}", &secret[..4], &secret[secret.len() - 4..])
}

/// The mutable subset of `Account` accepted from the dashboard on
/// create/update. Zero-valued numeric fields receive store defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountDraft {
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub leverage: i64,
    #[serde(default)]
    pub order_amount_usdt: Decimal,
    #[serde(default)]
    pub target_percent: Decimal,
    #[serde(default)]
    pub stoploss_percent: Decimal,
    #[serde(default)]
    pub order_timeout_seconds: i64,
}

fn default_true() -> bool {
    true
}

/// A trading signal extracted from a chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: i64,
    pub message_id: i64,
    pub channel_id: i64,
    /// Normalized exchange symbol, e.g. `BTCUSDT`.
    pub symbol: String,
    pub raw_message: String,
    pub parsed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: SignalStatus,
    pub error: Option<String>,
}

/// A LONG futures position opened by one signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: i64,
    pub signal_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: i64,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub pnl_percent: Option<Decimal>,
}

/// One exchange order belonging to a bracket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub position_id: i64,
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub orig_qty: Decimal,
    pub executed_qty: Decimal,
    pub price: Decimal,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub time_in_force: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub purpose: OrderPurpose,
}

/// A draft order the executor hands to the exchange gateway.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub stop_price: Option<Decimal>,
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            stop_price: None,
            reduce_only: false,
        }
    }

    /// A reduce-only market close used by the timeout sweeper.
    pub fn market_close(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            reduce_only: true,
            ..Self::market(symbol, side, quantity)
        }
    }

    /// A protective stop-style leg (TAKE_PROFIT_MARKET or STOP_MARKET).
    pub fn protective(
        symbol: &str,
        order_type: OrderType,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: OrderSide::Sell,
            order_type,
            quantity,
            stop_price: Some(stop_price),
            reduce_only: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_secret_keeps_first_and_last_four() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd****mnop");
    }

    #[test]
    fn mask_secret_redacts_short_values() {
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "****");
    }

    #[test]
    fn protective_request_is_reduce_only_sell() {
        let req = OrderRequest::protective(
            "BTCUSDT",
            OrderType::TakeProfitMarket,
            Decimal::new(2, 3),
            Decimal::new(501, 1),
        );
        assert_eq!(req.side, OrderSide::Sell);
        assert!(req.reduce_only);
        assert!(req.stop_price.is_some());
    }
}
