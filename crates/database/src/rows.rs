//! Raw row types as they come out of SQLite.
//!
//! SQLite stores decimals as TEXT and enums as their string form; these
//! structs hold the stored representation and convert into the domain
//! types from `core-types` in exactly one place.

use chrono::{DateTime, Utc};
use core_types::{Account, Order, Position, Signal};
use rust_decimal::Decimal;
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::DbError;

pub(crate) fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, DbError> {
    Decimal::from_str(raw).map_err(|e| DbError::Corrupt(format!("{field}: {e}")))
}

pub(crate) fn parse_opt_decimal(
    field: &'static str,
    raw: &Option<String>,
) -> Result<Option<Decimal>, DbError> {
    raw.as_deref().map(|s| parse_decimal(field, s)).transpose()
}

#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: i64,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub is_testnet: bool,
    pub is_active: bool,
    pub is_default: bool,
    pub leverage: i64,
    pub order_amount_usdt: String,
    pub target_percent: String,
    pub stoploss_percent: String,
    pub order_timeout_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = DbError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            name: row.name,
            api_key: row.api_key,
            api_secret: row.api_secret,
            is_testnet: row.is_testnet,
            is_active: row.is_active,
            is_default: row.is_default,
            leverage: row.leverage,
            order_amount_usdt: parse_decimal("order_amount_usdt", &row.order_amount_usdt)?,
            target_percent: parse_decimal("target_percent", &row.target_percent)?,
            stoploss_percent: parse_decimal("stoploss_percent", &row.stoploss_percent)?,
            order_timeout_seconds: row.order_timeout_seconds,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SignalRow {
    pub id: i64,
    pub message_id: i64,
    pub channel_id: i64,
    pub symbol: String,
    pub raw_message: String,
    pub parsed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub error: Option<String>,
}

impl TryFrom<SignalRow> for Signal {
    type Error = DbError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        Ok(Signal {
            id: row.id,
            message_id: row.message_id,
            channel_id: row.channel_id,
            symbol: row.symbol,
            raw_message: row.raw_message,
            parsed_at: row.parsed_at,
            processed_at: row.processed_at,
            status: row
                .status
                .parse()
                .map_err(|e| DbError::Corrupt(format!("signal status: {e}")))?,
            error: row.error,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PositionRow {
    pub id: i64,
    pub signal_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub side: String,
    pub entry_price: String,
    pub quantity: String,
    pub leverage: i64,
    pub take_profit_price: String,
    pub stop_loss_price: String,
    pub status: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<String>,
    pub pnl: Option<String>,
    pub pnl_percent: Option<String>,
}

impl TryFrom<PositionRow> for Position {
    type Error = DbError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(Position {
            id: row.id,
            signal_id: row.signal_id,
            account_id: row.account_id,
            symbol: row.symbol,
            side: row.side,
            entry_price: parse_decimal("entry_price", &row.entry_price)?,
            quantity: parse_decimal("quantity", &row.quantity)?,
            leverage: row.leverage,
            take_profit_price: parse_decimal("take_profit_price", &row.take_profit_price)?,
            stop_loss_price: parse_decimal("stop_loss_price", &row.stop_loss_price)?,
            status: row
                .status
                .parse()
                .map_err(|e| DbError::Corrupt(format!("position status: {e}")))?,
            opened_at: row.opened_at,
            closed_at: row.closed_at,
            exit_price: parse_opt_decimal("exit_price", &row.exit_price)?,
            pnl: parse_opt_decimal("pnl", &row.pnl)?,
            pnl_percent: parse_opt_decimal("pnl_percent", &row.pnl_percent)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderRow {
    pub id: i64,
    pub position_id: i64,
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: String,
    #[sqlx(rename = "type")]
    pub order_type: String,
    pub orig_qty: String,
    pub executed_qty: String,
    pub price: String,
    pub stop_price: Option<String>,
    pub status: String,
    pub time_in_force: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub purpose: String,
}

impl TryFrom<OrderRow> for Order {
    type Error = DbError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Order {
            id: row.id,
            position_id: row.position_id,
            exchange_order_id: row.exchange_order_id,
            symbol: row.symbol,
            side: row
                .side
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order side: {e}")))?,
            order_type: row
                .order_type
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order type: {e}")))?,
            orig_qty: parse_decimal("orig_qty", &row.orig_qty)?,
            executed_qty: parse_decimal("executed_qty", &row.executed_qty)?,
            price: parse_decimal("price", &row.price)?,
            stop_price: parse_opt_decimal("stop_price", &row.stop_price)?,
            status: row
                .status
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order status: {e}")))?,
            time_in_force: row.time_in_force,
            created_at: row.created_at,
            updated_at: row.updated_at,
            filled_at: row.filled_at,
            canceled_at: row.canceled_at,
            purpose: row
                .purpose
                .parse()
                .map_err(|e| DbError::Corrupt(format!("order purpose: {e}")))?,
        })
    }
}
