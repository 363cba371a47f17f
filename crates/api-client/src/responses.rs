use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::ApiError;

/// The `{code, msg}` body Binance returns for every rejected request.
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceTicker {
    pub symbol: String,
    pub price: String,
}

/// The acknowledgement Binance returns for place/cancel/query order calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    pub client_order_id: String,
    #[serde(default)]
    pub avg_price: String,
    #[serde(default)]
    pub orig_qty: String,
    #[serde(default)]
    pub executed_qty: String,
    #[serde(default)]
    pub stop_price: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub reduce_only: bool,
}

impl OrderResponse {
    pub fn avg_price_decimal(&self) -> Option<Decimal> {
        Decimal::from_str(&self.avg_price).ok().filter(|p| !p.is_zero())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageResponse {
    pub leverage: i64,
    pub symbol: String,
    #[serde(default)]
    pub max_notional_value: String,
}

/// Generic `{code, msg}` success body (margin type, listen-key keepalive).
#[derive(Debug, Deserialize)]
pub struct CodeMsgResponse {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    #[serde(default)]
    pub total_wallet_balance: String,
    #[serde(default)]
    pub total_unrealized_profit: String,
    #[serde(default)]
    pub available_balance: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    pub un_realized_profit: String,
    pub leverage: String,
    #[serde(default)]
    pub mark_price: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

impl ExchangeInfo {
    pub fn symbol(&self, symbol: &str) -> Result<&SymbolInfo, ApiError> {
        self.symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ApiError::SymbolUnknown(symbol.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    pub price_precision: u32,
    pub quantity_precision: u32,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// One per-symbol exchange filter.
///
/// Binance's filter objects are heterogeneous, so every constraint field is
/// optional and `filter_type` discriminates. Unknown filter types simply
/// deserialize with all constraints absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilter {
    pub filter_type: String,
    pub min_price: Option<String>,
    pub max_price: Option<String>,
    pub tick_size: Option<String>,
    pub min_qty: Option<String>,
    pub max_qty: Option<String>,
    pub step_size: Option<String>,
    /// MIN_NOTIONAL carries `notional` on futures.
    pub notional: Option<String>,
    pub min_notional: Option<String>,
}

/// The resolved trading constraints for one symbol.
///
/// Constraint fields are `None` when the exchange did not publish the
/// corresponding filter; callers fall back to decimal-precision rounding.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolRules {
    pub step_size: Option<Decimal>,
    pub min_qty: Option<Decimal>,
    pub max_qty: Option<Decimal>,
    pub tick_size: Option<Decimal>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub min_notional: Option<Decimal>,
    pub price_precision: u32,
    pub quantity_precision: u32,
}

fn parse_field(field: &str, raw: &Option<String>) -> Result<Option<Decimal>, ApiError> {
    raw.as_deref()
        .map(|s| {
            Decimal::from_str(s)
                .map_err(|e| ApiError::InvalidData(format!("filter field {field}: {e}")))
        })
        .transpose()
}

impl SymbolInfo {
    /// Resolves this symbol's filters into a single set of rules.
    ///
    /// MARKET_LOT_SIZE is preferred over LOT_SIZE because every order the
    /// bridge submits is market-style.
    pub fn rules(&self) -> Result<SymbolRules, ApiError> {
        let mut rules = SymbolRules {
            price_precision: self.price_precision,
            quantity_precision: self.quantity_precision,
            ..SymbolRules::default()
        };

        let lot = self
            .filters
            .iter()
            .find(|f| f.filter_type == "MARKET_LOT_SIZE")
            .or_else(|| self.filters.iter().find(|f| f.filter_type == "LOT_SIZE"));
        if let Some(lot) = lot {
            rules.step_size = parse_field("stepSize", &lot.step_size)?;
            rules.min_qty = parse_field("minQty", &lot.min_qty)?;
            rules.max_qty = parse_field("maxQty", &lot.max_qty)?;
        }

        if let Some(price) = self.filters.iter().find(|f| f.filter_type == "PRICE_FILTER") {
            rules.tick_size = parse_field("tickSize", &price.tick_size)?;
            rules.min_price = parse_field("minPrice", &price.min_price)?;
            rules.max_price = parse_field("maxPrice", &price.max_price)?;
        }

        if let Some(notional) = self.filters.iter().find(|f| f.filter_type == "MIN_NOTIONAL") {
            rules.min_notional = parse_field("notional", &notional.notional)?
                .or(parse_field("minNotional", &notional.min_notional)?);
        }

        Ok(rules)
    }
}
