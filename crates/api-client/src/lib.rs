use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use configuration::BinanceConfig;
use core_types::{Account, MarginType, OrderRequest};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;

mod auth;
pub mod error;
pub mod registry;
pub mod responses;
pub mod user_stream;

// --- Public API ---
pub use error::ApiError;
pub use registry::ClientRegistry;
pub use responses::{
    AccountInfo, ApiErrorResponse, ExchangeInfo, LeverageResponse, ListenKeyResponse,
    OrderResponse, PositionRisk, PriceTicker, SymbolFilter, SymbolInfo, SymbolRules,
};
pub use user_stream::{AccountUpdateEvent, OrderTradeUpdateEvent, UserStreamEvent};

use crate::auth::sign_request;
use crate::responses::CodeMsgResponse;

const PRODUCTION_BASE_URL: &str = "https://fapi.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
const PRODUCTION_WS_URL: &str = "wss://fstream.binance.com";
const TESTNET_WS_URL: &str = "wss://stream.binancefuture.com";

/// Every REST call carries this deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Binance answers margin-type changes that would be no-ops with this
/// rejection; the bridge treats it as success.
const MARGIN_NO_CHANGE_CODE: i64 = -4046;
const MARGIN_NO_CHANGE_MSG: &str = "No need to change margin type";

/// The abstract interface the executor trades through.
///
/// This trait is the contract between the trading core and the exchange,
/// allowing the underlying implementation (live or mock) to be swapped out
/// in tests.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal, ApiError>;
    async fn get_exchange_info(&self) -> Result<ExchangeInfo, ApiError>;
    async fn set_leverage(&self, symbol: &str, leverage: i64) -> Result<(), ApiError>;
    async fn set_margin_type(&self, symbol: &str, margin_type: MarginType)
        -> Result<(), ApiError>;
    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ApiError>;
    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse, ApiError>;
}

/// A client for the Binance USDT-M futures API, bound to one account's
/// credentials. Signed endpoints carry a millisecond timestamp and an
/// HMAC-SHA256 signature over the URL-encoded parameter string.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    client: reqwest::Client,
    base_url: String,
    ws_base_url: String,
    api_secret: String,
}

impl BinanceClient {
    /// Builds a client for the given account, honoring endpoint overrides
    /// from the configuration (useful for proxies and test rigs).
    pub fn new(account: &Account, overrides: &BinanceConfig) -> Result<Self, ApiError> {
        let base_url = overrides.base_url.clone().unwrap_or_else(|| {
            if account.is_testnet {
                TESTNET_BASE_URL.to_string()
            } else {
                PRODUCTION_BASE_URL.to_string()
            }
        });
        let ws_base_url = overrides.ws_base_url.clone().unwrap_or_else(|| {
            if account.is_testnet {
                TESTNET_WS_URL.to_string()
            } else {
                PRODUCTION_WS_URL.to_string()
            }
        });

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-MBX-APIKEY",
            HeaderValue::from_str(&account.api_key)
                .map_err(|e| ApiError::InvalidCredentials(e.to_string()))?,
        );

        Ok(Self {
            client: reqwest::Client::builder()
                .default_headers(headers)
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url,
            ws_base_url,
            api_secret: account.api_secret.clone(),
        })
    }

    pub(crate) fn ws_base_url(&self) -> &str {
        &self.ws_base_url
    }

    async fn request_public<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).query(query).send().await?;
        Self::decode(response).await
    }

    /// Signs and sends an authenticated request.
    ///
    /// The parameter map is ordered (BTreeMap) so the signed string is
    /// stable regardless of insertion order.
    async fn request_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &mut BTreeMap<&str, String>,
    ) -> Result<T, ApiError> {
        params.insert("timestamp", Utc::now().timestamp_millis().to_string());

        let query_string = serde_qs::to_string(params)
            .map_err(|e| ApiError::InvalidData(format!("query encoding: {e}")))?;
        let signature = sign_request(&self.api_secret, &query_string);
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query_string, signature
        );

        let response = self.client.request(method, &url).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str::<T>(&text).map_err(|e| ApiError::Deserialization(e.to_string()))
        } else {
            let api_error: ApiErrorResponse = serde_json::from_str(&text).map_err(|e| {
                ApiError::Deserialization(format!(
                    "Failed to deserialize error response: {e}. Original text: {text}"
                ))
            })?;
            Err(ApiError::Binance {
                code: api_error.code,
                msg: api_error.msg,
            })
        }
    }

    /// Fetches the current price for one symbol.
    pub async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        let ticker: PriceTicker = self
            .request_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_string())])
            .await?;
        Decimal::from_str(&ticker.price)
            .map_err(|e| ApiError::InvalidData(format!("price {}: {e}", ticker.price)))
    }

    /// Fetches the full exchange metadata, including per-symbol filters.
    pub async fn get_exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
        self.request_public("/fapi/v1/exchangeInfo", &[]).await
    }

    pub async fn set_leverage(&self, symbol: &str, leverage: i64) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("leverage", leverage.to_string());
        self.request_signed::<LeverageResponse>(Method::POST, "/fapi/v1/leverage", &mut params)
            .await?;
        Ok(())
    }

    /// Sets the margin type for a symbol. Binance rejects the call when the
    /// margin type already matches; that rejection is normalized to success.
    pub async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("marginType", margin_type.as_str().to_string());
        match self
            .request_signed::<CodeMsgResponse>(Method::POST, "/fapi/v1/marginType", &mut params)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_margin_no_change(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Submits a new order and returns the exchange acknowledgement.
    pub async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", order.symbol.clone());
        params.insert("side", order.side.as_str().to_string());
        params.insert("type", order.order_type.as_str().to_string());
        params.insert("quantity", order.quantity.normalize().to_string());
        if let Some(stop_price) = order.stop_price {
            params.insert("stopPrice", stop_price.normalize().to_string());
        }
        if order.reduce_only {
            params.insert("reduceOnly", "true".to_string());
        }
        self.request_signed(Method::POST, "/fapi/v1/order", &mut params)
            .await
    }

    pub async fn cancel_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> Result<OrderResponse, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());
        self.request_signed(Method::DELETE, "/fapi/v1/order", &mut params)
            .await
    }

    pub async fn query_order(
        &self,
        symbol: &str,
        order_id: i64,
    ) -> Result<OrderResponse, ApiError> {
        let mut params = BTreeMap::new();
        params.insert("symbol", symbol.to_string());
        params.insert("orderId", order_id.to_string());
        self.request_signed(Method::GET, "/fapi/v1/order", &mut params)
            .await
    }

    pub async fn get_account(&self) -> Result<AccountInfo, ApiError> {
        let mut params = BTreeMap::new();
        self.request_signed(Method::GET, "/fapi/v2/account", &mut params)
            .await
    }

    pub async fn get_position_risk(&self) -> Result<Vec<PositionRisk>, ApiError> {
        let mut params = BTreeMap::new();
        self.request_signed(Method::GET, "/fapi/v2/positionRisk", &mut params)
            .await
    }

    pub(crate) async fn create_listen_key(&self) -> Result<String, ApiError> {
        let mut params = BTreeMap::new();
        let response: ListenKeyResponse = self
            .request_signed(Method::POST, "/fapi/v1/listenKey", &mut params)
            .await?;
        Ok(response.listen_key)
    }

    pub(crate) async fn keepalive_listen_key(&self) -> Result<(), ApiError> {
        let mut params = BTreeMap::new();
        self.request_signed::<CodeMsgResponse>(Method::PUT, "/fapi/v1/listenKey", &mut params)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ExchangeApi for BinanceClient {
    async fn get_symbol_price(&self, symbol: &str) -> Result<Decimal, ApiError> {
        BinanceClient::get_symbol_price(self, symbol).await
    }

    async fn get_exchange_info(&self) -> Result<ExchangeInfo, ApiError> {
        BinanceClient::get_exchange_info(self).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: i64) -> Result<(), ApiError> {
        BinanceClient::set_leverage(self, symbol, leverage).await
    }

    async fn set_margin_type(
        &self,
        symbol: &str,
        margin_type: MarginType,
    ) -> Result<(), ApiError> {
        BinanceClient::set_margin_type(self, symbol, margin_type).await
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderResponse, ApiError> {
        BinanceClient::place_order(self, order).await
    }

    async fn cancel_order(&self, symbol: &str, order_id: i64) -> Result<OrderResponse, ApiError> {
        BinanceClient::cancel_order(self, symbol, order_id).await
    }
}

/// True when a rejection is the margin-type no-op response.
fn is_margin_no_change(error: &ApiError) -> bool {
    match error {
        ApiError::Binance { code, msg } => {
            *code == MARGIN_NO_CHANGE_CODE || msg.contains(MARGIN_NO_CHANGE_MSG)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_no_change_is_normalized() {
        assert!(is_margin_no_change(&ApiError::Binance {
            code: -4046,
            msg: "No need to change margin type.".to_string(),
        }));
        assert!(is_margin_no_change(&ApiError::Binance {
            code: 0,
            msg: "No need to change margin type.".to_string(),
        }));
        assert!(!is_margin_no_change(&ApiError::Binance {
            code: -2019,
            msg: "Margin is insufficient.".to_string(),
        }));
        assert!(!is_margin_no_change(&ApiError::InvalidData("x".to_string())));
    }
}
