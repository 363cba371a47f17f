//! The user-data WebSocket stream.
//!
//! Binance pushes order and account updates over a WebSocket authorized by a
//! short-lived listen key. The read loop forwards parsed events over an mpsc
//! channel and never blocks on downstream work; a sibling task refreshes the
//! listen key every 30 minutes.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::{ApiError, BinanceClient};

/// Binance rotates listen keys after 60 minutes without a keepalive.
const KEEPALIVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30 * 60);

/// An `ORDER_TRADE_UPDATE` frame. Field names follow Binance's
/// one-character wire schema.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderTradeUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "o")]
    pub order: OrderUpdate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c", default)]
    pub client_order_id: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "o")]
    pub order_type: String,
    #[serde(rename = "q", default)]
    pub quantity: String,
    #[serde(rename = "p", default)]
    pub price: String,
    #[serde(rename = "ap", default)]
    pub avg_price: String,
    #[serde(rename = "sp", default)]
    pub stop_price: String,
    #[serde(rename = "x", default)]
    pub execution_type: String,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "l", default)]
    pub last_filled_qty: String,
    #[serde(rename = "z", default)]
    pub cumulative_filled_qty: String,
    #[serde(rename = "L", default)]
    pub last_filled_price: String,
}

/// An `ACCOUNT_UPDATE` frame with embedded balances and positions.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountUpdateEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "a")]
    pub data: AccountUpdateData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountUpdateData {
    #[serde(rename = "B", default)]
    pub balances: Vec<BalanceUpdate>,
    #[serde(rename = "P", default)]
    pub positions: Vec<PositionUpdate>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceUpdate {
    #[serde(rename = "a")]
    pub asset: String,
    #[serde(rename = "wb", default)]
    pub wallet_balance: String,
    #[serde(rename = "cw", default)]
    pub cross_wallet_balance: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "pa", default)]
    pub position_amount: String,
    #[serde(rename = "ep", default)]
    pub entry_price: String,
    #[serde(rename = "up", default)]
    pub unrealized_pnl: String,
}

/// A parsed user-data event the tracker consumes.
#[derive(Debug, Clone)]
pub enum UserStreamEvent {
    OrderTradeUpdate(OrderTradeUpdateEvent),
    AccountUpdate(AccountUpdateEvent),
}

/// Parses one inbound frame by its `e` tag.
///
/// Returns `None` for heartbeats and event kinds the bridge does not
/// consume; those are dropped silently.
pub fn parse_user_frame(text: &str) -> Option<UserStreamEvent> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("e")?.as_str()? {
        "ORDER_TRADE_UPDATE" => serde_json::from_value(value)
            .ok()
            .map(UserStreamEvent::OrderTradeUpdate),
        "ACCOUNT_UPDATE" => serde_json::from_value(value)
            .ok()
            .map(UserStreamEvent::AccountUpdate),
        _ => None,
    }
}

impl BinanceClient {
    /// Opens the user-data stream for this account and forwards parsed
    /// events into `tx`.
    ///
    /// Obtains the listen key first, then spawns the read loop and the
    /// keep-alive ticker and returns. The stream does not reconnect; when
    /// the connection drops, the task logs and exits (restart policy lives
    /// with the supervisor).
    pub async fn start_user_stream(
        self: &Arc<Self>,
        tx: mpsc::Sender<UserStreamEvent>,
    ) -> Result<(), ApiError> {
        let listen_key = self.create_listen_key().await?;
        let url = url::Url::parse(&format!("{}/ws/{}", self.ws_base_url(), listen_key))
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;

        let keepalive_client = Arc::clone(self);
        let keepalive = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
            // The first tick fires immediately; the key was just created.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = keepalive_client.keepalive_listen_key().await {
                    tracing::error!(error = %e, "Failed to refresh listen key.");
                }
            }
        });

        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| ApiError::WebSocket(e.to_string()))?;
        tracing::info!("User-data stream connected.");

        tokio::spawn(async move {
            let (_, mut read) = stream.split();
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = parse_user_frame(&text) {
                            if tx.send(event).await.is_err() {
                                tracing::warn!(
                                    "User-stream receiver dropped. Closing connection."
                                );
                                break;
                            }
                        }
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => {
                        tracing::warn!("User-data stream closed by the exchange.");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(error = %e, "User-data stream read error.");
                        break;
                    }
                }
            }
            keepalive.abort();
            tracing::warn!("User-data stream ended; restart the process to reconnect.");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_order_trade_update() {
        let frame = r#"{
            "e": "ORDER_TRADE_UPDATE",
            "E": 1715000000000,
            "o": {
                "s": "BTCUSDT",
                "c": "x-client",
                "S": "SELL",
                "o": "TAKE_PROFIT_MARKET",
                "q": "0.002",
                "p": "0",
                "ap": "50100.0",
                "sp": "50100.0",
                "x": "TRADE",
                "X": "FILLED",
                "i": 987654321,
                "l": "0.002",
                "z": "0.002",
                "L": "50100.0"
            }
        }"#;

        match parse_user_frame(frame) {
            Some(UserStreamEvent::OrderTradeUpdate(event)) => {
                assert_eq!(event.order.order_id, 987654321);
                assert_eq!(event.order.status, "FILLED");
                assert_eq!(event.order.symbol, "BTCUSDT");
            }
            other => panic!("expected order update, got {other:?}"),
        }
    }

    #[test]
    fn parses_account_update_with_positions() {
        let frame = r#"{
            "e": "ACCOUNT_UPDATE",
            "E": 1715000000000,
            "a": {
                "B": [{"a": "USDT", "wb": "1000.00", "cw": "1000.00"}],
                "P": [{"s": "BTCUSDT", "pa": "0.002", "ep": "50000.0", "up": "0.20"}]
            }
        }"#;

        match parse_user_frame(frame) {
            Some(UserStreamEvent::AccountUpdate(event)) => {
                assert_eq!(event.data.balances.len(), 1);
                assert_eq!(event.data.positions[0].symbol, "BTCUSDT");
            }
            other => panic!("expected account update, got {other:?}"),
        }
    }

    #[test]
    fn ignores_heartbeats_and_unknown_events() {
        assert!(parse_user_frame("{}").is_none());
        assert!(parse_user_frame(r#"{"e": "MARGIN_CALL"}"#).is_none());
        assert!(parse_user_frame("not json").is_none());
    }
}
