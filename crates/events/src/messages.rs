use chrono::{DateTime, Utc};
use core_types::{Order, Position};
use serde::{Deserialize, Serialize};

/// A notification that a signal completed its bracket dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalExecuted {
    pub signal_id: i64,
    pub symbol: String,
    pub position_id: Option<i64>,
    pub timestamp: DateTime<Utc>,
}

/// A non-fatal trading error surfaced to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalError {
    pub symbol: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// A balance entry from an exchange ACCOUNT_UPDATE push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceState {
    pub asset: String,
    pub wallet_balance: String,
}

/// A position entry from an exchange ACCOUNT_UPDATE push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub symbol: String,
    pub position_amount: String,
    pub entry_price: String,
    pub unrealized_pnl: String,
}

/// An exchange account snapshot relayed to the dashboard as-is; it does not
/// alter tracker state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    pub account_id: i64,
    pub balances: Vec<BalanceState>,
    pub positions: Vec<PositionState>,
    pub timestamp: DateTime<Utc>,
}

/// The top-level event enum carried on the bus and pushed over WebSocket.
///
/// `#[serde(tag = "type", content = "data")]` serializes each variant as a
/// `{"type": "...", "data": {...}}` frame, which is what the dashboard
/// client consumes directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsMessage {
    /// A position row changed (opened, closed, or force-closed).
    PositionUpdate(Position),
    /// An order row changed (placed, filled, cancelled, expired).
    OrderUpdate(Order),
    /// A signal finished executing.
    SignalExecuted(SignalExecuted),
    /// A signal or lifecycle step failed without stopping the bridge.
    SignalError(SignalError),
    /// An exchange account snapshot (balances and raw positions).
    AccountUpdate(AccountState),
    /// Settings rows changed; the engine re-reads the store and rebuilds
    /// the extractor. Not forwarded to WebSocket clients.
    ConfigChanged { keys: Vec<String> },
    /// Account rows changed; the engine rebuilds the client registry.
    /// Not forwarded to WebSocket clients.
    AccountsChanged,
}

impl WsMessage {
    /// Whether this event is part of the dashboard's WebSocket contract or
    /// purely an internal coordination signal.
    pub fn is_dashboard_event(&self) -> bool {
        !matches!(
            self,
            WsMessage::ConfigChanged { .. } | WsMessage::AccountsChanged
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_error_serializes_as_type_data_frame() {
        let message = WsMessage::SignalError(SignalError {
            symbol: "BTCUSDT".to_string(),
            message: "entry rejected".to_string(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "signal_error");
        assert_eq!(json["data"]["symbol"], "BTCUSDT");
    }

    #[test]
    fn internal_events_are_not_dashboard_events() {
        assert!(!WsMessage::AccountsChanged.is_dashboard_event());
        assert!(!WsMessage::ConfigChanged { keys: vec![] }.is_dashboard_event());
    }
}
