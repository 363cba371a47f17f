//! # Meridian Events Crate
//!
//! The single event bus connecting the trading core to the dashboard.
//! Executor, tracker, and engine publish; the WebSocket fan-out and the
//! engine's settings refresher subscribe. No component calls across layers
//! directly, which keeps the dependency graph acyclic.

use tokio::sync::broadcast;

pub mod messages;

pub use messages::{
    AccountState, BalanceState, PositionState, SignalError, SignalExecuted, WsMessage,
};

/// A cheap-to-clone handle to the broadcast bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WsMessage>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event. A bus with no subscribers simply drops it; that
    /// is normal during startup and never an error.
    pub fn publish(&self, message: WsMessage) {
        let _ = self.tx.send(message);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsMessage> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_all_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(WsMessage::AccountsChanged);

        assert_eq!(a.recv().await.unwrap(), WsMessage::AccountsChanged);
        assert_eq!(b.recv().await.unwrap(), WsMessage::AccountsChanged);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(8);
        bus.publish(WsMessage::AccountsChanged);
    }
}
