//! # Meridian Tracker Crate
//!
//! Owns the in-memory lifecycle state of the trading core:
//!
//! - the map of live protective orders awaiting fill or timeout;
//! - the recently-executed-symbols map backing the 48-hour dedup gate;
//! - the set of symbols already force-closed in this process.
//!
//! A 10-second sweeper cancels and flattens brackets whose protective
//! orders outlived their per-account timeout, an hourly reaper ages the
//! dedup map, and the user-data ingest loop reconciles exchange pushes into
//! the pending map and the position store.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use api_client::user_stream::{AccountUpdateEvent, OrderTradeUpdateEvent};
use api_client::{ClientRegistry, UserStreamEvent};
use chrono::{DateTime, Utc};
use core_types::{OrderPurpose, OrderRequest, OrderSide, OrderStatus};
use database::DbRepository;
use events::{AccountState, BalanceState, EventBus, PositionState, SignalError, WsMessage};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

pub mod error;

pub use error::TrackerError;

/// Re-signals for a symbol are suppressed for this long.
pub fn dedup_window() -> chrono::Duration {
    chrono::Duration::hours(48)
}

const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const REAP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// One live protective order being tracked for timeout.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub account_id: i64,
    pub position_id: i64,
    pub symbol: String,
    pub purpose: OrderPurpose,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub timeout: Duration,
}

impl PendingOrder {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at).to_std().unwrap_or_default() > self.timeout
    }
}

pub struct OrderTracker {
    pending: Mutex<HashMap<i64, PendingOrder>>,
    recent_symbols: Mutex<HashMap<String, DateTime<Utc>>>,
    closed_symbols: Mutex<HashSet<String>>,
    registry: Arc<ClientRegistry>,
    repo: DbRepository,
    bus: EventBus,
}

impl OrderTracker {
    pub fn new(registry: Arc<ClientRegistry>, repo: DbRepository, bus: EventBus) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            recent_symbols: Mutex::new(HashMap::new()),
            closed_symbols: Mutex::new(HashSet::new()),
            registry,
            repo,
            bus,
        }
    }

    // ==========================================================================
    // Registration and dedup gate
    // ==========================================================================

    /// Registers a live TP or SL order for timeout tracking.
    pub async fn register(&self, exchange_order_id: i64, order: PendingOrder) {
        tracing::debug!(
            order_id = exchange_order_id,
            symbol = %order.symbol,
            purpose = %order.purpose,
            "Tracking protective order."
        );
        self.pending.lock().await.insert(exchange_order_id, order);
    }

    /// Whether the symbol was executed within the dedup window.
    pub async fn is_recent(&self, symbol: &str) -> bool {
        let recent = self.recent_symbols.lock().await;
        match recent.get(symbol) {
            Some(executed_at) => Utc::now() - *executed_at < dedup_window(),
            None => false,
        }
    }

    /// Records a successful execution, arming the dedup gate for the symbol.
    pub async fn mark_executed(&self, symbol: &str) {
        self.recent_symbols
            .lock()
            .await
            .insert(symbol.to_string(), Utc::now());
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    // ==========================================================================
    // Timeout sweeper
    // ==========================================================================

    /// Runs the sweep loop until the process exits.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            self.sweep_once(Utc::now()).await;
        }
    }

    /// One sweep pass: expired entries are drained under the lock, then
    /// acted on without holding it across exchange calls.
    pub async fn sweep_once(&self, now: DateTime<Utc>) {
        let expired = self.drain_expired(now).await;
        for (order_id, order) in expired {
            tracing::warn!(
                order_id,
                symbol = %order.symbol,
                purpose = %order.purpose,
                "Protective order timed out; cancelling and flattening."
            );
            if let Err(e) = self.expire_order(order_id, &order).await {
                tracing::error!(order_id, error = %e, "Timeout handling failed.");
                self.bus.publish(WsMessage::SignalError(SignalError {
                    symbol: order.symbol.clone(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                }));
            }
        }
    }

    async fn drain_expired(&self, now: DateTime<Utc>) -> Vec<(i64, PendingOrder)> {
        let mut pending = self.pending.lock().await;
        let expired_ids: Vec<i64> = pending
            .iter()
            .filter(|(_, order)| order.is_expired(now))
            .map(|(id, _)| *id)
            .collect();
        expired_ids
            .into_iter()
            .filter_map(|id| pending.remove(&id).map(|order| (id, order)))
            .collect()
    }

    /// Cancels one timed-out protective order and force-closes its position
    /// unless the symbol was already flattened in this process.
    async fn expire_order(&self, order_id: i64, order: &PendingOrder) -> Result<(), TrackerError> {
        let client = self
            .registry
            .get(order.account_id)
            .await
            .ok_or(TrackerError::MissingClient(order.account_id))?;

        match client.cancel_order(&order.symbol, order_id).await {
            Ok(_) => {
                if let Ok(Some(updated)) = self
                    .repo
                    .update_order_status(order_id, OrderStatus::Canceled, Decimal::ZERO, Decimal::ZERO)
                    .await
                {
                    self.bus.publish(WsMessage::OrderUpdate(updated));
                }
            }
            // The order may have filled or expired between sweep ticks.
            Err(e) => tracing::error!(
                order_id,
                symbol = %order.symbol,
                error = %e,
                "Cancel of timed-out order failed."
            ),
        }

        if !self.should_force_close(&order.symbol).await {
            return Ok(());
        }

        let close = OrderRequest::market_close(&order.symbol, OrderSide::Sell, order.quantity);
        let response = match client.place_order(&close).await {
            Ok(response) => response,
            Err(e) => {
                // The close did not happen; allow a later sweep to retry.
                self.closed_symbols.lock().await.remove(&order.symbol);
                return Err(TrackerError::CloseFailed {
                    symbol: order.symbol.clone(),
                    source: e,
                });
            }
        };
        tracing::info!(symbol = %order.symbol, "Position force-closed after protective timeout.");

        let exit_price = match response.avg_price_decimal() {
            Some(price) => price,
            None => client
                .get_symbol_price(&order.symbol)
                .await
                .unwrap_or(Decimal::ZERO),
        };
        match self.repo.close_position(order.position_id, exit_price).await {
            Ok(position) => self.bus.publish(WsMessage::PositionUpdate(position)),
            Err(e) => tracing::error!(position_id = order.position_id, error = %e,
                "Failed to persist forced close."),
        }
        Ok(())
    }

    /// Check-and-set on the closed-symbols set. At most one caller per
    /// symbol per process lifetime gets `true`, so a TP and an SL timing
    /// out in the same sweep only flatten the position once.
    async fn should_force_close(&self, symbol: &str) -> bool {
        self.closed_symbols.lock().await.insert(symbol.to_string())
    }

    // ==========================================================================
    // Dedup reaper
    // ==========================================================================

    /// Runs the hourly dedup eviction loop.
    pub async fn run_reaper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(REAP_INTERVAL);
        loop {
            ticker.tick().await;
            let evicted = self.reap_once(Utc::now()).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted stale dedup entries.");
            }
        }
    }

    /// Evicts dedup entries older than the window; returns how many.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> usize {
        let mut recent = self.recent_symbols.lock().await;
        let before = recent.len();
        recent.retain(|_, executed_at| now - *executed_at < dedup_window());
        before - recent.len()
    }

    // ==========================================================================
    // User-data ingest
    // ==========================================================================

    /// Consumes one account's user-data events until the stream ends.
    /// One loop per account keeps processing serial per account.
    pub async fn ingest_loop(
        self: Arc<Self>,
        account_id: i64,
        mut rx: mpsc::Receiver<UserStreamEvent>,
    ) {
        while let Some(event) = rx.recv().await {
            match event {
                UserStreamEvent::OrderTradeUpdate(update) => {
                    self.handle_order_update(&update).await;
                }
                UserStreamEvent::AccountUpdate(update) => {
                    self.handle_account_update(account_id, &update);
                }
            }
        }
        tracing::warn!(account_id, "User-data ingest loop ended.");
    }

    /// Reconciles one ORDER_TRADE_UPDATE into the pending map and the store.
    pub async fn handle_order_update(&self, update: &OrderTradeUpdateEvent) {
        let order = &update.order;
        let status = match OrderStatus::from_str(&order.status) {
            Ok(status) => status,
            // Transitional statuses we do not model (e.g. NEW_INSURANCE).
            Err(_) => return,
        };
        if !status.is_terminal() {
            return;
        }

        let removed = self.pending.lock().await.remove(&order.order_id);

        let executed_qty =
            Decimal::from_str(&order.cumulative_filled_qty).unwrap_or(Decimal::ZERO);
        let avg_price = Decimal::from_str(&order.avg_price).unwrap_or(Decimal::ZERO);

        match self
            .repo
            .update_order_status(order.order_id, status, executed_qty, avg_price)
            .await
        {
            Ok(Some(updated)) => self.bus.publish(WsMessage::OrderUpdate(updated)),
            // Rows are written asynchronously; an unknown id is expected for
            // force-close orders and the occasional writer lag.
            Ok(None) => {}
            Err(e) => tracing::error!(order_id = order.order_id, error = %e,
                "Failed to update order row."),
        }

        // A filled protective order means the position is done.
        if let Some(pending) = removed {
            if status == OrderStatus::Filled {
                let exit_price = if avg_price.is_zero() {
                    Decimal::from_str(&order.last_filled_price).unwrap_or(Decimal::ZERO)
                } else {
                    avg_price
                };
                match self.repo.close_position(pending.position_id, exit_price).await {
                    Ok(position) => self.bus.publish(WsMessage::PositionUpdate(position)),
                    Err(e) => tracing::error!(
                        position_id = pending.position_id,
                        error = %e,
                        "Failed to close position after protective fill."
                    ),
                }
            }
        }
    }

    /// Relays an ACCOUNT_UPDATE snapshot to the dashboard. Tracker state is
    /// not affected.
    fn handle_account_update(&self, account_id: i64, update: &AccountUpdateEvent) {
        self.bus.publish(WsMessage::AccountUpdate(AccountState {
            account_id,
            balances: update
                .data
                .balances
                .iter()
                .map(|b| BalanceState {
                    asset: b.asset.clone(),
                    wallet_balance: b.wallet_balance.clone(),
                })
                .collect(),
            positions: update
                .data
                .positions
                .iter()
                .map(|p| PositionState {
                    symbol: p.symbol.clone(),
                    position_amount: p.position_amount.clone(),
                    entry_price: p.entry_price.clone(),
                    unrealized_pnl: p.unrealized_pnl.clone(),
                })
                .collect(),
            timestamp: Utc::now(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api_client::user_stream::OrderUpdate;
    use core_types::{AccountDraft, PositionStatus};
    use database::NewPosition;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_tracker() -> (Arc<OrderTracker>, DbRepository) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        database::run_migrations(&pool).await.expect("migrations");
        let repo = DbRepository::new(pool);
        let tracker = Arc::new(OrderTracker::new(
            Arc::new(ClientRegistry::new()),
            repo.clone(),
            EventBus::new(64),
        ));
        (tracker, repo)
    }

    fn pending(symbol: &str, purpose: OrderPurpose, position_id: i64) -> PendingOrder {
        PendingOrder {
            account_id: 1,
            position_id,
            symbol: symbol.to_string(),
            purpose,
            quantity: dec!(0.002),
            created_at: Utc::now(),
            timeout: Duration::from_secs(600),
        }
    }

    async fn seed_position(repo: &DbRepository, symbol: &str) -> i64 {
        let account = repo
            .create_account(&AccountDraft {
                name: "main".to_string(),
                api_key: "key-0123456789abcdef".to_string(),
                api_secret: "secret-0123456789abcdef".to_string(),
                is_active: true,
                ..AccountDraft::default()
            })
            .await
            .unwrap();
        let signal = repo.insert_signal(1, 42, symbol, "msg").await.unwrap();
        repo.insert_position(&NewPosition {
            signal_id: signal.id,
            account_id: account.id,
            symbol: symbol.to_string(),
            entry_price: dec!(50000),
            quantity: dec!(0.002),
            leverage: 10,
            take_profit_price: dec!(50100),
            stop_loss_price: dec!(49950),
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn dedup_gate_arms_and_expires() {
        let (tracker, _) = test_tracker().await;
        assert!(!tracker.is_recent("BTCUSDT").await);

        tracker.mark_executed("BTCUSDT").await;
        assert!(tracker.is_recent("BTCUSDT").await);

        // Nothing is younger than now + window, so everything reaps.
        let future = Utc::now() + dedup_window() + chrono::Duration::minutes(1);
        assert_eq!(tracker.reap_once(future).await, 1);
        assert!(!tracker.is_recent("BTCUSDT").await);
    }

    #[tokio::test]
    async fn reaper_keeps_fresh_entries() {
        let (tracker, _) = test_tracker().await;
        tracker.mark_executed("BTCUSDT").await;
        assert_eq!(tracker.reap_once(Utc::now()).await, 0);
        assert!(tracker.is_recent("BTCUSDT").await);
    }

    #[tokio::test]
    async fn drain_expired_respects_timeouts() {
        let (tracker, _) = test_tracker().await;
        let mut stale = pending("BTCUSDT", OrderPurpose::TakeProfit, 1);
        stale.created_at = Utc::now() - chrono::Duration::seconds(700);
        tracker.register(100, stale).await;
        tracker.register(101, pending("ETHUSDT", OrderPurpose::StopLoss, 2)).await;

        let expired = tracker.drain_expired(Utc::now()).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, 100);
        // The fresh order is still tracked.
        assert_eq!(tracker.pending_count().await, 1);
    }

    #[tokio::test]
    async fn force_close_happens_once_per_symbol() {
        let (tracker, _) = test_tracker().await;
        assert!(tracker.should_force_close("BTCUSDT").await);
        assert!(!tracker.should_force_close("BTCUSDT").await);
        assert!(tracker.should_force_close("ETHUSDT").await);
    }

    #[tokio::test]
    async fn terminal_update_drops_pending_and_closes_position() {
        let (tracker, repo) = test_tracker().await;
        let position_id = seed_position(&repo, "BTCUSDT").await;
        tracker
            .register(900, pending("BTCUSDT", OrderPurpose::TakeProfit, position_id))
            .await;

        let update = OrderTradeUpdateEvent {
            event_time: 0,
            order: OrderUpdate {
                symbol: "BTCUSDT".to_string(),
                client_order_id: String::new(),
                side: "SELL".to_string(),
                order_type: "TAKE_PROFIT_MARKET".to_string(),
                quantity: "0.002".to_string(),
                price: "0".to_string(),
                avg_price: "50100.0".to_string(),
                stop_price: "50100.0".to_string(),
                execution_type: "TRADE".to_string(),
                status: "FILLED".to_string(),
                order_id: 900,
                last_filled_qty: "0.002".to_string(),
                cumulative_filled_qty: "0.002".to_string(),
                last_filled_price: "50100.0".to_string(),
            },
        };
        tracker.handle_order_update(&update).await;

        assert_eq!(tracker.pending_count().await, 0);
        let position = repo.get_position(position_id).await.unwrap();
        assert_eq!(position.status, PositionStatus::Closed);
        assert_eq!(position.exit_price, Some(dec!(50100.0)));
    }

    #[tokio::test]
    async fn non_terminal_update_keeps_pending() {
        let (tracker, _) = test_tracker().await;
        tracker
            .register(901, pending("BTCUSDT", OrderPurpose::StopLoss, 1))
            .await;

        let update = OrderTradeUpdateEvent {
            event_time: 0,
            order: OrderUpdate {
                symbol: "BTCUSDT".to_string(),
                client_order_id: String::new(),
                side: "SELL".to_string(),
                order_type: "STOP_MARKET".to_string(),
                quantity: "0.002".to_string(),
                price: "0".to_string(),
                avg_price: "0".to_string(),
                stop_price: "49950.0".to_string(),
                execution_type: "NEW".to_string(),
                status: "NEW".to_string(),
                order_id: 901,
                last_filled_qty: "0".to_string(),
                cumulative_filled_qty: "0".to_string(),
                last_filled_price: "0".to_string(),
            },
        };
        tracker.handle_order_update(&update).await;

        assert_eq!(tracker.pending_count().await, 1);
    }
}
