use database::{DbRepository, NewOrder};
use events::{EventBus, WsMessage};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Order rows queue up behind this many slots before the bridge starts
/// dropping them; the exchange remains the source of truth for orders.
const WRITER_QUEUE_CAPACITY: usize = 256;

/// A handle to the single asynchronous order-row writer.
///
/// The dispatch path never blocks on persistence: rows are queued with
/// `try_send` and a dedicated task drains the queue into the store. When
/// the process shuts down, dropping the last handle closes the queue and
/// the task drains what is left before exiting.
#[derive(Clone)]
pub struct OrderWriter {
    tx: mpsc::Sender<NewOrder>,
}

impl OrderWriter {
    /// Spawns the writer task and returns the queue handle alongside the
    /// task handle for shutdown supervision.
    pub fn spawn(repo: DbRepository, bus: EventBus) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(WRITER_QUEUE_CAPACITY);
        let handle = tokio::spawn(writer_loop(repo, bus, rx));
        (Self { tx }, handle)
    }

    /// Queues one order row without waiting. A full queue drops the row
    /// with a warning rather than stalling the dispatch path.
    pub fn enqueue(&self, row: NewOrder) {
        if let Err(e) = self.tx.try_send(row) {
            tracing::warn!(error = %e, "Order-row write queue is unavailable; row dropped.");
        }
    }
}

async fn writer_loop(repo: DbRepository, bus: EventBus, mut rx: mpsc::Receiver<NewOrder>) {
    while let Some(row) = rx.recv().await {
        match repo.insert_order(&row).await {
            Ok(order) => bus.publish(WsMessage::OrderUpdate(order)),
            Err(e) => {
                tracing::error!(
                    exchange_order_id = row.exchange_order_id,
                    error = %e,
                    "Failed to persist order row."
                );
            }
        }
    }
    tracing::debug!("Order writer queue closed; writer task exiting.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{OrderPurpose, OrderSide, OrderStatus, OrderType};
    use database::NewPosition;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_repo() -> DbRepository {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        database::run_migrations(&pool).await.expect("migrations");
        DbRepository::new(pool)
    }

    #[tokio::test]
    async fn queued_rows_are_drained_into_the_store() {
        let repo = test_repo().await;
        let account = repo
            .create_account(&core_types::AccountDraft {
                name: "main".to_string(),
                api_key: "key-0123456789abcdef".to_string(),
                api_secret: "secret-0123456789abcdef".to_string(),
                is_active: true,
                ..core_types::AccountDraft::default()
            })
            .await
            .unwrap();
        let signal = repo.insert_signal(1, 42, "BTCUSDT", "msg").await.unwrap();
        let position = repo
            .insert_position(&NewPosition {
                signal_id: signal.id,
                account_id: account.id,
                symbol: "BTCUSDT".to_string(),
                entry_price: dec!(50000),
                quantity: dec!(0.002),
                leverage: 10,
                take_profit_price: dec!(50100),
                stop_loss_price: dec!(49950),
            })
            .await
            .unwrap();

        let (writer, handle) = OrderWriter::spawn(repo.clone(), EventBus::new(8));
        writer.enqueue(NewOrder {
            position_id: position.id,
            exchange_order_id: 555,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            orig_qty: dec!(0.002),
            executed_qty: dec!(0.002),
            price: dec!(50000),
            stop_price: None,
            status: OrderStatus::Filled,
            purpose: OrderPurpose::Entry,
        });

        // Dropping the handle closes the queue; the task drains then exits.
        drop(writer);
        handle.await.unwrap();

        let orders = repo.orders_for_position(position.id).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].exchange_order_id, 555);
        assert_eq!(orders[0].purpose, OrderPurpose::Entry);
    }
}
