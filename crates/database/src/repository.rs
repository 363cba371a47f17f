use chrono::{DateTime, Utc};
use core_types::{
    Account, AccountDraft, Order, OrderPurpose, OrderSide, OrderStatus, OrderType, Position,
    PositionStatus, Signal,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::DbError;
use crate::rows::{AccountRow, OrderRow, PositionRow, SignalRow};

/// The `DbRepository` provides a high-level, application-specific interface
/// to the database. It encapsulates all SQL queries and data access logic.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: SqlitePool,
}

/// Insert draft for a position; the id and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub signal_id: i64,
    pub account_id: i64,
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub leverage: i64,
    pub take_profit_price: Decimal,
    pub stop_loss_price: Decimal,
}

/// Insert draft for an order row, written once the exchange has returned an
/// order identifier.
#[derive(Debug, Clone)]
pub struct NewOrder {
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
    pub purpose: OrderPurpose,
}

/// One row of the flat settings bag.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate trade statistics for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: i64,
    pub winning_trades: i64,
    pub losing_trades: i64,
    pub win_rate_pct: Decimal,
    pub total_pnl: Decimal,
    pub avg_pnl: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub open_positions: i64,
}

impl DbRepository {
    /// Creates a new `DbRepository` with a shared database connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==========================================================================
    // Accounts
    // ==========================================================================

    /// Inserts a new exchange account.
    ///
    /// Zero-valued numeric fields receive the store defaults. When the draft
    /// is flagged default, the default flag is cleared on every other row in
    /// the same transaction, preserving the at-most-one-default invariant.
    pub async fn create_account(&self, draft: &AccountDraft) -> Result<Account, DbError> {
        let draft = normalize_draft(draft, None)?;
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        if draft.is_default {
            sqlx::query("UPDATE binance_accounts SET is_default = 0, updated_at = ?")
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query(
            r#"
            INSERT INTO binance_accounts
                (name, api_key, api_secret, is_testnet, is_active, is_default,
                 leverage, order_amount_usdt, target_percent, stoploss_percent,
                 order_timeout_seconds, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.api_key)
        .bind(&draft.api_secret)
        .bind(draft.is_testnet)
        .bind(draft.is_active)
        .bind(draft.is_default)
        .bind(draft.leverage)
        .bind(draft.order_amount_usdt.to_string())
        .bind(draft.target_percent.to_string())
        .bind(draft.stoploss_percent.to_string())
        .bind(draft.order_timeout_seconds)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_account(result.last_insert_rowid()).await
    }

    /// Updates an existing account from a dashboard draft.
    ///
    /// A masked or empty secret in the draft keeps the stored secret; the
    /// dashboard only ever sees masked reads and must not write them back.
    pub async fn update_account(&self, id: i64, draft: &AccountDraft) -> Result<Account, DbError> {
        let existing = self.get_account(id).await?;
        let mut draft = normalize_draft(draft, Some(&existing))?;
        if draft.api_key.is_empty() {
            draft.api_key = existing.api_key.clone();
        }
        if draft.api_secret.is_empty() || draft.api_secret.contains('*') {
            draft.api_secret = existing.api_secret.clone();
        }
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;
        if draft.is_default {
            sqlx::query("UPDATE binance_accounts SET is_default = 0 WHERE id != ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            r#"
            UPDATE binance_accounts SET
                name = ?, api_key = ?, api_secret = ?, is_testnet = ?, is_active = ?,
                is_default = ?, leverage = ?, order_amount_usdt = ?, target_percent = ?,
                stoploss_percent = ?, order_timeout_seconds = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&draft.name)
        .bind(&draft.api_key)
        .bind(&draft.api_secret)
        .bind(draft.is_testnet)
        .bind(draft.is_active)
        .bind(draft.is_default)
        .bind(draft.leverage)
        .bind(draft.order_amount_usdt.to_string())
        .bind(draft.target_percent.to_string())
        .bind(draft.stoploss_percent.to_string())
        .bind(draft.order_timeout_seconds)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_account(id).await
    }

    pub async fn get_account(&self, id: i64) -> Result<Account, DbError> {
        let row = sqlx::query_as::<_, AccountRow>("SELECT * FROM binance_accounts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>, DbError> {
        let rows =
            sqlx::query_as::<_, AccountRow>("SELECT * FROM binance_accounts ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    pub async fn list_active_accounts(&self) -> Result<Vec<Account>, DbError> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM binance_accounts WHERE is_active = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Account::try_from).collect()
    }

    /// The account signals execute against: active and flagged default.
    pub async fn get_default_account(&self) -> Result<Option<Account>, DbError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM binance_accounts WHERE is_active = 1 AND is_default = 1 LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    /// Deletes an account unless it still owns open positions.
    pub async fn delete_account(&self, id: i64) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM positions WHERE account_id = ? AND status = 'open'",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if open > 0 {
            return Err(DbError::AccountInUse(id));
        }
        let result = sqlx::query("DELETE FROM binance_accounts WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit().await?;
        Ok(())
    }

    /// Makes the given account the single default. Idempotent.
    pub async fn set_default_account(&self, id: i64) -> Result<Account, DbError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE binance_accounts SET is_default = 0 WHERE id != ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "UPDATE binance_accounts SET is_default = 1, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        tx.commit().await?;

        self.get_account(id).await
    }

    // ==========================================================================
    // Signals
    // ==========================================================================

    pub async fn insert_signal(
        &self,
        message_id: i64,
        channel_id: i64,
        symbol: &str,
        raw_message: &str,
    ) -> Result<Signal, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO signals (message_id, channel_id, symbol, raw_message, parsed_at, status)
            VALUES (?, ?, ?, ?, ?, 'pending')
            "#,
        )
        .bind(message_id)
        .bind(channel_id)
        .bind(symbol)
        .bind(raw_message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_signal(result.last_insert_rowid()).await
    }

    pub async fn get_signal(&self, id: i64) -> Result<Signal, DbError> {
        let row = sqlx::query_as::<_, SignalRow>("SELECT * FROM signals WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    pub async fn mark_signal_processed(&self, id: i64) -> Result<(), DbError> {
        sqlx::query(
            "UPDATE signals SET status = 'processed', processed_at = ?, error = NULL WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_signal_failed(&self, id: i64, error: &str) -> Result<(), DbError> {
        sqlx::query("UPDATE signals SET status = 'failed', processed_at = ?, error = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==========================================================================
    // Positions
    // ==========================================================================

    /// Persists a position. Only called after the entry order was accepted,
    /// so every stored position is backed by a real fill attempt.
    pub async fn insert_position(&self, new: &NewPosition) -> Result<Position, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO positions
                (signal_id, account_id, symbol, side, entry_price, quantity, leverage,
                 take_profit_price, stop_loss_price, status, opened_at)
            VALUES (?, ?, ?, 'LONG', ?, ?, ?, ?, ?, 'open', ?)
            "#,
        )
        .bind(new.signal_id)
        .bind(new.account_id)
        .bind(&new.symbol)
        .bind(new.entry_price.to_string())
        .bind(new.quantity.to_string())
        .bind(new.leverage)
        .bind(new.take_profit_price.to_string())
        .bind(new.stop_loss_price.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_position(result.last_insert_rowid()).await
    }

    pub async fn get_position(&self, id: i64) -> Result<Position, DbError> {
        let row = sqlx::query_as::<_, PositionRow>("SELECT * FROM positions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    pub async fn list_positions(&self, limit: i64) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions ORDER BY opened_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Position::try_from).collect()
    }

    pub async fn list_open_positions(&self) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query_as::<_, PositionRow>(
            "SELECT * FROM positions WHERE status = 'open' ORDER BY opened_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Position::try_from).collect()
    }

    /// Closes a position at the given exit price, computing realized PnL.
    ///
    /// For a LONG: `pnl = (exit - entry) * qty * leverage` and
    /// `pnl_percent = (exit - entry) / entry * 100 * leverage`.
    /// Closing an already-closed position is a no-op and returns the row
    /// as stored.
    pub async fn close_position(&self, id: i64, exit_price: Decimal) -> Result<Position, DbError> {
        let position = self.get_position(id).await?;
        if position.status != PositionStatus::Open {
            return Ok(position);
        }

        let leverage = Decimal::from(position.leverage);
        let delta = exit_price - position.entry_price;
        let pnl = delta * position.quantity * leverage;
        let pnl_percent = if position.entry_price.is_zero() {
            Decimal::ZERO
        } else {
            delta / position.entry_price * Decimal::ONE_HUNDRED * leverage
        };

        sqlx::query(
            r#"
            UPDATE positions SET
                status = 'closed', closed_at = ?, exit_price = ?, pnl = ?, pnl_percent = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(pnl_percent.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;

        self.get_position(id).await
    }

    // ==========================================================================
    // Orders
    // ==========================================================================

    pub async fn insert_order(&self, new: &NewOrder) -> Result<Order, DbError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO orders
                (position_id, exchange_order_id, symbol, side, type, orig_qty, executed_qty,
                 price, stop_price, status, time_in_force, created_at, updated_at, purpose)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'GTC', ?, ?, ?)
            "#,
        )
        .bind(new.position_id)
        .bind(new.exchange_order_id)
        .bind(&new.symbol)
        .bind(new.side.as_str())
        .bind(new.order_type.as_str())
        .bind(new.orig_qty.to_string())
        .bind(new.executed_qty.to_string())
        .bind(new.price.to_string())
        .bind(new.stop_price.map(|p| p.to_string()))
        .bind(new.status.as_str())
        .bind(now)
        .bind(now)
        .bind(new.purpose.as_str())
        .execute(&self.pool)
        .await?;

        self.get_order(result.last_insert_rowid()).await
    }

    pub async fn get_order(&self, id: i64) -> Result<Order, DbError> {
        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(DbError::NotFound)?;
        row.try_into()
    }

    pub async fn orders_for_position(&self, position_id: i64) -> Result<Vec<Order>, DbError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT * FROM orders WHERE position_id = ? ORDER BY id ASC",
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Order::try_from).collect()
    }

    /// Applies an exchange-reported status update to the stored order row.
    ///
    /// Returns the updated row, or `None` when no row exists for this
    /// exchange order (e.g. a force-close order the writer never recorded).
    pub async fn update_order_status(
        &self,
        exchange_order_id: i64,
        status: OrderStatus,
        executed_qty: Decimal,
        avg_price: Decimal,
    ) -> Result<Option<Order>, DbError> {
        let now = Utc::now();
        let filled_at = (status == OrderStatus::Filled).then_some(now);
        let canceled_at =
            matches!(status, OrderStatus::Canceled | OrderStatus::Expired).then_some(now);

        let result = sqlx::query(
            r#"
            UPDATE orders SET
                status = ?, executed_qty = ?, price = ?, updated_at = ?,
                filled_at = COALESCE(filled_at, ?), canceled_at = COALESCE(canceled_at, ?)
            WHERE exchange_order_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(executed_qty.to_string())
        .bind(avg_price.to_string())
        .bind(now)
        .bind(filled_at)
        .bind(canceled_at)
        .bind(exchange_order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query_as::<_, OrderRow>("SELECT * FROM orders WHERE exchange_order_id = ?")
            .bind(exchange_order_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(row.try_into()?))
    }

    // ==========================================================================
    // Settings
    // ==========================================================================

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, DbError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Writes a setting only when the key is not present yet. Used to seed
    /// store defaults from the config file on first boot.
    pub async fn seed_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        sqlx::query("INSERT OR IGNORE INTO settings (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn all_settings(&self) -> Result<Vec<Setting>, DbError> {
        let rows = sqlx::query_as::<_, Setting>("SELECT * FROM settings ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    // ==========================================================================
    // Stats
    // ==========================================================================

    /// Aggregates closed-trade statistics for the dashboard.
    ///
    /// PnL columns are stored as TEXT, so the aggregation happens here in
    /// exact decimal arithmetic instead of SQL.
    pub async fn trade_stats(&self) -> Result<TradeStats, DbError> {
        let pnls: Vec<Option<String>> =
            sqlx::query_scalar("SELECT pnl FROM positions WHERE status = 'closed'")
                .fetch_all(&self.pool)
                .await?;
        let open_positions: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM positions WHERE status = 'open'")
                .fetch_one(&self.pool)
                .await?;

        let mut stats = TradeStats {
            open_positions,
            ..TradeStats::default()
        };

        for raw in pnls.into_iter().flatten() {
            let pnl = crate::rows::parse_decimal("pnl", &raw)?;
            stats.total_trades += 1;
            stats.total_pnl += pnl;
            if pnl > Decimal::ZERO {
                stats.winning_trades += 1;
                stats.largest_win = stats.largest_win.max(pnl);
            } else {
                stats.losing_trades += 1;
                stats.largest_loss = stats.largest_loss.min(pnl);
            }
        }

        if stats.total_trades > 0 {
            let total = Decimal::from(stats.total_trades);
            stats.avg_pnl = stats.total_pnl / total;
            stats.win_rate_pct =
                Decimal::from(stats.winning_trades) / total * Decimal::ONE_HUNDRED;
        }

        Ok(stats)
    }
}

/// Applies validation and store defaults to a dashboard draft.
fn normalize_draft(
    draft: &AccountDraft,
    existing: Option<&Account>,
) -> Result<AccountDraft, DbError> {
    let mut draft = draft.clone();
    if draft.name.trim().is_empty() {
        return Err(DbError::InvalidAccount("name must not be empty".into()));
    }
    if draft.api_key.trim().is_empty() && existing.is_none() {
        return Err(DbError::InvalidAccount("api_key must not be empty".into()));
    }
    if draft.api_secret.trim().is_empty() && existing.is_none() {
        return Err(DbError::InvalidAccount("api_secret must not be empty".into()));
    }

    if draft.leverage == 0 {
        draft.leverage = 10;
    }
    if !(1..=125).contains(&draft.leverage) {
        return Err(DbError::InvalidAccount(format!(
            "leverage must be within [1, 125], got {}",
            draft.leverage
        )));
    }
    if draft.order_amount_usdt.is_zero() {
        draft.order_amount_usdt = Decimal::ONE_HUNDRED;
    }
    if draft.target_percent.is_zero() {
        draft.target_percent = Decimal::from_f64(0.02).unwrap_or_default();
    }
    if draft.stoploss_percent.is_zero() {
        draft.stoploss_percent = Decimal::from_f64(0.01).unwrap_or_default();
    }
    if draft.order_timeout_seconds == 0 {
        draft.order_timeout_seconds = 600;
    }
    if draft.order_timeout_seconds < 60 {
        return Err(DbError::InvalidAccount(
            "order_timeout_seconds must be at least 60".into(),
        ));
    }
    Ok(draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_repo() -> DbRepository {
        // A single connection keeps the in-memory database alive and shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        crate::connection::run_migrations(&pool)
            .await
            .expect("migrations");
        DbRepository::new(pool)
    }

    fn draft(name: &str) -> AccountDraft {
        AccountDraft {
            name: name.to_string(),
            api_key: "key-0123456789abcdef".to_string(),
            api_secret: "secret-0123456789abcdef".to_string(),
            is_active: true,
            ..AccountDraft::default()
        }
    }

    #[tokio::test]
    async fn create_applies_store_defaults() {
        let repo = test_repo().await;
        let account = repo.create_account(&draft("main")).await.unwrap();

        assert_eq!(account.leverage, 10);
        assert_eq!(account.order_amount_usdt, dec!(100));
        assert_eq!(account.target_percent, dec!(0.02));
        assert_eq!(account.stoploss_percent, dec!(0.01));
        assert_eq!(account.order_timeout_seconds, 600);
    }

    #[tokio::test]
    async fn create_rejects_empty_credentials() {
        let repo = test_repo().await;
        let mut bad = draft("main");
        bad.api_key = String::new();
        assert!(matches!(
            repo.create_account(&bad).await,
            Err(DbError::InvalidAccount(_))
        ));
    }

    #[tokio::test]
    async fn default_flag_is_unique_among_accounts() {
        let repo = test_repo().await;
        let mut first = draft("first");
        first.is_default = true;
        let first = repo.create_account(&first).await.unwrap();

        let mut second = draft("second");
        second.is_default = true;
        let second = repo.create_account(&second).await.unwrap();

        let defaults: Vec<_> = repo
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_default && a.is_active)
            .collect();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].id, second.id);

        // set_default is idempotent and restores the invariant.
        repo.set_default_account(first.id).await.unwrap();
        repo.set_default_account(first.id).await.unwrap();
        let default = repo.get_default_account().await.unwrap().unwrap();
        assert_eq!(default.id, first.id);
        let defaults = repo
            .list_accounts()
            .await
            .unwrap()
            .into_iter()
            .filter(|a| a.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[tokio::test]
    async fn delete_fails_while_positions_are_open() {
        let repo = test_repo().await;
        let account = repo.create_account(&draft("main")).await.unwrap();
        let signal = repo
            .insert_signal(1, 42, "BTCUSDT", "$BTC to the moon")
            .await
            .unwrap();
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

        assert!(matches!(
            repo.delete_account(account.id).await,
            Err(DbError::AccountInUse(_))
        ));
        // The store is unchanged.
        assert_eq!(repo.get_account(account.id).await.unwrap().id, account.id);

        repo.close_position(position.id, dec!(50100)).await.unwrap();
        repo.delete_account(account.id).await.unwrap();
        assert!(matches!(
            repo.get_account(account.id).await,
            Err(DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn close_position_computes_leveraged_pnl() {
        let repo = test_repo().await;
        let account = repo.create_account(&draft("main")).await.unwrap();
        let signal = repo.insert_signal(1, 42, "BTCUSDT", "$BTC").await.unwrap();
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

        let closed = repo.close_position(position.id, dec!(50100)).await.unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        // (50100 - 50000) * 0.002 * 10 = 2
        assert_eq!(closed.pnl, Some(dec!(2.000)));
        assert_eq!(closed.exit_price, Some(dec!(50100)));

        // Closing twice is a no-op.
        let again = repo.close_position(position.id, dec!(1)).await.unwrap();
        assert_eq!(again.pnl, closed.pnl);
    }

    #[tokio::test]
    async fn update_keeps_masked_secret() {
        let repo = test_repo().await;
        let account = repo.create_account(&draft("main")).await.unwrap();

        let mut update = draft("renamed");
        update.api_secret = core_types::mask_secret(&account.api_secret);
        let updated = repo.update_account(account.id, &update).await.unwrap();

        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.api_secret, account.api_secret);
    }

    #[tokio::test]
    async fn settings_round_trip_and_seed() {
        let repo = test_repo().await;
        repo.set_setting("trading.enabled", "true").await.unwrap();
        repo.seed_setting("trading.enabled", "false").await.unwrap();
        assert_eq!(
            repo.get_setting("trading.enabled").await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(repo.get_setting("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn trade_stats_aggregates_closed_positions() {
        let repo = test_repo().await;
        let account = repo.create_account(&draft("main")).await.unwrap();
        for (symbol, exit) in [("BTCUSDT", dec!(50100)), ("ETHUSDT", dec!(49900))] {
            let signal = repo.insert_signal(1, 42, symbol, "msg").await.unwrap();
            let position = repo
                .insert_position(&NewPosition {
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
                .unwrap();
            repo.close_position(position.id, exit).await.unwrap();
        }

        let stats = repo.trade_stats().await.unwrap();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.win_rate_pct, dec!(50));
        assert_eq!(stats.open_positions, 0);
    }
}
