use std::sync::Arc;
use std::time::Duration;

use api_client::{ApiError, ClientRegistry, ExchangeApi, OrderResponse};
use chrono::Utc;
use core_types::{
    Account, MarginType, OrderPurpose, OrderRequest, OrderSide, OrderStatus, OrderType, Position,
    Signal,
};
use database::{DbRepository, NewOrder, NewPosition};
use events::{EventBus, SignalError, SignalExecuted, WsMessage};
use rust_decimal::Decimal;
use tracker::{OrderTracker, PendingOrder};

use crate::error::ExecutorError;
use crate::sizing;
use crate::writer::OrderWriter;

/// Executes one signal against one account: prices and sizes the bracket,
/// conditions the symbol, dispatches the three orders concurrently, and
/// registers the surviving protective legs with the tracker.
pub struct OrderExecutor {
    registry: Arc<ClientRegistry>,
    tracker: Arc<OrderTracker>,
    repo: DbRepository,
    bus: EventBus,
    writer: OrderWriter,
    dry_run: bool,
}

/// The fully-conformed numbers for one bracket.
#[derive(Debug)]
struct BracketPlan {
    entry_price: Decimal,
    quantity: Decimal,
    tp_price: Decimal,
    sl_price: Decimal,
}

impl OrderExecutor {
    pub fn new(
        registry: Arc<ClientRegistry>,
        tracker: Arc<OrderTracker>,
        repo: DbRepository,
        bus: EventBus,
        writer: OrderWriter,
        dry_run: bool,
    ) -> Self {
        Self {
            registry,
            tracker,
            repo,
            bus,
            writer,
            dry_run,
        }
    }

    /// Resolves the account's gateway and executes the signal.
    ///
    /// Returns the opened position, or `None` when the signal was skipped
    /// (dedup window, dry-run) — a skip is a success, not an error. The
    /// gateway is resolved only when a bracket will actually go out.
    pub async fn execute(
        &self,
        signal: &Signal,
        account: &Account,
    ) -> Result<Option<Position>, ExecutorError> {
        if !self.preflight(signal, account).await? {
            return Ok(None);
        }
        let client = self
            .registry
            .get(account.id)
            .await
            .ok_or(ExecutorError::NoClient(account.id))?;
        self.dispatch_bracket(signal, account, client.as_ref())
            .await
    }

    /// The full execution pipeline against an explicit gateway.
    pub async fn execute_with_gateway(
        &self,
        signal: &Signal,
        account: &Account,
        gateway: &dyn ExchangeApi,
    ) -> Result<Option<Position>, ExecutorError> {
        if !self.preflight(signal, account).await? {
            return Ok(None);
        }
        self.dispatch_bracket(signal, account, gateway).await
    }

    /// The gates that precede any exchange traffic. Returns `false` when
    /// the signal should be skipped without error.
    async fn preflight(&self, signal: &Signal, account: &Account) -> Result<bool, ExecutorError> {
        let symbol = signal.symbol.as_str();

        // Dedup gate: a symbol executed within the window is silently
        // skipped. The check and the later record are deliberately not one
        // atomic step; the window is coarse duplicate-suppression, not a
        // correctness invariant.
        if self.tracker.is_recent(symbol).await {
            tracing::info!(%symbol, "Symbol executed recently; suppressing duplicate signal.");
            return Ok(false);
        }

        validate_account(account)?;

        if self.dry_run {
            tracing::info!(%symbol, "Dry run: bracket not dispatched, nothing persisted.");
            return Ok(false);
        }
        Ok(true)
    }

    /// Prices, conditions, and dispatches the bracket.
    async fn dispatch_bracket(
        &self,
        signal: &Signal,
        account: &Account,
        gateway: &dyn ExchangeApi,
    ) -> Result<Option<Position>, ExecutorError> {
        let symbol = signal.symbol.as_str();
        let plan = self.plan_bracket(symbol, account, gateway).await?;
        tracing::info!(
            %symbol,
            entry = %plan.entry_price,
            quantity = %plan.quantity,
            tp = %plan.tp_price,
            sl = %plan.sl_price,
            "Dispatching bracket."
        );

        // Condition the symbol before any order goes out.
        gateway.set_leverage(symbol, account.leverage).await?;
        gateway.set_margin_type(symbol, MarginType::Crossed).await?;

        let entry_request = OrderRequest::market(symbol, OrderSide::Buy, plan.quantity);
        let tp_request = OrderRequest::protective(
            symbol,
            OrderType::TakeProfitMarket,
            plan.quantity,
            plan.tp_price,
        );
        let sl_request =
            OrderRequest::protective(symbol, OrderType::StopMarket, plan.quantity, plan.sl_price);

        // All three legs go out concurrently; acknowledgement order is
        // unspecified and only entry rejection triggers a rollback.
        let (entry, tp, sl) = tokio::join!(
            gateway.place_order(&entry_request),
            gateway.place_order(&tp_request),
            gateway.place_order(&sl_request),
        );

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::error!(%symbol, error = %e, "Entry rejected; rolling back protective legs.");
                self.cancel_accepted(gateway, symbol, &[&tp, &sl]).await;
                // Dedup is not recorded: the operator may re-signal.
                return Err(ExecutorError::EntryFailed {
                    symbol: symbol.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        // The entry is accepted: from here on the position exists.
        let entry_price = entry.avg_price_decimal().unwrap_or(plan.entry_price);
        let position = self
            .repo
            .insert_position(&NewPosition {
                signal_id: signal.id,
                account_id: account.id,
                symbol: symbol.to_string(),
                entry_price,
                quantity: plan.quantity,
                leverage: account.leverage,
                take_profit_price: plan.tp_price,
                stop_loss_price: plan.sl_price,
            })
            .await?;

        self.writer
            .enqueue(order_row(&position, &entry, OrderPurpose::Entry, None));

        self.track_protective(account, &position, OrderPurpose::TakeProfit, plan.tp_price, tp)
            .await;
        self.track_protective(account, &position, OrderPurpose::StopLoss, plan.sl_price, sl)
            .await;

        self.tracker.mark_executed(symbol).await;

        self.bus.publish(WsMessage::PositionUpdate(position.clone()));
        self.bus.publish(WsMessage::SignalExecuted(SignalExecuted {
            signal_id: signal.id,
            symbol: symbol.to_string(),
            position_id: Some(position.id),
            timestamp: Utc::now(),
        }));

        Ok(Some(position))
    }

    /// Prices and sizes the bracket under the symbol's filter constraints.
    async fn plan_bracket(
        &self,
        symbol: &str,
        account: &Account,
        gateway: &dyn ExchangeApi,
    ) -> Result<BracketPlan, ExecutorError> {
        let entry_price = gateway
            .get_symbol_price(symbol)
            .await
            .map_err(|e| ExecutorError::PriceUnavailable(symbol.to_string(), e.to_string()))?;
        if entry_price <= Decimal::ZERO {
            return Err(ExecutorError::PriceUnavailable(
                symbol.to_string(),
                format!("non-positive price {entry_price}"),
            ));
        }

        let info = gateway.get_exchange_info().await?;
        let rules = match info.symbol(symbol) {
            Ok(symbol_info) => symbol_info.rules()?,
            Err(ApiError::SymbolUnknown(_)) => {
                return Err(ExecutorError::SymbolUnknown(symbol.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let (tp_raw, sl_raw) = sizing::protective_prices(
            entry_price,
            account.target_percent,
            account.stoploss_percent,
            account.leverage,
        );

        Ok(BracketPlan {
            entry_price,
            quantity: sizing::conform_quantity(
                account.order_amount_usdt / entry_price,
                entry_price,
                &rules,
            ),
            tp_price: sizing::conform_price(tp_raw, &rules),
            sl_price: sizing::conform_price(sl_raw, &rules),
        })
    }

    /// Cancels whichever protective legs the exchange accepted before the
    /// entry rejection arrived. Cancel failures are logged, not propagated;
    /// reduce-only orders on a flat position cannot fill anyway.
    async fn cancel_accepted(
        &self,
        gateway: &dyn ExchangeApi,
        symbol: &str,
        accepted: &[&Result<OrderResponse, ApiError>],
    ) {
        for response in accepted.iter().filter_map(|r| r.as_ref().ok()) {
            if let Err(e) = gateway.cancel_order(symbol, response.order_id).await {
                tracing::error!(
                    %symbol,
                    order_id = response.order_id,
                    error = %e,
                    "Failed to cancel protective leg during rollback."
                );
            }
        }
    }

    /// Registers an accepted protective leg with the tracker, or records
    /// the failure. A rejected TP or SL never rolls back the entry; the
    /// position simply runs with whatever protection survived.
    async fn track_protective(
        &self,
        account: &Account,
        position: &Position,
        purpose: OrderPurpose,
        stop_price: Decimal,
        result: Result<OrderResponse, ApiError>,
    ) {
        match result {
            Ok(response) => {
                self.tracker
                    .register(
                        response.order_id,
                        PendingOrder {
                            account_id: account.id,
                            position_id: position.id,
                            symbol: position.symbol.clone(),
                            purpose,
                            quantity: position.quantity,
                            created_at: Utc::now(),
                            timeout: Duration::from_secs(
                                account.order_timeout_seconds.max(0) as u64
                            ),
                        },
                    )
                    .await;
                self.writer
                    .enqueue(order_row(position, &response, purpose, Some(stop_price)));
            }
            Err(e) => {
                tracing::error!(
                    symbol = %position.symbol,
                    purpose = %purpose,
                    error = %e,
                    "Protective order rejected; position continues with reduced protection."
                );
                self.bus.publish(WsMessage::SignalError(SignalError {
                    symbol: position.symbol.clone(),
                    message: format!("{purpose} order rejected: {e}"),
                    timestamp: Utc::now(),
                }));
            }
        }
    }
}

/// Per-execution validation of the account's trading parameters.
fn validate_account(account: &Account) -> Result<(), ExecutorError> {
    let fail = |reason: String| {
        Err(ExecutorError::AccountMisconfigured(account.id, reason))
    };
    if !(1..=125).contains(&account.leverage) {
        return fail(format!("leverage {} outside [1, 125]", account.leverage));
    }
    if account.order_amount_usdt <= Decimal::ZERO {
        return fail("order_amount_usdt must be positive".to_string());
    }
    if account.target_percent <= Decimal::ZERO {
        return fail("target_percent must be positive".to_string());
    }
    if account.stoploss_percent <= Decimal::ZERO {
        return fail("stoploss_percent must be positive".to_string());
    }
    Ok(())
}

/// Builds the store row for an accepted order acknowledgement.
fn order_row(
    position: &Position,
    response: &OrderResponse,
    purpose: OrderPurpose,
    stop_price: Option<Decimal>,
) -> NewOrder {
    use std::str::FromStr;

    NewOrder {
        position_id: position.id,
        exchange_order_id: response.order_id,
        symbol: response.symbol.clone(),
        side: OrderSide::from_str(&response.side).unwrap_or(OrderSide::Buy),
        order_type: OrderType::from_str(&response.order_type).unwrap_or(OrderType::Market),
        orig_qty: Decimal::from_str(&response.orig_qty).unwrap_or(position.quantity),
        executed_qty: Decimal::from_str(&response.executed_qty).unwrap_or(Decimal::ZERO),
        price: response.avg_price_decimal().unwrap_or(Decimal::ZERO),
        stop_price,
        status: OrderStatus::from_str(&response.status).unwrap_or(OrderStatus::New),
        purpose,
    }
}
