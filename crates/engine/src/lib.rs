//! # Meridian Engine Crate
//!
//! The orchestrator of the trading core. It bootstraps accounts and their
//! gateway clients, owns the signal intake loop, and keeps the runtime
//! settings overlay (store over file) current.
//!
//! The messaging-network wrapper is an external collaborator: it pushes
//! `ChatMessage` values into an mpsc channel and the engine consumes the
//! receiving end. The intake loop itself never blocks on the exchange;
//! each accepted message is executed on its own task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use api_client::ClientRegistry;
use configuration::Config;
use core_types::ChatMessage;
use database::DbRepository;
use events::{EventBus, SignalError as SignalErrorEvent, WsMessage};
use executor::{OrderExecutor, OrderWriter};
use signals::SignalExtractor;
use tokio::sync::mpsc;
use tracker::OrderTracker;

pub mod error;

pub use core_types::settings_keys;
pub use error::EngineError;

/// The central orchestrator for the live trading bridge.
pub struct Engine {
    config: Config,
    repo: DbRepository,
    registry: Arc<ClientRegistry>,
    tracker: Arc<OrderTracker>,
    executor: Arc<OrderExecutor>,
    extractor: Arc<SignalExtractor>,
    bus: EventBus,
    trading_enabled: AtomicBool,
}

impl Engine {
    /// Builds the engine and its components.
    ///
    /// Settings rows are seeded from the config file first, then read back
    /// so a value changed from the dashboard on a previous run wins over
    /// the file. An unparseable signal pattern here is fatal.
    pub async fn new(
        config: Config,
        repo: DbRepository,
        bus: EventBus,
    ) -> Result<Self, EngineError> {
        seed_settings(&repo, &config).await?;

        let pattern = repo
            .get_setting(settings_keys::SIGNAL_PATTERN)
            .await?
            .unwrap_or_else(|| config.trading.signal_pattern.clone());
        let ignored = repo
            .get_setting(settings_keys::IGNORED_SYMBOLS)
            .await?
            .unwrap_or_else(|| config.trading.ignored_symbols.clone());
        let enabled = repo
            .get_setting(settings_keys::TRADING_ENABLED)
            .await?
            .map(|v| v == "true")
            .unwrap_or(config.trading.enabled);

        let extractor = Arc::new(SignalExtractor::new(&pattern, &ignored)?);
        let registry = Arc::new(ClientRegistry::new());
        let tracker = Arc::new(OrderTracker::new(
            Arc::clone(&registry),
            repo.clone(),
            bus.clone(),
        ));
        let (writer, _writer_handle) = OrderWriter::spawn(repo.clone(), bus.clone());
        let executor = Arc::new(OrderExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&tracker),
            repo.clone(),
            bus.clone(),
            writer,
            config.trading.dry_run,
        ));

        Ok(Self {
            config,
            repo,
            registry,
            tracker,
            executor,
            extractor,
            bus,
            trading_enabled: AtomicBool::new(enabled),
        })
    }

    /// Initializes the engine to a ready state: builds a gateway per active
    /// account, opens their user-data streams, and starts the long-lived
    /// maintenance tasks (sweeper, reaper, settings refresher).
    pub async fn init(self: &Arc<Self>) -> Result<(), EngineError> {
        let accounts = self.repo.list_active_accounts().await?;
        tracing::info!(count = accounts.len(), "Bootstrapping active accounts.");
        self.registry.rebuild(&accounts, &self.config.binance).await;

        for account in &accounts {
            let Some(client) = self.registry.get(account.id).await else {
                continue;
            };
            let (tx, rx) = mpsc::channel(256);
            match client.start_user_stream(tx).await {
                Ok(()) => {
                    tokio::spawn(Arc::clone(&self.tracker).ingest_loop(account.id, rx));
                }
                Err(e) => {
                    tracing::error!(account_id = account.id, error = %e,
                        "Failed to open user-data stream.");
                }
            }
        }

        tokio::spawn(Arc::clone(&self.tracker).run_sweeper());
        tokio::spawn(Arc::clone(&self.tracker).run_reaper());
        tokio::spawn(Arc::clone(self).settings_refresh_loop());

        tracing::info!("Engine initialization complete.");
        Ok(())
    }

    /// The signal intake loop. Consumes chat messages until the sender side
    /// is dropped; each message is handled on its own task so the loop
    /// returns to the channel quickly.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<ChatMessage>) {
        tracing::info!("Signal intake started.");
        while let Some(message) = rx.recv().await {
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = engine.handle_message(message).await {
                    tracing::error!(error = %e, "Signal handling failed.");
                }
            });
        }
        tracing::info!("Message channel closed; signal intake stopped.");
    }

    /// Routes one chat message through the extractor into the executor.
    pub async fn handle_message(&self, message: ChatMessage) -> Result<(), EngineError> {
        if !self.trading_enabled.load(Ordering::Relaxed) {
            tracing::debug!("Trading is disabled; dropping message.");
            return Ok(());
        }

        let Some(parsed) = self.extractor.parse(&message) else {
            return Ok(());
        };
        tracing::info!(
            symbol = %parsed.symbol,
            channel_id = message.channel_id,
            "Signal detected."
        );

        // The signal row is created as soon as the pattern matches; its
        // status then advances with the execution outcome.
        let signal = self
            .repo
            .insert_signal(
                message.message_id,
                message.channel_id,
                &parsed.symbol,
                &message.text,
            )
            .await?;

        let Some(account) = self.repo.get_default_account().await? else {
            self.repo
                .mark_signal_failed(signal.id, "no default account")
                .await?;
            self.bus.publish(WsMessage::SignalError(SignalErrorEvent {
                symbol: parsed.symbol.clone(),
                message: "no default account".to_string(),
                timestamp: chrono::Utc::now(),
            }));
            return Err(EngineError::NoDefaultAccount);
        };

        match self.executor.execute(&signal, &account).await {
            Ok(_) => {
                self.repo.mark_signal_processed(signal.id).await?;
                Ok(())
            }
            Err(e) => {
                self.repo
                    .mark_signal_failed(signal.id, &e.to_string())
                    .await?;
                self.bus.publish(WsMessage::SignalError(SignalErrorEvent {
                    symbol: parsed.symbol,
                    message: e.to_string(),
                    timestamp: chrono::Utc::now(),
                }));
                Err(e.into())
            }
        }
    }

    /// Re-reads the mutable settings and account set when the dashboard
    /// publishes a change. Runs for the process lifetime.
    async fn settings_refresh_loop(self: Arc<Self>) {
        let mut rx = self.bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(WsMessage::ConfigChanged { keys }) => {
                    tracing::info!(?keys, "Settings changed; refreshing.");
                    self.refresh_settings().await;
                }
                Ok(WsMessage::AccountsChanged) => {
                    tracing::info!("Accounts changed; rebuilding gateway registry.");
                    match self.repo.list_active_accounts().await {
                        Ok(accounts) => {
                            self.registry.rebuild(&accounts, &self.config.binance).await;
                        }
                        Err(e) => tracing::error!(error = %e, "Account reload failed."),
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Settings refresher lagged; refreshing anyway.");
                    self.refresh_settings().await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Applies the current store values to the live components. A pattern
    /// that no longer compiles keeps the previous one in effect.
    pub async fn refresh_settings(&self) {
        match self.repo.get_setting(settings_keys::TRADING_ENABLED).await {
            Ok(Some(value)) => {
                self.trading_enabled
                    .store(value == "true", Ordering::Relaxed);
            }
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Failed to read trading.enabled."),
        }

        if let Ok(Some(pattern)) = self.repo.get_setting(settings_keys::SIGNAL_PATTERN).await {
            if let Err(e) = self.extractor.update_pattern(&pattern) {
                tracing::error!(error = %e, "New signal pattern rejected; keeping previous.");
            }
        }

        if let Ok(Some(ignored)) = self.repo.get_setting(settings_keys::IGNORED_SYMBOLS).await {
            self.extractor.update_blacklist(&ignored);
        }
    }

    pub fn trading_enabled(&self) -> bool {
        self.trading_enabled.load(Ordering::Relaxed)
    }
}

/// Seeds the mutable settings rows from the config file without
/// overwriting values the dashboard already changed.
async fn seed_settings(repo: &DbRepository, config: &Config) -> Result<(), EngineError> {
    let trading = &config.trading;
    repo.seed_setting(
        settings_keys::TRADING_ENABLED,
        if trading.enabled { "true" } else { "false" },
    )
    .await?;
    repo.seed_setting(settings_keys::SIGNAL_PATTERN, &trading.signal_pattern)
        .await?;
    repo.seed_setting(settings_keys::IGNORED_SYMBOLS, &trading.ignored_symbols)
        .await?;
    repo.seed_setting(settings_keys::ORDER_TIMEOUT, &trading.order_timeout.to_string())
        .await?;
    repo.seed_setting(settings_keys::CHANNELS, &config.channels.join(","))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use configuration::{
        BinanceConfig, DatabaseConfig, LoggingConfig, TelegramConfig, TradingConfig, WebApiConfig,
    };
    use core_types::{AccountDraft, SignalStatus};
    use rust_decimal_macros::dec;
    use sqlx::sqlite::SqlitePoolOptions;

    fn test_config() -> Config {
        Config {
            telegram: TelegramConfig {
                api_id: 12345,
                api_hash: "abc123".to_string(),
                phone_number: None,
                bot_token: None,
                use_test_dc: false,
            },
            database: DatabaseConfig {
                kind: "sqlite".to_string(),
                dsn: "sqlite::memory:".to_string(),
            },
            channels: vec!["@signals".to_string()],
            binance: BinanceConfig::default(),
            trading: TradingConfig {
                enabled: true,
                leverage: 10,
                order_amount: dec!(100),
                target_percent: dec!(0.02),
                stoploss_percent: dec!(0.01),
                order_timeout: 600,
                signal_pattern: r"(?i)\$([A-Z]{2,10})\b".to_string(),
                ignored_symbols: String::new(),
                max_positions: 0,
                dry_run: false,
            },
            webapi: WebApiConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    async fn test_engine(config: Config) -> Engine {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        database::run_migrations(&pool).await.expect("migrations");
        let repo = DbRepository::new(pool);
        Engine::new(config, repo, EventBus::new(64))
            .await
            .expect("engine")
    }

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            channel_id: 42,
            message_id: 7,
            sender: "caller".to_string(),
            text: text.to_string(),
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn non_matching_message_leaves_no_trace() {
        let engine = test_engine(test_config()).await;
        engine.handle_message(message("gm folks")).await.unwrap();
        assert!(matches!(
            engine.repo.get_signal(1).await,
            Err(database::DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn disabled_trading_drops_messages() {
        let mut config = test_config();
        config.trading.enabled = false;
        let engine = test_engine(config).await;
        assert!(!engine.trading_enabled());

        engine.handle_message(message("$BTC now")).await.unwrap();
        assert!(matches!(
            engine.repo.get_signal(1).await,
            Err(database::DbError::NotFound)
        ));
    }

    #[tokio::test]
    async fn missing_default_account_fails_the_signal() {
        let engine = test_engine(test_config()).await;

        let result = engine.handle_message(message("$BTC now")).await;
        assert!(matches!(result, Err(EngineError::NoDefaultAccount)));

        let signal = engine.repo.get_signal(1).await.unwrap();
        assert_eq!(signal.status, SignalStatus::Failed);
        assert_eq!(signal.symbol, "BTCUSDT");
        assert_eq!(signal.error.as_deref(), Some("no default account"));
    }

    #[tokio::test]
    async fn dry_run_signal_is_processed_without_orders() {
        let mut config = test_config();
        config.trading.dry_run = true;
        let engine = test_engine(config).await;
        engine
            .repo
            .create_account(&AccountDraft {
                name: "main".to_string(),
                api_key: "key-0123456789abcdef".to_string(),
                api_secret: "secret-0123456789abcdef".to_string(),
                is_active: true,
                is_default: true,
                ..AccountDraft::default()
            })
            .await
            .unwrap();

        engine.handle_message(message("$BTC now")).await.unwrap();

        let signal = engine.repo.get_signal(1).await.unwrap();
        assert_eq!(signal.status, SignalStatus::Processed);
        assert!(engine.repo.list_open_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_settings_win_over_file_defaults() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        database::run_migrations(&pool).await.unwrap();
        let repo = DbRepository::new(pool);
        // The dashboard disabled trading on a previous run.
        repo.set_setting(settings_keys::TRADING_ENABLED, "false")
            .await
            .unwrap();

        let engine = Engine::new(test_config(), repo, EventBus::new(64))
            .await
            .unwrap();
        assert!(!engine.trading_enabled());
    }

    #[tokio::test]
    async fn refresh_applies_new_pattern_and_enabled_flag() {
        let engine = test_engine(test_config()).await;
        engine
            .repo
            .set_setting(settings_keys::SIGNAL_PATTERN, r"#([A-Z]{2,10})\b")
            .await
            .unwrap();
        engine
            .repo
            .set_setting(settings_keys::TRADING_ENABLED, "false")
            .await
            .unwrap();

        engine.refresh_settings().await;

        assert!(!engine.trading_enabled());
        // The new pattern matches hash-tags, not dollar-tags.
        let parsed = engine.extractor.parse(&message("#ETH breakout"));
        assert_eq!(parsed.unwrap().symbol, "ETHUSDT");
        assert!(engine.extractor.parse(&message("$ETH breakout")).is_none());
    }

    #[tokio::test]
    async fn bad_pattern_on_refresh_keeps_previous() {
        let engine = test_engine(test_config()).await;
        engine
            .repo
            .set_setting(settings_keys::SIGNAL_PATTERN, "(unclosed")
            .await
            .unwrap();

        engine.refresh_settings().await;

        assert!(engine.extractor.parse(&message("$SOL run")).is_some());
    }
}
