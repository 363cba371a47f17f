//! # Meridian Web Server Crate
//!
//! The dashboard-facing HTTP and WebSocket surface: read-only views of
//! stats, positions and orders, CRUD on accounts and channels, live
//! settings mutation, and a WebSocket fan-out of the event bus.
//!
//! The server talks to the trading core only through the database and the
//! event bus; it never calls the executor or the tracker directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::HeaderValue,
    routing::{delete, get, post, put},
    Router,
};
use configuration::WebApiConfig;
use database::DbRepository;
use events::EventBus;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub mod error;
pub mod handlers;
pub mod ws;

pub use error::AppError;

/// The shared application state that all handlers can access.
pub struct AppState {
    pub repo: DbRepository,
    pub bus: EventBus,
}

/// Builds the API router. Split out from `run_server` so tests can drive
/// the routes without binding a socket.
pub fn build_router(state: Arc<AppState>, config: &WebApiConfig) -> Router {
    let cors = if config.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        .route("/api/health", get(|| async { "OK" }))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/positions", get(handlers::get_positions))
        .route("/api/positions/open", get(handlers::get_open_positions))
        .route("/api/positions/:id", get(handlers::get_position))
        .route(
            "/api/orders/position/:id",
            get(handlers::get_orders_for_position),
        )
        .route(
            "/api/channels",
            get(handlers::get_channels).post(handlers::add_channel),
        )
        .route("/api/channels/:id", delete(handlers::delete_channel))
        .route(
            "/api/accounts",
            get(handlers::get_accounts).post(handlers::create_account),
        )
        .route(
            "/api/accounts/:id",
            get(handlers::get_account)
                .put(handlers::update_account)
                .delete(handlers::delete_account),
        )
        .route(
            "/api/accounts/:id/set-default",
            post(handlers::set_default_account),
        )
        .route(
            "/api/config",
            get(handlers::get_config).put(handlers::put_config),
        )
        .route("/api/ws", get(ws::websocket_handler))
        .with_state(state)
        .layer(cors)
}

/// The main function to configure and run the web server.
pub async fn run_server(
    config: &WebApiConfig,
    repo: DbRepository,
    bus: EventBus,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState { repo, bus });
    let app = build_router(state, config);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(%addr, "Dashboard API listening.");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Json, Path, State};
    use core_types::{settings_keys, AccountDraft};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::BTreeMap;

    async fn test_state() -> Arc<AppState> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        database::run_migrations(&pool).await.expect("migrations");
        Arc::new(AppState {
            repo: DbRepository::new(pool),
            bus: EventBus::new(64),
        })
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
    async fn account_reads_mask_the_secret() {
        let state = test_state().await;
        let created = handlers::create_account(State(Arc::clone(&state)), Json(draft("main")))
            .await
            .unwrap();
        assert!(created.0.api_secret.contains("****"));

        let fetched = handlers::get_account(State(Arc::clone(&state)), Path(created.0.id))
            .await
            .unwrap();
        assert!(fetched.0.api_secret.contains("****"));
        assert_ne!(fetched.0.api_secret, "secret-0123456789abcdef");

        // The stored secret is untouched.
        let raw = state.repo.get_account(created.0.id).await.unwrap();
        assert_eq!(raw.api_secret, "secret-0123456789abcdef");
    }

    #[tokio::test]
    async fn config_rejects_unknown_keys_and_bad_patterns() {
        let state = test_state().await;

        let mut unknown = BTreeMap::new();
        unknown.insert("trading.nope".to_string(), "1".to_string());
        assert!(
            handlers::put_config(State(Arc::clone(&state)), Json(unknown))
                .await
                .is_err()
        );

        let mut bad_pattern = BTreeMap::new();
        bad_pattern.insert(
            settings_keys::SIGNAL_PATTERN.to_string(),
            "(unclosed".to_string(),
        );
        assert!(
            handlers::put_config(State(Arc::clone(&state)), Json(bad_pattern))
                .await
                .is_err()
        );

        let mut good = BTreeMap::new();
        good.insert(
            settings_keys::TRADING_ENABLED.to_string(),
            "false".to_string(),
        );
        let config = handlers::put_config(State(Arc::clone(&state)), Json(good))
            .await
            .unwrap();
        assert_eq!(
            config.0.get(settings_keys::TRADING_ENABLED).map(String::as_str),
            Some("false")
        );
    }

    #[tokio::test]
    async fn channel_crud_round_trips_through_settings() {
        let state = test_state().await;

        let channels = handlers::add_channel(
            State(Arc::clone(&state)),
            Json(handlers::ChannelDraft {
                identifier: "@alpha_calls".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(channels.0, vec!["@alpha_calls".to_string()]);

        // Adding the same channel twice is idempotent.
        let channels = handlers::add_channel(
            State(Arc::clone(&state)),
            Json(handlers::ChannelDraft {
                identifier: "@alpha_calls".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(channels.0.len(), 1);

        let channels = handlers::delete_channel(
            State(Arc::clone(&state)),
            Path("@alpha_calls".to_string()),
        )
        .await
        .unwrap();
        assert!(channels.0.is_empty());

        assert!(handlers::delete_channel(
            State(Arc::clone(&state)),
            Path("@missing".to_string())
        )
        .await
        .is_err());
    }
}
