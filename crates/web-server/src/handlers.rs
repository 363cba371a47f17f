use crate::{error::AppError, AppState};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use core_types::{settings_keys, Account, AccountDraft};
use database::TradeStats;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// # GET /api/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<Json<TradeStats>, AppError> {
    let stats = state.repo.trade_stats().await?;
    Ok(Json(stats))
}

/// # GET /api/positions?limit=N
pub async fn get_positions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PositionsQuery>,
) -> Result<Json<Vec<core_types::Position>>, AppError> {
    let positions = state.repo.list_positions(query.limit.clamp(1, 1000)).await?;
    Ok(Json(positions))
}

/// # GET /api/positions/open
pub async fn get_open_positions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<core_types::Position>>, AppError> {
    let positions = state.repo.list_open_positions().await?;
    Ok(Json(positions))
}

/// # GET /api/positions/:id
pub async fn get_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<core_types::Position>, AppError> {
    let position = state.repo.get_position(id).await?;
    Ok(Json(position))
}

/// # GET /api/orders/position/:id
pub async fn get_orders_for_position(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<core_types::Order>>, AppError> {
    let orders = state.repo.orders_for_position(id).await?;
    Ok(Json(orders))
}

// ==============================================================================
// Channels
//
// The persistent tables are exactly the five core ones; the channel list
// lives in the settings row `telegram.channels` as comma-separated
// identifiers, seeded from the config file on first boot.
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct ChannelDraft {
    pub identifier: String,
}

async fn read_channels(state: &AppState) -> Result<Vec<String>, AppError> {
    let raw = state
        .repo
        .get_setting(settings_keys::CHANNELS)
        .await?
        .unwrap_or_default();
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect())
}

async fn write_channels(state: &AppState, channels: &[String]) -> Result<(), AppError> {
    state
        .repo
        .set_setting(settings_keys::CHANNELS, &channels.join(","))
        .await?;
    state.bus.publish(events::WsMessage::ConfigChanged {
        keys: vec![settings_keys::CHANNELS.to_string()],
    });
    Ok(())
}

/// # GET /api/channels
pub async fn get_channels(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, AppError> {
    Ok(Json(read_channels(&state).await?))
}

/// # POST /api/channels
pub async fn add_channel(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<ChannelDraft>,
) -> Result<Json<Vec<String>>, AppError> {
    let identifier = draft.identifier.trim().to_string();
    if identifier.is_empty() {
        return Err(AppError::BadRequest("identifier must not be empty".into()));
    }
    let mut channels = read_channels(&state).await?;
    if !channels.contains(&identifier) {
        channels.push(identifier);
        write_channels(&state, &channels).await?;
    }
    Ok(Json(channels))
}

/// # DELETE /api/channels/:id
///
/// Channels have no surrogate ids; the identifier itself is the id.
pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(identifier): Path<String>,
) -> Result<Json<Vec<String>>, AppError> {
    let mut channels = read_channels(&state).await?;
    let before = channels.len();
    channels.retain(|c| c != &identifier);
    if channels.len() == before {
        return Err(AppError::NotFound(format!("channel {identifier}")));
    }
    write_channels(&state, &channels).await?;
    Ok(Json(channels))
}

// ==============================================================================
// Accounts (secrets masked on every read path)
// ==============================================================================

fn masked(account: Account) -> Account {
    account.masked()
}

/// # GET /api/accounts
pub async fn get_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Account>>, AppError> {
    let accounts = state.repo.list_accounts().await?;
    Ok(Json(accounts.into_iter().map(masked).collect()))
}

/// # POST /api/accounts
pub async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<AccountDraft>,
) -> Result<Json<Account>, AppError> {
    let account = state.repo.create_account(&draft).await?;
    state.bus.publish(events::WsMessage::AccountsChanged);
    Ok(Json(account.masked()))
}

/// # GET /api/accounts/:id
pub async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    let account = state.repo.get_account(id).await?;
    Ok(Json(account.masked()))
}

/// # PUT /api/accounts/:id
pub async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(draft): Json<AccountDraft>,
) -> Result<Json<Account>, AppError> {
    let account = state.repo.update_account(id, &draft).await?;
    state.bus.publish(events::WsMessage::AccountsChanged);
    Ok(Json(account.masked()))
}

/// # DELETE /api/accounts/:id
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<JsonValue>, AppError> {
    state.repo.delete_account(id).await?;
    state.bus.publish(events::WsMessage::AccountsChanged);
    Ok(Json(json!({ "deleted": id })))
}

/// # POST /api/accounts/:id/set-default
pub async fn set_default_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, AppError> {
    let account = state.repo.set_default_account(id).await?;
    state.bus.publish(events::WsMessage::AccountsChanged);
    Ok(Json(account.masked()))
}

// ==============================================================================
// Config (live-mutable settings rows)
// ==============================================================================

/// # GET /api/config
pub async fn get_config(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    let mut config = BTreeMap::new();
    for setting in state.repo.all_settings().await? {
        if settings_keys::MUTABLE_KEYS.contains(&setting.key.as_str()) {
            config.insert(setting.key, setting.value);
        }
    }
    Ok(Json(config))
}

/// # PUT /api/config
///
/// Accepts a flat map of settings. Unknown keys are rejected; a signal
/// pattern that does not compile never reaches the store.
pub async fn put_config(
    State(state): State<Arc<AppState>>,
    Json(updates): Json<BTreeMap<String, String>>,
) -> Result<Json<BTreeMap<String, String>>, AppError> {
    for (key, value) in &updates {
        if !settings_keys::MUTABLE_KEYS.contains(&key.as_str()) {
            return Err(AppError::BadRequest(format!("unknown setting key: {key}")));
        }
        if key == settings_keys::SIGNAL_PATTERN {
            signals::validate_pattern(value)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
        }
        if key == settings_keys::TRADING_ENABLED && value != "true" && value != "false" {
            return Err(AppError::BadRequest(
                "trading.enabled must be \"true\" or \"false\"".into(),
            ));
        }
        if key == settings_keys::ORDER_TIMEOUT {
            let seconds: i64 = value
                .parse()
                .map_err(|_| AppError::BadRequest("trading.order_timeout must be an integer".into()))?;
            if seconds < 60 {
                return Err(AppError::BadRequest(
                    "trading.order_timeout must be at least 60 seconds".into(),
                ));
            }
        }
    }

    for (key, value) in &updates {
        state.repo.set_setting(key, value).await?;
    }
    state.bus.publish(events::WsMessage::ConfigChanged {
        keys: updates.keys().cloned().collect(),
    });

    get_config(State(state)).await
}

/// The first frame a WebSocket client receives: a snapshot of stats and
/// recent positions.
#[derive(Debug, Serialize)]
pub struct InitialFrame {
    pub r#type: &'static str,
    pub stats: TradeStats,
    pub positions: Vec<core_types::Position>,
}

pub async fn initial_frame(state: &AppState) -> Result<InitialFrame, AppError> {
    Ok(InitialFrame {
        r#type: "initial",
        stats: state.repo.trade_stats().await?,
        positions: state.repo.list_positions(50).await?,
    })
}
