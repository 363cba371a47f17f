use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use core_types::ChatMessage;
use database::DbRepository;
use engine::Engine;
use events::EventBus;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(author, version, about = "Chat-signal to Binance futures bridge", long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading bridge together with the dashboard API.
    Run,
    /// Start the dashboard API only; no signals are consumed.
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Load configuration first to get logging settings.
    let config = configuration::load_config(&cli.config)?;
    configuration::init_tracing(&config.logging)?;
    tracing::info!("Meridian starting.");

    match cli.command {
        Commands::Run => run_bridge(config).await?,
        Commands::Serve => serve_dashboard(config).await?,
    }

    tracing::info!("Meridian stopped.");
    Ok(())
}

async fn connect_store(config: &configuration::Config) -> Result<DbRepository> {
    let pool = database::connect(&config.database.dsn).await?;
    database::run_migrations(&pool).await?;
    Ok(DbRepository::new(pool))
}

/// Starts the full bridge: engine, tracker tasks, dashboard, and the
/// signal intake channel.
async fn run_bridge(config: configuration::Config) -> Result<()> {
    let repo = connect_store(&config).await?;
    let bus = EventBus::default();

    let engine = Arc::new(Engine::new(config.clone(), repo.clone(), bus.clone()).await?);
    engine.init().await?;

    // The messaging-network client is an external collaborator: it owns the
    // Telegram session (credentials in `config.telegram`, channels from the
    // store) and pushes each chat message into this channel. The bridge
    // holds the sender open for the lifetime of the process; dropping it on
    // shutdown ends the intake loop promptly.
    let (message_tx, message_rx) = mpsc::channel::<ChatMessage>(1024);
    let intake = tokio::spawn(Arc::clone(&engine).run(message_rx));

    if config.webapi.enabled {
        let webapi = config.webapi.clone();
        let server_repo = repo.clone();
        let server_bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = web_server::run_server(&webapi, server_repo, server_bus).await {
                tracing::error!(error = %e, "Dashboard server exited.");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested.");
    drop(message_tx);
    intake.await?;
    Ok(())
}

/// Starts only the dashboard API, e.g. for inspecting a store while the
/// bridge itself is stopped.
async fn serve_dashboard(config: configuration::Config) -> Result<()> {
    let repo = connect_store(&config).await?;
    web_server::run_server(&config.webapi, repo, EventBus::default()).await
}
