//! Main entry point for the Duel Hub session server
//!
//! Initializes configuration, logging and the durable store, then serves
//! the WebSocket hub with graceful shutdown handling.

use anyhow::Result;
use clap::Parser;
use duel_hub::config::AppConfig;
use duel_hub::hub::Hub;
use duel_hub::server::{self, ServerState};
use duel_hub::store::SqliteStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Duel Hub - realtime session hub for a rated 1v1 card game
#[derive(Parser)]
#[command(
    name = "duel-hub",
    version,
    about = "Realtime session hub: matchmaking, Elo resolution, signaling relay and spectate rooms",
    long_about = "Duel Hub multiplexes persistent WebSocket connections for a rated 1v1 card \
                 game: it authenticates sessions with single-device takeover, pairs players \
                 through a FIFO queue, reconciles self-reported results into Elo rating \
                 updates, and relays WebRTC signaling for matches and spectate rooms."
)]
struct Args {
    /// Listen port override (otherwise PORT, fallback 3000)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Store URL override (otherwise DATABASE_URL)
    #[arg(long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enable debug mode with verbose logging
    #[arg(short, long)]
    debug: bool,

    /// Validate configuration and exit without starting the hub
    #[arg(long)]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("🃏 Duel Hub Session Server v{}", duel_hub::VERSION);
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Listen: {}:{}", config.service.host, config.service.port);
    info!("   Store: {}", config.store.url);
    info!("   Ranking limit: {}", config.hub.ranking_limit);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
}

/// Load and merge configuration from environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::from_env()?;

    if let Some(port) = args.port {
        config.service.port = port;
    }
    if let Some(url) = &args.database_url {
        config.store.url = url.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }
    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    duel_hub::config::validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting the hub");
        return Ok(());
    }

    info!("Connecting to the store...");
    let store = match SqliteStore::connect(
        &config.store.url,
        config.store.max_connections,
        config.store_connect_timeout(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("Failed to initialize the store: {}", e);
            std::process::exit(1);
        }
    };

    let hub = Arc::new(Hub::new(config.hub.clone(), store));
    let state = ServerState::new(hub);

    let addr: SocketAddr = format!("{}:{}", config.service.host, config.service.port).parse()?;

    info!("✅ Duel Hub is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    server::serve(addr, state, async {
        wait_for_shutdown_signal().await;
        info!("🛑 Shutdown signal received, beginning graceful shutdown...");
    })
    .await?;

    info!("🛑 Duel Hub stopped");
    Ok(())
}
