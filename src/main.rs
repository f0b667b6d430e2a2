//! Clash Dual Server
//!
//! Provably-fair crash and duel wagering server.
//! Configuration comes from the environment; see `ServerConfig::from_env`.

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use clash_dual::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Clash Dual Server v{}", VERSION);

    if let Err(e) = run().await {
        error!("WebSocket server error: {:#}", e);
        std::process::exit(1);
    }
}

/// `LOG_LEVEL` wins over `RUST_LOG`; both fall back to `info`.
fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();
    let addr = config.bind_addr;
    info!(
        client_seed = %config.game.client_seed,
        starting_balance = %config.game.starting_balance,
        bankroll = %config.game.initial_bankroll,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let server = GameServer::new(config);
    tokio::select! {
        result = server.run() => {
            result.with_context(|| format!("listening on {addr}"))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
            server.shutdown();
        }
    }

    Ok(())
}
