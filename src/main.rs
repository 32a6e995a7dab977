//! Dungeon Server
//!
//! Binds the listener from the environment-derived configuration and runs
//! until interrupted or until the world actor fails.

use tracing::info;
use tracing_subscriber::EnvFilter;

use dungeon_server::{GameServer, ServerConfig, PROTOCOL_VERSION, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from_env();
    info!("Dungeon Server v{VERSION} (protocol v{PROTOCOL_VERSION})");
    info!(
        addr = %config.bind_addr,
        tick_rate = config.tick_rate,
        max_sessions = config.max_sessions,
        seed = config.world_seed,
        "starting"
    );

    let server = GameServer::bind(config).await?;
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;
    info!("server stopped");
    Ok(())
}
