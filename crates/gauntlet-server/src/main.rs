//! Gauntlet object store server binary.

use anyhow::{Context, Result};
use gauntlet_server::{GauntletServer, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("gauntlet-server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env().context("failed to load configuration")?;
    let server = GauntletServer::new(config).context("failed to open object store")?;
    server.serve().await.context("server terminated")?;
    Ok(())
}
