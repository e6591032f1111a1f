mod clock;
mod config;
mod coordinator;
mod error;
mod fallback;
mod ota;
mod render;
mod scheduler;
mod timesync;
mod ts_udp;
mod udp_rx;
mod ws_client;

use clap::Parser;
use tracing::info;

use config::{Args, NodeConfig};
use coordinator::NodeCoordinator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(args).await?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_directive.clone().into()),
        )
        .init();

    info!("LightWave fleet node v{} starting, hub at {}", env!("CARGO_PKG_VERSION"), config.hub_ws_url());

    NodeCoordinator::new(config).run().await
}
