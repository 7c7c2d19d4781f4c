//! fwdcast relay server entry point

use std::net::SocketAddr;

use clap::Parser;
use fwdcast_tunnel::{RelayConfig, RelayServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Public relay server for fwdcast shares
#[derive(Debug, Parser)]
#[command(name = "fwdcast-relay", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Public base URL for share links (defaults to $PUBLIC_BASE_URL,
    /// then http://{listen})
    #[arg(long)]
    public_base: Option<String>,

    /// Maximum concurrent viewers per session
    #[arg(long, default_value_t = 3)]
    max_viewers: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fwdcast_relay=info,fwdcast_tunnel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        listen: args.listen,
        public_base: args.public_base,
        max_viewers: args.max_viewers,
        ..RelayConfig::default()
    };
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    tracing::info!(listen = %config.listen, "starting fwdcast relay");

    RelayServer::new(config)
        .run_with_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
