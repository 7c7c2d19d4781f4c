//! fwdcast origin CLI entry point

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use fwdcast_tunnel::{Error, OriginAgent, OriginConfig, OriginObserver, TransferStats};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Share a local directory through a fwdcast relay
#[derive(Debug, Parser)]
#[command(name = "fwdcast", version, about)]
struct Args {
    /// Directory to share
    dir: PathBuf,

    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    relay: String,

    /// Share duration in minutes (1-120)
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// Protect the share with a password
    #[arg(long)]
    password: Option<String>,

    /// Exclude files by name or `*.ext` pattern (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 10)]
    retries: u32,

    /// Delay between connection attempts, in milliseconds
    #[arg(long, default_value_t = 500)]
    retry_delay_ms: u64,

    /// Largest individual file served, in bytes
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Total transfer allowance for the session, in bytes
    #[arg(long)]
    max_total_size: Option<u64>,
}

/// Prints session events for the person running the share
struct CliObserver;

impl OriginObserver for CliObserver {
    fn on_url(&self, url: &str) {
        println!("Sharing at: {url}");
        println!("Press Ctrl-C to stop.");
    }

    fn on_stats(&self, stats: TransferStats) {
        tracing::info!(
            requests = stats.requests_served,
            bytes = stats.bytes_sent,
            "transfer update"
        );
    }

    fn on_expired(&self) {
        println!("Session expired.");
    }

    fn on_disconnect(&self) {
        println!("Disconnected from relay.");
    }

    fn on_error(&self, error: &Error) {
        eprintln!("Error: {error}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fwdcast=info,fwdcast_tunnel=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let root = std::fs::canonicalize(&args.dir)
        .with_context(|| format!("share directory {} not found", args.dir.display()))?;

    let mut config = OriginConfig::new(args.relay, root)
        .with_duration(Duration::from_secs(args.duration * 60));
    if let Some(password) = args.password {
        config = config.with_password(password);
    }
    config.exclude = args.exclude;
    config.max_retries = args.retries;
    config.retry_delay = Duration::from_millis(args.retry_delay_ms);
    config.max_file_size = args.max_file_size;
    config.max_total_size = args.max_total_size;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let agent = Arc::new(OriginAgent::new(config).with_observer(Arc::new(CliObserver)));

    let canceller = Arc::clone(&agent);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nStopping share...");
            canceller.cancel();
        }
    });

    agent.run().await.context("share ended with an error")
}
