//! Bounty Market Server
//!
//! Serves the marketplace over HTTP, backed by SQLite

use std::path::PathBuf;

use bounty_market::Config;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bounty-server")]
#[command(about = "Bounty marketplace server")]
#[command(version)]
struct Args {
    /// Configuration file (embedded defaults when missing)
    #[arg(short, long, env = "BOUNTY_CONFIG", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load_from(&args.config)?;

    info!("Starting Bounty Market Server");
    bounty_market::server::serve(&config).await
}
