#![forbid(unsafe_code)]
//! Runs a VoteChain node: loads both chains, serves the HTTP API and joins
//! the configured bootstrap peers.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use votechain::config::load_config;
use votechain::node::Node;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// API port (overrides network.api_port)
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding the chain files (overrides storage.data_dir)
    #[arg(long)]
    data_dir: Option<String>,
    /// Log level: error, warn, info, debug or trace
    #[arg(long)]
    log_level: Option<String>,
    /// Extra bootstrap peer, may be repeated
    #[arg(long = "peer")]
    peers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(port) = cli.port {
        config.network.api_port = port;
    }
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    if let Some(level) = cli.log_level {
        config.log.level = level;
    }
    config.network.bootstrap_peers.extend(cli.peers);
    config.validate()?;

    tracing_subscriber::fmt()
        .with_max_level(config.log.tracing_level())
        .init();

    let node = Arc::new(Node::init(config)?);
    node.start().await?;
    Ok(())
}
