#![forbid(unsafe_code)]
//! Peer management for a running node: join a network, register a peer or
//! show the node's view of the network.

use clap::{Parser, Subcommand};
use colored::*;
use serde_json::Value;
use std::time::Duration;
use votechain::network::{normalize_address, ChainResponse, RegisterRequest};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address of the local node's API. On `join`, peers record the node under this
    /// address unless it has a `public_url` configured
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    node: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap the node into an existing network through `peer`
    Join { peer: String },
    /// Record `peer` in the node's peer set
    Add { peer: String },
    /// Show chain length and known peers
    Info,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let node = normalize_address(&cli.node).ok_or("Node address is empty")?;
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    match cli.command {
        Commands::Join { peer } => {
            println!("{}", format!("🔗 Joining network through {}", peer).bright_cyan());
            let response = client
                .post(format!("{}/register_with", node))
                .json(&RegisterRequest::new(&peer))
                .send()
                .await?;
            report(response).await?;
        }
        Commands::Add { peer } => {
            println!("{}", format!("➕ Registering peer {}", peer).bright_cyan());
            let response = client
                .post(format!("{}/register_node", node))
                .json(&RegisterRequest::new(&peer))
                .send()
                .await?;
            if response.status().is_success() {
                let dump: ChainResponse = response.json().await?;
                println!("{}", format!("✅ Peer recorded; node now knows {} peers", dump.peers.len()).green());
            } else {
                report(response).await?;
            }
        }
        Commands::Info => {
            let dump: ChainResponse = client.get(format!("{}/chain", node)).send().await?.json().await?;
            println!("{}", "🗳️  VoteChain node".bright_cyan().bold());
            println!("📡 Node: {}", node);
            println!("⛓️  Public chain length: {}", dump.length);
            if let Some(tip) = dump.chain.last() {
                println!("🔝 Tip: #{} {}", tip.index, tip.hash_str());
            }
            if dump.peers.is_empty() {
                println!("{}", "👥 No peers".yellow());
            } else {
                println!("👥 Peers:");
                for peer in &dump.peers {
                    println!("   {}", peer);
                }
            }
        }
    }
    Ok(())
}

async fn report(response: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    if status.is_success() {
        println!("{}", format!("✅ {}", body["message"].as_str().unwrap_or("Done")).green());
        if let Some(length) = body["length"].as_u64() {
            println!("⛓️  Public chain length: {}", length);
        }
        Ok(())
    } else {
        let reason = body["error"].as_str().unwrap_or("unknown error").to_string();
        eprintln!("{}", format!("❌ {} ({})", reason, status).red());
        Err(reason.into())
    }
}
