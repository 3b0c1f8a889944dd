//! Peer-to-peer HTTP plumbing
//!
//! Nodes talk to each other over the same JSON API the front end uses:
//! `GET /chain` to fetch a peer's public chain, `POST /add_block` to announce
//! a freshly mined block and `POST /register_node` to join a peer's network.

use crate::blockchain::Block;
use crate::error::ChainError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Body of `GET /chain` and of the `register_node` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainResponse {
    pub length: usize,
    pub chain: Vec<Block>,
    #[serde(default)]
    pub peers: Vec<String>,
}

impl ChainResponse {
    pub fn new(chain: Vec<Block>, peers: Vec<String>) -> Self {
        Self {
            length: chain.len(),
            chain,
            peers,
        }
    }
}

/// Body of `register_node` and `register_with`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub node_address: Option<String>,
}

impl RegisterRequest {
    pub fn new(address: &str) -> Self {
        Self {
            node_address: Some(address.to_string()),
        }
    }
}

/// Outbound calls a node makes to its peers.
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch the peer's public chain and peer set.
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError>;

    /// Offer a sealed block to the peer. `Ok(false)` means the peer discarded it.
    async fn announce_block(&self, peer: &str, block: &Block) -> Result<bool, ChainError>;

    /// Ask the peer to record `own_address`; the peer answers with its chain dump.
    async fn register_with(&self, peer: &str, own_address: &str) -> Result<ChainResponse, ChainError>;
}

/// Canonical form of a peer address: trimmed, without trailing slashes,
/// with an `http://` scheme when none was given. `None` for blank input.
pub fn normalize_address(address: &str) -> Option<String> {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains("://") {
        Some(trimmed.to_string())
    } else {
        Some(format!("http://{}", trimmed))
    }
}

/// [`PeerClient`] backed by a shared `reqwest` client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: reqwest::Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

fn unreachable(peer: &str, err: impl std::fmt::Display) -> ChainError {
    ChainError::UnreachablePeer {
        peer: peer.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl PeerClient for HttpPeerClient {
    async fn fetch_chain(&self, peer: &str) -> Result<ChainResponse, ChainError> {
        let url = format!("{}/chain", peer);
        debug!(%url, "fetching peer chain");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        if !response.status().is_success() {
            return Err(unreachable(peer, format!("status {}", response.status())));
        }
        response
            .json::<ChainResponse>()
            .await
            .map_err(|e| unreachable(peer, format!("malformed chain: {}", e)))
    }

    async fn announce_block(&self, peer: &str, block: &Block) -> Result<bool, ChainError> {
        let url = format!("{}/add_block", peer);
        let response = self
            .client
            .post(&url)
            .json(block)
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        Ok(response.status().is_success())
    }

    async fn register_with(&self, peer: &str, own_address: &str) -> Result<ChainResponse, ChainError> {
        let url = format!("{}/register_node", peer);
        let response = self
            .client
            .post(&url)
            .json(&RegisterRequest::new(own_address))
            .send()
            .await
            .map_err(|e| unreachable(peer, e))?;
        if !response.status().is_success() {
            return Err(unreachable(peer, format!("registration refused with status {}", response.status())));
        }
        response
            .json::<ChainResponse>()
            .await
            .map_err(|e| unreachable(peer, format!("malformed chain: {}", e)))
    }
}
