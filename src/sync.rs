//! Peer membership and chain reconciliation for VoteChain
//!
//! This module provides:
//! - The deduplicated peer registry
//! - Concurrent collection of peer chains
//! - Longest-valid-chain selection
//! - Fire-and-forget block announcement
//! - Sync statistics

use crate::blockchain::{verify_chain, Block, ChainStore};
use crate::network::{normalize_address, ChainResponse, PeerClient};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Known peer addresses, normalized and deduplicated. Never contains the node itself.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: BTreeSet<String>,
    /// Every address this node is known by.
    own: BTreeSet<String>,
}

impl PeerRegistry {
    pub fn new(own_address: Option<&str>) -> Self {
        Self {
            peers: BTreeSet::new(),
            own: own_address.and_then(normalize_address).into_iter().collect(),
        }
    }

    /// Record another address this node is reached under and forget it as a peer.
    pub fn add_own_alias(&mut self, address: &str) {
        if let Some(address) = normalize_address(address) {
            self.peers.remove(&address);
            self.own.insert(address);
        }
    }

    /// Record `address`. Returns true if it was not known before.
    pub fn add(&mut self, address: &str) -> bool {
        let Some(address) = normalize_address(address) else {
            return false;
        };
        if self.own.contains(&address) {
            return false;
        }
        self.peers.insert(address)
    }

    /// Record several addresses, returning how many were new.
    pub fn extend<'a, I: IntoIterator<Item = &'a str>>(&mut self, addresses: I) -> usize {
        addresses.into_iter().filter(|a| self.add(a)).count()
    }

    pub fn contains(&self, address: &str) -> bool {
        normalize_address(address).is_some_and(|a| self.peers.contains(&a))
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Sync statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    pub consensus_rounds: u64,
    pub chains_adopted: u64,
    pub peer_failures: u64,
    pub blocks_announced: u64,
    pub blocks_received: u64,
    pub blocks_discarded: u64,
}

/// Fetch every peer's chain concurrently. Unreachable or malformed peers are
/// skipped; the second value counts them.
pub async fn collect_chains(
    client: Arc<dyn PeerClient>,
    peers: Vec<String>,
) -> (Vec<(String, ChainResponse)>, u64) {
    let mut set = JoinSet::new();
    for (position, peer) in peers.into_iter().enumerate() {
        let client = client.clone();
        set.spawn(async move {
            let result = client.fetch_chain(&peer).await;
            (position, peer, result)
        });
    }

    let mut fetched = Vec::new();
    let mut failures = 0;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((position, peer, Ok(response))) => {
                debug!(%peer, length = response.chain.len(), "peer chain fetched");
                fetched.push((position, peer, response));
            }
            Ok((_, peer, Err(e))) => {
                warn!(%peer, "Skipping peer: {}", e);
                failures += 1;
            }
            Err(e) => {
                warn!("Peer fetch task failed: {}", e);
                failures += 1;
            }
        }
    }
    // Peer order decides ties, not arrival order.
    fetched.sort_by_key(|(position, _, _)| *position);
    let chains = fetched.into_iter().map(|(_, peer, response)| (peer, response)).collect();
    (chains, failures)
}

/// A peer chain that beat the local one.
#[derive(Debug, Clone)]
pub struct AdoptionCandidate {
    pub peer: String,
    pub store: ChainStore,
}

/// Pick the longest chain strictly longer than `local_len` that verifies and
/// replays onto the local genesis. Among equal lengths the earliest peer wins.
pub fn select_longest_valid(
    local_len: usize,
    candidates: Vec<(String, ChainResponse)>,
    difficulty: usize,
) -> Option<AdoptionCandidate> {
    let mut longer: Vec<_> = candidates
        .into_iter()
        .filter(|(_, response)| response.chain.len() > local_len)
        .collect();
    longer.sort_by(|a, b| b.1.chain.len().cmp(&a.1.chain.len()));

    for (peer, response) in longer {
        if let Err(e) = verify_chain(&response.chain, difficulty) {
            warn!(%peer, length = response.chain.len(), "Rejecting invalid peer chain: {}", e);
            continue;
        }
        match ChainStore::from_chain_dump(&response.chain, difficulty) {
            Ok(store) => {
                info!(%peer, length = store.len(), local_len, "Longer valid chain found");
                return Some(AdoptionCandidate { peer, store });
            }
            Err(e) => warn!(%peer, "Peer chain does not replay: {}", e),
        }
    }
    None
}

/// Offer `block` to every peer without waiting for the answers.
pub fn announce_block(client: Arc<dyn PeerClient>, peers: Vec<String>, block: Block) {
    for peer in peers {
        let client = client.clone();
        let block = block.clone();
        tokio::spawn(async move {
            match client.announce_block(&peer, &block).await {
                Ok(true) => debug!(%peer, index = block.index, "block accepted by peer"),
                Ok(false) => debug!(%peer, index = block.index, "block discarded by peer"),
                Err(e) => warn!(%peer, "Announcement failed: {}", e),
            }
        });
    }
}
