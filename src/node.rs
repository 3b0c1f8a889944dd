use crate::blockchain::{Block, ChainStore};
use crate::config::Config;
use crate::crypto::{BallotCipher, PartyCipher};
use crate::error::ChainError;
use crate::ledger::{DualLedger, Tally};
use crate::network::{normalize_address, ChainResponse, HttpPeerClient, PeerClient};
use crate::persistence::open_store;
use crate::sync::{announce_block, collect_chains, select_longest_valid, PeerRegistry, SyncStats};
use crate::transaction::{Transaction, VoteRequest};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Booting,
    Syncing,
    Ready,
}

/// Everything mutated by requests, guarded together.
pub struct NodeState {
    pub ledger: DualLedger,
    pub peers: PeerRegistry,
}

/// Result of one `mine` request.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MineSummary {
    pub mined: bool,
    pub index: Option<u64>,
    pub hash: Option<String>,
    pub chain_replaced: bool,
}

pub struct Node {
    pub config: Config,
    state: Mutex<NodeState>,
    status: RwLock<NodeStatus>,
    sync_stats: Mutex<SyncStats>,
    blocks_mined: AtomicU64,
    /// Queues mining rounds so two requests never seal the same pool.
    mining_round: tokio::sync::Mutex<()>,
    peer_client: Arc<dyn PeerClient>,
    own_address: String,
}

impl Node {
    /// Open the ledger described by `config` and wire the HTTP peer client.
    pub fn init(config: Config) -> Result<Self, ChainError> {
        info!(
            backend = ?config.storage.backend,
            data_dir = %config.storage.data_dir,
            difficulty = config.miner.difficulty,
            "Starting VoteChain node"
        );

        let public_store = open_store(config.storage.backend, &config.storage.public_chain_path())?;
        let counting_store = open_store(config.storage.backend, &config.storage.counting_chain_path())?;

        let cipher: Arc<dyn PartyCipher> = match config.ballot.key_bytes()? {
            Some(key) => Arc::new(BallotCipher::from_key_bytes(&key)?),
            None => {
                warn!(
                    "No ballot secret configured; using a random key. Public ciphertexts will be unreadable after restart"
                );
                Arc::new(BallotCipher::generate())
            }
        };

        let ledger = DualLedger::open(public_store, counting_store, cipher, config.miner.difficulty)?;
        let peer_client = Arc::new(HttpPeerClient::new(config.network.peer_timeout())?);
        Ok(Self::with_parts(config, ledger, peer_client))
    }

    /// Assemble a node from an opened ledger and any peer client.
    pub fn with_parts(config: Config, ledger: DualLedger, peer_client: Arc<dyn PeerClient>) -> Self {
        let own_address = normalize_address(&config.network.public_url())
            .unwrap_or_else(|| config.network.public_url());
        Self {
            state: Mutex::new(NodeState {
                ledger,
                peers: PeerRegistry::new(Some(&own_address)),
            }),
            status: RwLock::new(NodeStatus::Booting),
            sync_stats: Mutex::new(SyncStats::default()),
            blocks_mined: AtomicU64::new(0),
            mining_round: tokio::sync::Mutex::new(()),
            peer_client,
            own_address,
            config,
        }
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: NodeStatus) {
        *self.status.write() = status;
    }

    pub fn own_address(&self) -> &str {
        &self.own_address
    }

    pub fn blocks_mined(&self) -> u64 {
        self.blocks_mined.load(Ordering::Relaxed)
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync_stats.lock().clone()
    }

    pub fn submit(&self, request: &VoteRequest) -> Result<Transaction, ChainError> {
        let tx = self.state.lock().ledger.submit(request)?;
        info!(voter_id = %tx.voter_id, "Vote recorded");
        Ok(tx)
    }

    /// Mine both pools, then reconcile with peers and announce the new public
    /// block if the local chain stayed authoritative.
    pub async fn mine(&self) -> Result<MineSummary, ChainError> {
        let _round = self.mining_round.lock().await;

        let batch = self.state.lock().ledger.prepare_mining();
        if batch.is_empty() {
            return Ok(MineSummary::default());
        }

        let sealed = tokio::task::spawn_blocking(move || batch.seal())
            .await
            .map_err(|e| ChainError::Io(format!("Mining task failed: {}", e)))?;
        let report = self.state.lock().ledger.commit_mining(sealed)?;

        let Some(block) = report.public.or(report.counting) else {
            return Ok(MineSummary::default());
        };
        self.blocks_mined.fetch_add(1, Ordering::Relaxed);

        let mut summary = MineSummary {
            mined: true,
            index: Some(block.index),
            hash: block.hash.clone(),
            chain_replaced: false,
        };

        // The new blocks are already stored; a failed consensus round does not undo them.
        summary.chain_replaced = match self.consensus().await {
            Ok(replaced) => replaced,
            Err(e) => {
                warn!("Consensus after mining failed: {}", e);
                false
            }
        };
        if !summary.chain_replaced {
            self.announce_tip();
        }
        Ok(summary)
    }

    /// One consensus cycle over the public chain. Returns true if a peer chain was adopted.
    pub async fn consensus(&self) -> Result<bool, ChainError> {
        let (peers, local_len, difficulty) = {
            let state = self.state.lock();
            (state.peers.list(), state.ledger.public().len(), state.ledger.difficulty())
        };
        if peers.is_empty() {
            return Ok(false);
        }

        let (chains, failures) = collect_chains(self.peer_client.clone(), peers).await;
        let winner = tokio::task::spawn_blocking(move || select_longest_valid(local_len, chains, difficulty))
            .await
            .map_err(|e| ChainError::Io(format!("Chain selection task failed: {}", e)))?;

        {
            let mut stats = self.sync_stats.lock();
            stats.consensus_rounds += 1;
            stats.peer_failures += failures;
        }

        let Some(candidate) = winner else {
            return Ok(false);
        };

        let mut state = self.state.lock();
        // The local chain may have grown while peers were being queried.
        if candidate.store.len() <= state.ledger.public().len() {
            return Ok(false);
        }
        state.ledger.replace_public(candidate.store)?;
        self.sync_stats.lock().chains_adopted += 1;
        info!(peer = %candidate.peer, "Adopted longer chain from peer");
        Ok(true)
    }

    fn announce_tip(&self) {
        let (peers, block) = {
            let state = self.state.lock();
            (state.peers.list(), state.ledger.public().last_block().clone())
        };
        if peers.is_empty() {
            return;
        }
        self.sync_stats.lock().blocks_announced += peers.len() as u64;
        announce_block(self.peer_client.clone(), peers, block);
    }

    /// Record a peer and hand back this node's chain dump.
    pub fn register_node(&self, address: &str) -> Result<ChainResponse, ChainError> {
        let peer = normalize_address(address).ok_or_else(|| ChainError::InvalidPeerAddress(address.to_string()))?;
        let mut state = self.state.lock();
        if state.peers.add(&peer) {
            info!(%peer, "Peer registered");
        }
        Ok(ChainResponse::new(state.ledger.public().blocks().to_vec(), state.peers.list()))
    }

    /// Join the network through `address`: register with it, then take over its
    /// public chain and peer set.
    ///
    /// `reached_as` is the host the caller used to reach this node. It is what
    /// the peer records for us unless `public_url` is configured.
    ///
    /// The peer's chain replaces the local one whatever its length; it only has
    /// to replay cleanly onto the local genesis.
    pub async fn register_with(&self, address: &str, reached_as: Option<&str>) -> Result<usize, ChainError> {
        let peer = normalize_address(address).ok_or_else(|| ChainError::InvalidPeerAddress(address.to_string()))?;
        let advertised = self.advertised_address(reached_as);
        let response = self.peer_client.register_with(&peer, &advertised).await?;

        let difficulty = self.state.lock().ledger.difficulty();
        let chain = response.chain;
        let store = tokio::task::spawn_blocking(move || ChainStore::from_chain_dump(&chain, difficulty))
            .await
            .map_err(|e| ChainError::Io(format!("Chain replay task failed: {}", e)))??;

        let mut state = self.state.lock();
        let length = store.len();
        state.ledger.replace_public(store)?;
        state.peers.add_own_alias(&advertised);
        state.peers.add(&peer);
        let added = state.peers.extend(response.peers.iter().map(String::as_str));
        info!(%peer, %advertised, length, new_peers = added, "Joined network");
        Ok(length)
    }

    /// Address handed to a peer on join: `public_url` if configured, else the
    /// host this node was reached under, else the address derived from host and port.
    fn advertised_address(&self, reached_as: Option<&str>) -> String {
        if self.config.network.public_url.is_some() {
            return self.own_address.clone();
        }
        reached_as
            .and_then(normalize_address)
            .unwrap_or_else(|| self.own_address.clone())
    }

    /// Apply a block announced by a peer.
    pub fn receive_block(&self, block: Block) -> Result<Block, ChainError> {
        let result = self.state.lock().ledger.accept_public_block(block).cloned();
        let mut stats = self.sync_stats.lock();
        match &result {
            Ok(accepted) => {
                stats.blocks_received += 1;
                info!(index = accepted.index, "Accepted block from peer");
            }
            Err(e) => {
                stats.blocks_discarded += 1;
                warn!("Discarded announced block: {}", e);
            }
        }
        result
    }

    pub fn chain(&self) -> ChainResponse {
        let state = self.state.lock();
        ChainResponse::new(state.ledger.public().blocks().to_vec(), state.peers.list())
    }

    pub fn tally(&self) -> Tally {
        self.state.lock().ledger.tally()
    }

    pub fn pending(&self) -> Vec<Transaction> {
        self.state.lock().ledger.public().unconfirmed().to_vec()
    }

    pub fn peers(&self) -> Vec<String> {
        self.state.lock().peers.list()
    }

    pub fn chain_lengths(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.ledger.public().len(), state.ledger.counting().len())
    }

    /// Join the configured bootstrap peers. Failures are logged and skipped.
    pub async fn bootstrap(&self) {
        self.set_status(NodeStatus::Syncing);
        let peers = &self.config.network.bootstrap_peers;
        if !peers.is_empty() && self.config.network.public_url.is_none() {
            warn!(
                advertised = %self.own_address,
                "No public_url configured; bootstrap peers may not be able to reach this node"
            );
        }
        for peer in peers {
            if let Err(e) = self.register_with(peer, None).await {
                warn!(%peer, "Bootstrap failed: {}", e);
            }
        }
        self.set_status(NodeStatus::Ready);
    }

    /// Serve the API and join bootstrap peers. Runs until the server stops.
    pub async fn start(self: Arc<Self>) -> Result<(), ChainError> {
        let bind = format!("{}:{}", self.config.network.host, self.config.network.api_port);
        let listener = tokio::net::TcpListener::bind(&bind)
            .await
            .map_err(|e| ChainError::Config(format!("API address {} unavailable: {}", bind, e)))?;
        info!(%bind, public_url = %self.own_address, "API server listening");

        let node = self.clone();
        tokio::spawn(async move {
            node.bootstrap().await;
            let (public_len, counting_len) = node.chain_lengths();
            info!(public_len, counting_len, peers = node.peers().len(), "Node ready");
        });

        if let Err(e) = crate::api::run_api_server(self, listener).await {
            error!("API server failed: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
