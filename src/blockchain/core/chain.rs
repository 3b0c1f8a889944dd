use crate::blockchain::core::validation::{is_valid_proof, verify_chain};
use crate::crypto::sha256_hex;
use crate::error::{BlockRejection, ChainError};
use crate::miner::proof_of_work;
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `previous_hash` carried by the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    /// Creation time in milliseconds since the Unix epoch
    #[serde(default)]
    pub timestamp: u64,
    #[serde(default)]
    pub previous_hash: String,
    #[serde(default)]
    pub nonce: u64,
    /// Proof-of-work digest; present once the block is sealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl Block {
    /// Unsealed block with `nonce = 0`.
    pub fn new(index: u64, transactions: Vec<Transaction>, timestamp: u64, previous_hash: String) -> Self {
        Block {
            index,
            transactions,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: None,
        }
    }

    pub fn genesis() -> Self {
        Block::new(0, Vec::new(), 0, GENESIS_PREVIOUS_HASH.to_string())
    }

    /// Canonical encoding of every field except `hash`: a compact JSON object
    /// with keys in lexicographic order at every level.
    pub fn canonical_encoding(&self) -> String {
        let hashable = HashableBlock {
            index: self.index,
            nonce: self.nonce,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            transactions: &self.transactions,
        };
        // Only integers and strings; serialization cannot fail.
        serde_json::to_string(&hashable).unwrap_or_default()
    }

    /// Digest over the canonical encoding. The stored `hash` never takes part.
    pub fn compute_hash(&self) -> String {
        sha256_hex(self.canonical_encoding().as_bytes())
    }

    pub fn hash_str(&self) -> &str {
        self.hash.as_deref().unwrap_or_default()
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }
}

/// Borrowed view of a block with fields in hashing order. `Transaction`
/// already declares its fields in that order.
#[derive(Serialize)]
struct HashableBlock<'a> {
    index: u64,
    nonce: u64,
    previous_hash: &'a str,
    timestamp: u64,
    transactions: &'a [Transaction],
}

/// Serialized form of a chain store: the sealed blocks and the pending pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChainSnapshot {
    pub chain: Vec<Block>,
    #[serde(default)]
    pub unconfirmed_transactions: Vec<Transaction>,
}

/// Result of a mining attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MineOutcome {
    NothingToMine,
    Mined(Block),
}

impl MineOutcome {
    pub fn is_mined(&self) -> bool {
        matches!(self, MineOutcome::Mined(_))
    }
}

/// An unsealed block built from a prefix of the pending pool.
#[derive(Debug, Clone)]
pub struct MiningCandidate {
    pub block: Block,
    /// Number of pool entries the block consumes once committed.
    pub pool_len: usize,
}

/// Append-only sequence of sealed blocks plus the unconfirmed pool.
#[derive(Debug, Clone)]
pub struct ChainStore {
    blocks: Vec<Block>,
    unconfirmed: Vec<Transaction>,
    difficulty: usize,
}

impl ChainStore {
    /// Fresh store holding only a sealed genesis block.
    pub fn new(difficulty: usize) -> Self {
        let mut store = ChainStore {
            blocks: Vec::new(),
            unconfirmed: Vec::new(),
            difficulty,
        };
        store.create_genesis();
        store
    }

    fn create_genesis(&mut self) {
        let mut genesis = Block::genesis();
        let hash = proof_of_work(&mut genesis, self.difficulty);
        genesis.hash = Some(hash);
        self.blocks = vec![genesis];
    }

    /// Rebuild a store from persisted state. Stored hashes are kept verbatim.
    pub fn from_snapshot(snapshot: ChainSnapshot, difficulty: usize) -> Result<Self, ChainError> {
        if snapshot.chain.is_empty() {
            return Err(ChainError::Storage("Persisted chain has no blocks".to_string()));
        }
        if let Err(e) = verify_chain(&snapshot.chain, difficulty) {
            warn!("Persisted chain does not verify at difficulty {}: {}", difficulty, e);
        }
        Ok(ChainStore {
            blocks: snapshot.chain,
            unconfirmed: snapshot.unconfirmed_transactions,
            difficulty,
        })
    }

    /// Replay a chain received from a peer onto a locally generated genesis.
    ///
    /// The peer's genesis is never used; every later block must pass `add_block`.
    pub fn from_chain_dump(dump: &[Block], difficulty: usize) -> Result<Self, ChainError> {
        let mut store = ChainStore::new(difficulty);
        for block in dump.iter().skip(1) {
            let mut block = block.clone();
            let claimed = block.hash.take().ok_or_else(|| {
                ChainError::CorruptChainDump(format!("block {} carries no hash", block.index))
            })?;
            store
                .add_block(block, &claimed)
                .map_err(|rejection| ChainError::CorruptChainDump(rejection.to_string()))?;
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain: self.blocks.clone(),
            unconfirmed_transactions: self.unconfirmed.clone(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn last_block(&self) -> &Block {
        // Every constructor installs a genesis block.
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn unconfirmed(&self) -> &[Transaction] {
        &self.unconfirmed
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Queue a transaction for the next block. Duplicates are kept.
    pub fn add_transaction(&mut self, tx: Transaction) {
        self.unconfirmed.push(tx);
    }

    /// Carry pending transactions over from another store (used after a chain swap).
    pub fn extend_unconfirmed<I: IntoIterator<Item = Transaction>>(&mut self, txs: I) {
        self.unconfirmed.extend(txs);
    }

    /// Append `block` sealed with `claimed_hash` if it links to the tip and the proof holds.
    pub fn add_block(&mut self, mut block: Block, claimed_hash: &str) -> Result<(), BlockRejection> {
        let last = self.last_block();
        if block.previous_hash != last.hash_str() {
            return Err(BlockRejection::BadLinkage {
                expected: last.hash_str().to_string(),
                found: block.previous_hash,
            });
        }
        if block.index != last.index + 1 {
            return Err(BlockRejection::BadIndex {
                expected: last.index + 1,
                found: block.index,
            });
        }
        if !is_valid_proof(&block, claimed_hash, self.difficulty) {
            return Err(BlockRejection::BadProof);
        }

        block.hash = Some(claimed_hash.to_string());
        self.blocks.push(block);
        Ok(())
    }

    /// Snapshot the pool into an unsealed block on top of the current tip.
    pub fn prepare_candidate(&self) -> Option<MiningCandidate> {
        if self.unconfirmed.is_empty() {
            return None;
        }
        let last = self.last_block();
        let timestamp = Transaction::now_millis().max(last.timestamp);
        Some(MiningCandidate {
            block: Block::new(
                last.index + 1,
                self.unconfirmed.clone(),
                timestamp,
                last.hash_str().to_string(),
            ),
            pool_len: self.unconfirmed.len(),
        })
    }

    /// Append a block sealed from `prepare_candidate` and drop the pool prefix it consumed.
    pub fn commit_candidate(&mut self, block: Block, hash: &str, pool_len: usize) -> Result<&Block, BlockRejection> {
        self.add_block(block, hash)?;
        let consumed = pool_len.min(self.unconfirmed.len());
        self.unconfirmed.drain(..consumed);
        Ok(self.last_block())
    }

    /// Seal the whole pending pool into a new block.
    pub fn mine(&mut self) -> MineOutcome {
        let Some(MiningCandidate { mut block, pool_len }) = self.prepare_candidate() else {
            return MineOutcome::NothingToMine;
        };
        let hash = proof_of_work(&mut block, self.difficulty);
        match self.commit_candidate(block, &hash, pool_len) {
            Ok(mined) => MineOutcome::Mined(mined.clone()),
            Err(rejection) => {
                // Unreachable while the store is borrowed mutably for the whole search.
                warn!("Freshly mined block rejected: {}", rejection);
                MineOutcome::NothingToMine
            }
        }
    }

    /// Whether `chain` is a valid sequence at this store's difficulty.
    pub fn check_validity(&self, chain: &[Block]) -> bool {
        verify_chain(chain, self.difficulty).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::validation::meets_difficulty;

    const TEST_DIFFICULTY: usize = 2;

    fn vote(voter: &str, party: &str) -> Transaction {
        Transaction::new(voter, party, 1_700_000_000_000)
    }

    #[test]
    fn test_genesis_block() {
        let store = ChainStore::new(TEST_DIFFICULTY);
        assert_eq!(store.len(), 1);
        let genesis = &store.blocks()[0];
        assert_eq!(genesis.index, 0);
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
        assert!(meets_difficulty(genesis.hash_str(), TEST_DIFFICULTY));
        assert_eq!(genesis.hash_str(), genesis.compute_hash());
    }

    #[test]
    fn test_genesis_is_deterministic() {
        let a = ChainStore::new(TEST_DIFFICULTY);
        let b = ChainStore::new(TEST_DIFFICULTY);
        assert_eq!(a.last_block(), b.last_block());
    }

    #[test]
    fn test_canonical_encoding_ignores_hash() {
        let mut block = Block::new(3, vec![vote("V1", "Democratic Party")], 42, "00ab".to_string());
        let before = block.compute_hash();
        block.hash = Some("ffff".to_string());
        assert_eq!(block.compute_hash(), before);
        assert_eq!(
            block.canonical_encoding(),
            "{\"index\":3,\"nonce\":0,\"previous_hash\":\"00ab\",\"timestamp\":42,\"transactions\":[{\"party\":\"Democratic Party\",\"timestamp\":1700000000000,\"voter_id\":\"V1\"}]}"
        );
    }

    #[test]
    fn test_canonical_encoding_escapes_strings() {
        let block = Block::new(1, vec![vote("V\"1", "a\\b\n")], 0, "0".to_string());
        assert!(block.canonical_encoding().contains("\"voter_id\":\"V\\\"1\""));
        assert!(block.canonical_encoding().contains("\"party\":\"a\\\\b\\n\""));
    }

    #[test]
    fn test_mine_empty_pool_is_noop() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        let before = store.blocks().to_vec();
        assert_eq!(store.mine(), MineOutcome::NothingToMine);
        assert_eq!(store.blocks(), before.as_slice());
    }

    #[test]
    fn test_mine_consumes_pool_snapshot() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        let txs = vec![vote("V1", "Democratic Party"), vote("V2", "Republican Party")];
        for tx in &txs {
            store.add_transaction(tx.clone());
        }

        let MineOutcome::Mined(block) = store.mine() else {
            panic!("expected a mined block");
        };
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions, txs);
        assert_eq!(block.previous_hash, store.blocks()[0].hash_str());
        assert!(meets_difficulty(block.hash_str(), TEST_DIFFICULTY));
        assert!(store.unconfirmed().is_empty());
        assert!(store.check_validity(store.blocks()));
    }

    #[test]
    fn test_duplicate_transactions_are_kept() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        store.add_transaction(vote("V1", "Democratic Party"));
        store.add_transaction(vote("V1", "Democratic Party"));
        assert_eq!(store.unconfirmed().len(), 2);
    }

    #[test]
    fn test_add_block_rejects_bad_linkage() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        let mut block = Block::new(1, vec![vote("V1", "X")], 5, "not-the-tip".to_string());
        let hash = proof_of_work(&mut block, TEST_DIFFICULTY);

        let result = store.add_block(block, &hash);
        assert!(matches!(result, Err(BlockRejection::BadLinkage { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_bad_proof() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        let tip = store.last_block().hash_str().to_string();
        let mut block = Block::new(1, vec![vote("V1", "X")], 5, tip);
        let _ = proof_of_work(&mut block, TEST_DIFFICULTY);

        assert_eq!(store.add_block(block.clone(), "00deadbeef"), Err(BlockRejection::BadProof));
        // Right digest for a different nonce is also refused.
        let mut other = block.clone();
        other.nonce += 1;
        assert_eq!(store.add_block(other, &block.compute_hash()), Err(BlockRejection::BadProof));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_add_block_rejects_bad_index() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        let tip = store.last_block().hash_str().to_string();
        let mut block = Block::new(7, vec![vote("V1", "X")], 5, tip);
        let hash = proof_of_work(&mut block, TEST_DIFFICULTY);
        assert_eq!(
            store.add_block(block, &hash),
            Err(BlockRejection::BadIndex { expected: 1, found: 7 })
        );
    }

    #[test]
    fn test_commit_keeps_transactions_added_during_search() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        store.add_transaction(vote("V1", "A"));
        let MiningCandidate { mut block, pool_len } = store.prepare_candidate().unwrap();
        store.add_transaction(vote("V2", "B"));

        let hash = proof_of_work(&mut block, TEST_DIFFICULTY);
        store.commit_candidate(block, &hash, pool_len).unwrap();
        assert_eq!(store.unconfirmed(), &[vote("V2", "B")]);
        assert_eq!(store.last_block().transactions, vec![vote("V1", "A")]);
    }

    #[test]
    fn test_stale_candidate_is_rejected_and_pool_kept() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        store.add_transaction(vote("V1", "A"));
        let MiningCandidate { mut block, pool_len } = store.prepare_candidate().unwrap();
        assert!(store.mine().is_mined());
        store.add_transaction(vote("V2", "B"));

        let hash = proof_of_work(&mut block, TEST_DIFFICULTY);
        assert!(store.commit_candidate(block, &hash, pool_len).is_err());
        assert_eq!(store.len(), 2);
        assert_eq!(store.unconfirmed().len(), 1);
    }

    #[test]
    fn test_chain_dump_replay() {
        let mut source = ChainStore::new(TEST_DIFFICULTY);
        source.add_transaction(vote("V1", "A"));
        source.mine();
        source.add_transaction(vote("V2", "B"));
        source.mine();

        let replica = ChainStore::from_chain_dump(source.blocks(), TEST_DIFFICULTY).unwrap();
        assert_eq!(replica.blocks(), source.blocks());
        assert!(replica.unconfirmed().is_empty());
    }

    #[test]
    fn test_tampered_chain_dump_is_refused() {
        let mut source = ChainStore::new(TEST_DIFFICULTY);
        source.add_transaction(vote("V1", "A"));
        source.mine();

        let mut dump = source.blocks().to_vec();
        dump[1].transactions[0].party = "B".to_string();
        let err = ChainStore::from_chain_dump(&dump, TEST_DIFFICULTY).unwrap_err();
        assert!(matches!(err, ChainError::CorruptChainDump(_)));
    }

    #[test]
    fn test_snapshot_restores_verbatim() {
        let mut store = ChainStore::new(TEST_DIFFICULTY);
        store.add_transaction(vote("V1", "A"));
        store.mine();
        store.add_transaction(vote("V2", "B"));

        let snapshot = store.snapshot();
        let restored = ChainStore::from_snapshot(snapshot.clone(), TEST_DIFFICULTY).unwrap();
        assert_eq!(restored.snapshot(), snapshot);
    }

    #[test]
    fn test_empty_snapshot_is_refused() {
        assert!(ChainStore::from_snapshot(ChainSnapshot::default(), TEST_DIFFICULTY).is_err());
    }
}
