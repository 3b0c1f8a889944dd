//! Dual-ledger coordinator
//!
//! Keeps the public chain (party encrypted) and the counting chain (party in
//! clear) structurally parallel: every vote lands in both pools with the same
//! voter and timestamp, and every mining round seals both pools.
//!
//! Mutations are applied to copies of the stores, persisted, and only then
//! installed, so a failed write leaves memory and disk as they were.

use crate::blockchain::{Block, ChainStore, MiningCandidate};
use crate::crypto::PartyCipher;
use crate::error::{BlockRejection, ChainError};
use crate::miner::{seal_candidate, SealedCandidate};
use crate::persistence::Persistence;
use crate::transaction::{validate_vote_request, Transaction, VoteRequest};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Votes per party, ordered by party name.
pub type Tally = BTreeMap<String, u64>;

/// Candidates snapshotted from both pools.
#[derive(Debug, Clone, Default)]
pub struct MiningBatch {
    pub public: Option<MiningCandidate>,
    pub counting: Option<MiningCandidate>,
    pub difficulty: usize,
}

impl MiningBatch {
    pub fn is_empty(&self) -> bool {
        self.public.is_none() && self.counting.is_none()
    }

    /// Run proof-of-work on each candidate independently.
    pub fn seal(self) -> SealedBatch {
        let difficulty = self.difficulty;
        SealedBatch {
            public: self.public.map(|c| seal_candidate(c, difficulty)),
            counting: self.counting.map(|c| seal_candidate(c, difficulty)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SealedBatch {
    pub public: Option<SealedCandidate>,
    pub counting: Option<SealedCandidate>,
}

/// Blocks appended by one mining round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MineReport {
    pub public: Option<Block>,
    pub counting: Option<Block>,
}

impl MineReport {
    /// True when neither chain grew.
    pub fn nothing_mined(&self) -> bool {
        self.public.is_none() && self.counting.is_none()
    }
}

pub struct DualLedger {
    public: ChainStore,
    counting: ChainStore,
    public_store: Box<dyn Persistence>,
    counting_store: Box<dyn Persistence>,
    cipher: Arc<dyn PartyCipher>,
}

impl DualLedger {
    /// Load both chains from storage, creating and saving genesis-only chains where nothing is stored.
    pub fn open(
        public_store: Box<dyn Persistence>,
        counting_store: Box<dyn Persistence>,
        cipher: Arc<dyn PartyCipher>,
        difficulty: usize,
    ) -> Result<Self, ChainError> {
        let public = load_or_create(public_store.as_ref(), difficulty)?;
        let counting = load_or_create(counting_store.as_ref(), difficulty)?;

        if public.unconfirmed().len() != counting.unconfirmed().len() {
            warn!(
                public = public.unconfirmed().len(),
                counting = counting.unconfirmed().len(),
                "Pending pools are out of step; an earlier write was interrupted"
            );
        }

        info!(
            public_len = public.len(),
            counting_len = counting.len(),
            public = %public_store.describe(),
            counting = %counting_store.describe(),
            "Ledger opened"
        );

        Ok(DualLedger {
            public,
            counting,
            public_store,
            counting_store,
            cipher,
        })
    }

    pub fn public(&self) -> &ChainStore {
        &self.public
    }

    pub fn counting(&self) -> &ChainStore {
        &self.counting
    }

    pub fn cipher(&self) -> &Arc<dyn PartyCipher> {
        &self.cipher
    }

    pub fn difficulty(&self) -> usize {
        self.public.difficulty()
    }

    /// Record a vote in both pools and persist both chains before returning.
    ///
    /// Returns the plaintext (counting) transaction.
    pub fn submit(&mut self, request: &VoteRequest) -> Result<Transaction, ChainError> {
        let vote = validate_vote_request(request)?;
        let timestamp = Transaction::now_millis();
        let ciphertext = self.cipher.encrypt(&vote.party)?;

        let counting_tx = Transaction::new(vote.voter_id.clone(), vote.party, timestamp);
        let public_tx = Transaction::new(vote.voter_id, ciphertext, timestamp);

        let mut public = self.public.clone();
        let mut counting = self.counting.clone();
        public.add_transaction(public_tx);
        counting.add_transaction(counting_tx.clone());

        self.install_both(public, counting)?;
        Ok(counting_tx)
    }

    /// Snapshot both pools. Cheap; meant to run under the node lock.
    pub fn prepare_mining(&self) -> MiningBatch {
        MiningBatch {
            public: self.public.prepare_candidate(),
            counting: self.counting.prepare_candidate(),
            difficulty: self.difficulty(),
        }
    }

    /// Append sealed candidates and persist. A candidate whose chain moved on
    /// during the search is discarded and its transactions stay pending.
    pub fn commit_mining(&mut self, sealed: SealedBatch) -> Result<MineReport, ChainError> {
        let mut public = self.public.clone();
        let mut counting = self.counting.clone();
        let report = MineReport {
            public: sealed.public.and_then(|c| commit_one("public", &mut public, c)),
            counting: sealed.counting.and_then(|c| commit_one("counting", &mut counting, c)),
        };

        if report.nothing_mined() {
            return Ok(report);
        }
        self.install_both(public, counting)?;
        Ok(report)
    }

    /// Mine both pools in place. Holds `&mut self` for the whole search.
    pub fn mine_all(&mut self) -> Result<MineReport, ChainError> {
        let batch = self.prepare_mining();
        if batch.is_empty() {
            return Ok(MineReport::default());
        }
        self.commit_mining(batch.seal())
    }

    /// Votes per party over every confirmed block of the counting chain.
    pub fn tally(&self) -> Tally {
        tally_blocks(self.counting.blocks())
    }

    /// Swap in a public chain obtained from a peer. Locally pending public
    /// transactions carry over so the pools stay in step with the counting chain.
    pub fn replace_public(&mut self, mut replacement: ChainStore) -> Result<(), ChainError> {
        replacement.extend_unconfirmed(self.public.unconfirmed().iter().cloned());
        self.public_store.save(&replacement.snapshot())?;
        info!(
            old_len = self.public.len(),
            new_len = replacement.len(),
            "Public chain replaced"
        );
        self.public = replacement;
        Ok(())
    }

    /// Apply a block announced by a peer to the public chain.
    pub fn accept_public_block(&mut self, mut block: Block) -> Result<&Block, ChainError> {
        let claimed = block
            .hash
            .take()
            .ok_or(ChainError::RejectedBlock(BlockRejection::MissingHash))?;

        let mut public = self.public.clone();
        public.add_block(block, &claimed)?;
        self.public_store.save(&public.snapshot())?;
        self.public = public;
        Ok(self.public.last_block())
    }

    fn install_both(&mut self, public: ChainStore, counting: ChainStore) -> Result<(), ChainError> {
        self.public_store.save(&public.snapshot())?;
        if let Err(e) = self.counting_store.save(&counting.snapshot()) {
            if let Err(restore) = self.public_store.save(&self.public.snapshot()) {
                warn!("Failed to restore public chain after counting write error: {}", restore);
            }
            return Err(e);
        }
        self.public = public;
        self.counting = counting;
        Ok(())
    }
}

/// Count confirmed votes per party. Blank parties are skipped.
pub fn tally_blocks(blocks: &[Block]) -> Tally {
    let mut counts = Tally::new();
    for tx in blocks.iter().flat_map(|b| &b.transactions) {
        let party = tx.party.trim();
        if party.is_empty() {
            continue;
        }
        *counts.entry(party.to_string()).or_insert(0) += 1;
    }
    counts
}

fn load_or_create(store: &dyn Persistence, difficulty: usize) -> Result<ChainStore, ChainError> {
    match store.load()? {
        Some(snapshot) => ChainStore::from_snapshot(snapshot, difficulty),
        None => {
            let chain = ChainStore::new(difficulty);
            store.save(&chain.snapshot())?;
            info!(store = %store.describe(), "Created genesis block");
            Ok(chain)
        }
    }
}

fn commit_one(label: &str, store: &mut ChainStore, sealed: SealedCandidate) -> Option<Block> {
    match store.commit_candidate(sealed.block, &sealed.hash, sealed.pool_len) {
        Ok(block) => {
            info!(chain = label, index = block.index, hash = %block.hash_str(), "Block mined");
            Some(block.clone())
        }
        Err(rejection) => {
            warn!(chain = label, "Mined block discarded: {}", rejection);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BallotCipher;
    use crate::persistence::InMemoryPersistence;

    struct Fixture {
        ledger: DualLedger,
        public_store: InMemoryPersistence,
        counting_store: InMemoryPersistence,
    }

    fn fixture() -> Fixture {
        let public_store = InMemoryPersistence::new();
        let counting_store = InMemoryPersistence::new();
        let cipher = Arc::new(BallotCipher::from_key_bytes(&[9u8; 32]).unwrap());
        let ledger = DualLedger::open(
            Box::new(public_store.clone()),
            Box::new(counting_store.clone()),
            cipher,
            2,
        )
        .unwrap();
        Fixture {
            ledger,
            public_store,
            counting_store,
        }
    }

    #[test]
    fn test_open_persists_genesis() {
        let f = fixture();
        assert_eq!(f.public_store.stored().unwrap().chain.len(), 1);
        assert_eq!(f.counting_store.stored().unwrap().chain.len(), 1);
    }

    #[test]
    fn test_submit_adds_to_both_pools_and_persists() {
        let mut f = fixture();
        let tx = f
            .ledger
            .submit(&VoteRequest::new("VOID001", "Democratic Party"))
            .unwrap();

        let public_tx = &f.ledger.public().unconfirmed()[0];
        let counting_tx = &f.ledger.counting().unconfirmed()[0];
        assert_eq!(counting_tx, &tx);
        assert_eq!(public_tx.voter_id, "VOID001");
        assert_eq!(public_tx.timestamp, counting_tx.timestamp);
        assert_ne!(public_tx.party, "Democratic Party");
        assert_eq!(f.ledger.cipher().decrypt(&public_tx.party).unwrap(), "Democratic Party");

        assert_eq!(f.public_store.stored().unwrap().unconfirmed_transactions.len(), 1);
        assert_eq!(f.counting_store.stored().unwrap().unconfirmed_transactions.len(), 1);
    }

    #[test]
    fn test_invalid_submission_touches_nothing() {
        let mut f = fixture();
        let err = f.ledger.submit(&VoteRequest::default()).unwrap_err();
        assert!(matches!(err, ChainError::InvalidTransaction(_)));
        assert!(f.ledger.public().unconfirmed().is_empty());
        assert!(f.ledger.counting().unconfirmed().is_empty());
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let mut f = fixture();
        f.counting_store.set_fail_writes(true);

        let err = f.ledger.submit(&VoteRequest::new("VOID001", "Democratic Party"));
        assert!(matches!(err, Err(ChainError::Storage(_))));
        assert!(f.ledger.public().unconfirmed().is_empty());
        assert!(f.ledger.counting().unconfirmed().is_empty());
        // Public file was restored to its previous content.
        assert!(f.public_store.stored().unwrap().unconfirmed_transactions.is_empty());
    }

    fn submit_votes(f: &mut Fixture, votes: &[(&str, &str)]) {
        for (voter, party) in votes {
            f.ledger.submit(&VoteRequest::new(voter, party)).unwrap();
        }
    }

    #[test]
    fn test_failed_mine_write_keeps_chains_and_pools() {
        let mut f = fixture();
        submit_votes(&mut f, &[("V1", "Democratic Party"), ("V2", "Republican Party")]);
        let stored_before = f.public_store.stored().unwrap();

        f.public_store.set_fail_writes(true);
        assert!(matches!(f.ledger.mine_all(), Err(ChainError::Storage(_))));
        assert_eq!(f.ledger.public().len(), 1);
        assert_eq!(f.ledger.counting().len(), 1);
        assert_eq!(f.ledger.public().unconfirmed().len(), 2);
        assert_eq!(f.ledger.counting().unconfirmed().len(), 2);
        assert_eq!(f.public_store.stored().unwrap(), stored_before);

        f.public_store.set_fail_writes(false);
        f.counting_store.set_fail_writes(true);
        assert!(matches!(f.ledger.mine_all(), Err(ChainError::Storage(_))));
        assert_eq!(f.ledger.public().len(), 1);
        assert_eq!(f.ledger.counting().unconfirmed().len(), 2);
        // Public snapshot written before the counting failure is rolled back.
        assert_eq!(f.public_store.stored().unwrap(), stored_before);
    }

    #[test]
    fn test_failed_commit_can_be_retried() {
        let mut f = fixture();
        submit_votes(&mut f, &[("V1", "Green")]);
        let sealed = f.ledger.prepare_mining().seal();

        f.counting_store.set_fail_writes(true);
        assert!(f.ledger.commit_mining(sealed.clone()).is_err());
        assert_eq!((f.ledger.public().len(), f.ledger.counting().len()), (1, 1));
        assert_eq!(f.ledger.counting().unconfirmed().len(), 1);

        f.counting_store.set_fail_writes(false);
        let report = f.ledger.commit_mining(sealed).unwrap();
        assert!(report.public.is_some() && report.counting.is_some());
        assert_eq!((f.ledger.public().len(), f.ledger.counting().len()), (2, 2));
        assert_eq!(f.ledger.tally().get("Green"), Some(&1));
    }

    #[test]
    fn test_failed_replace_keeps_public_chain() {
        let mut f = fixture();
        submit_votes(&mut f, &[("V1", "Democratic Party")]);
        let mut peer = ChainStore::new(2);
        peer.add_transaction(Transaction::new("P1", "cipher", 3));
        peer.mine();
        let replacement = ChainStore::from_chain_dump(peer.blocks(), 2).unwrap();
        let stored_before = f.public_store.stored().unwrap();

        f.public_store.set_fail_writes(true);
        assert!(matches!(
            f.ledger.replace_public(replacement),
            Err(ChainError::Storage(_))
        ));
        assert_eq!(f.ledger.public().len(), 1);
        assert_eq!(f.ledger.public().unconfirmed().len(), 1);
        assert_eq!(f.public_store.stored().unwrap(), stored_before);
    }

    #[test]
    fn test_failed_accept_keeps_public_chain() {
        let mut f = fixture();
        let mut peer = ChainStore::new(2);
        peer.add_transaction(Transaction::new("V7", "cipher", 3));
        peer.mine();
        let block = peer.last_block().clone();
        let stored_before = f.public_store.stored().unwrap();

        f.public_store.set_fail_writes(true);
        assert!(matches!(
            f.ledger.accept_public_block(block.clone()),
            Err(ChainError::Storage(_))
        ));
        assert_eq!(f.ledger.public().len(), 1);
        assert_eq!(f.public_store.stored().unwrap(), stored_before);

        f.public_store.set_fail_writes(false);
        assert_eq!(f.ledger.accept_public_block(block.clone()).unwrap(), &block);
    }

    #[test]
    fn test_tally_example() {
        let mut f = fixture();
        for (voter, party) in [
            ("V1", "Democratic Party"),
            ("V2", "Republican Party"),
            ("V3", "Democratic Party"),
        ] {
            f.ledger.submit(&VoteRequest::new(voter, party)).unwrap();
        }
        let report = f.ledger.mine_all().unwrap();
        assert!(!report.nothing_mined());

        let tally = f.ledger.tally();
        assert_eq!(tally.get("Democratic Party"), Some(&2));
        assert_eq!(tally.get("Republican Party"), Some(&1));
        assert_eq!(tally.len(), 2);

        let public_block = report.public.unwrap();
        let counting_block = report.counting.unwrap();
        assert_eq!(public_block.index, counting_block.index);
        assert_eq!(public_block.transactions.len(), 3);
        for (public_tx, counting_tx) in public_block.transactions.iter().zip(&counting_block.transactions) {
            assert_eq!(public_tx.voter_id, counting_tx.voter_id);
            assert_ne!(public_tx.party, counting_tx.party);
            assert_eq!(f.ledger.cipher().decrypt(&public_tx.party).unwrap(), counting_tx.party);
        }
        assert!(f.ledger.public().unconfirmed().is_empty());
        assert!(f.ledger.counting().unconfirmed().is_empty());
    }

    #[test]
    fn test_tally_skips_blank_parties() {
        let mut block = Block::genesis();
        block.transactions = vec![
            Transaction::new("V1", "Green", 1),
            Transaction::new("V2", "  ", 2),
            Transaction::new("V3", "Green", 3),
        ];
        let tally = tally_blocks(&[block]);
        assert_eq!(tally.len(), 1);
        assert_eq!(tally["Green"], 2);
    }

    #[test]
    fn test_mine_with_empty_pools_reports_nothing() {
        let mut f = fixture();
        let report = f.ledger.mine_all().unwrap();
        assert!(report.nothing_mined());
        assert_eq!(f.ledger.public().len(), 1);
    }

    #[test]
    fn test_reopen_restores_both_chains() {
        let mut f = fixture();
        f.ledger.submit(&VoteRequest::new("V1", "Socialist party")).unwrap();
        f.ledger.mine_all().unwrap();
        f.ledger.submit(&VoteRequest::new("V2", "Democratic Party")).unwrap();

        let reopened = DualLedger::open(
            Box::new(f.public_store.clone()),
            Box::new(f.counting_store.clone()),
            f.ledger.cipher().clone(),
            2,
        )
        .unwrap();
        assert_eq!(reopened.public().snapshot(), f.ledger.public().snapshot());
        assert_eq!(reopened.counting().snapshot(), f.ledger.counting().snapshot());
        assert_eq!(reopened.tally().get("Socialist party"), Some(&1));
    }

    #[test]
    fn test_accept_public_block_leaves_counting_alone() {
        let mut f = fixture();
        let mut peer = ChainStore::new(2);
        peer.add_transaction(Transaction::new("V7", "cipher", 3));
        peer.mine();

        let block = peer.last_block().clone();
        f.ledger.accept_public_block(block.clone()).unwrap();
        assert_eq!(f.ledger.public().last_block(), &block);
        assert_eq!(f.ledger.counting().len(), 1);

        // Replaying the same block no longer links.
        assert!(matches!(
            f.ledger.accept_public_block(block),
            Err(ChainError::RejectedBlock(_))
        ));
    }

    #[test]
    fn test_replace_public_keeps_pending() {
        let mut f = fixture();
        f.ledger.submit(&VoteRequest::new("V1", "Democratic Party")).unwrap();

        let mut peer = ChainStore::new(2);
        peer.add_transaction(Transaction::new("P1", "cipher", 3));
        peer.mine();
        let replacement = ChainStore::from_chain_dump(peer.blocks(), 2).unwrap();

        f.ledger.replace_public(replacement).unwrap();
        assert_eq!(f.ledger.public().len(), 2);
        assert_eq!(f.ledger.public().unconfirmed().len(), 1);
        assert_eq!(f.public_store.stored().unwrap().chain.len(), 2);
    }
}
