//! Proof-of-work sealing
//!
//! The search is sequential from nonce 0, so the same block content always
//! seals to the same nonce. It is CPU-bound and has no cancellation; callers
//! running inside the async runtime should move it onto a blocking thread.

use crate::blockchain::{meets_difficulty, Block, MiningCandidate};
use std::time::Instant;
use tracing::debug;

/// Find the first nonce whose block digest satisfies `difficulty`.
///
/// Sets `block.nonce` and returns the matching digest. `block.hash` is left untouched.
pub fn proof_of_work(block: &mut Block, difficulty: usize) -> String {
    let started = Instant::now();
    block.nonce = 0;
    let mut computed_hash = block.compute_hash();
    while !meets_difficulty(&computed_hash, difficulty) {
        block.nonce += 1;
        computed_hash = block.compute_hash();
    }
    debug!(
        index = block.index,
        nonce = block.nonce,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "block sealed"
    );
    computed_hash
}

/// A candidate after proof-of-work, ready to be committed to its store.
#[derive(Debug, Clone)]
pub struct SealedCandidate {
    pub block: Block,
    pub hash: String,
    pub pool_len: usize,
}

/// Seal a candidate produced by `ChainStore::prepare_candidate`.
pub fn seal_candidate(candidate: MiningCandidate, difficulty: usize) -> SealedCandidate {
    let MiningCandidate { mut block, pool_len } = candidate;
    let hash = proof_of_work(&mut block, difficulty);
    SealedCandidate { block, hash, pool_len }
}
