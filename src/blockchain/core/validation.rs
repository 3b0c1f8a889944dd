use crate::blockchain::core::chain::{Block, GENESIS_PREVIOUS_HASH};
use crate::error::BlockRejection;
use std::fmt;

/// Difficulty predicate: `hash` starts with `difficulty` zero hex digits.
pub fn meets_difficulty(hash: &str, difficulty: usize) -> bool {
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// `claimed_hash` satisfies the difficulty predicate and is the digest of `block`.
pub fn is_valid_proof(block: &Block, claimed_hash: &str, difficulty: usize) -> bool {
    meets_difficulty(claimed_hash, difficulty) && block.compute_hash() == claimed_hash
}

/// First failure found while walking a candidate chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidChain {
    pub position: usize,
    pub reason: BlockRejection,
}

impl fmt::Display for InvalidChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "block at position {}: {}", self.position, self.reason)
    }
}

/// Walk `chain` from genesis, checking index, proof and linkage of every block.
///
/// The running previous-hash starts at `"0"`, so the first block must be a
/// genesis block. An empty sequence is invalid.
pub fn verify_chain(chain: &[Block], difficulty: usize) -> Result<(), InvalidChain> {
    if chain.is_empty() {
        return Err(InvalidChain {
            position: 0,
            reason: BlockRejection::EmptyChain,
        });
    }

    let mut previous_hash = GENESIS_PREVIOUS_HASH;
    for (position, block) in chain.iter().enumerate() {
        let fail = |reason| Err(InvalidChain { position, reason });

        let Some(claimed) = block.hash.as_deref() else {
            return fail(BlockRejection::MissingHash);
        };
        if block.index != position as u64 {
            return fail(BlockRejection::BadIndex {
                expected: position as u64,
                found: block.index,
            });
        }
        if !is_valid_proof(block, claimed, difficulty) {
            return fail(BlockRejection::BadProof);
        }
        if block.previous_hash != previous_hash {
            return fail(BlockRejection::BadLinkage {
                expected: previous_hash.to_string(),
                found: block.previous_hash.clone(),
            });
        }
        previous_hash = claimed;
    }
    Ok(())
}

/// Boolean form of [`verify_chain`].
pub fn check_validity(chain: &[Block], difficulty: usize) -> bool {
    verify_chain(chain, difficulty).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::core::chain::ChainStore;
    use crate::transaction::Transaction;

    fn mined_chain(blocks: usize) -> Vec<Block> {
        let mut store = ChainStore::new(2);
        for i in 0..blocks {
            store.add_transaction(Transaction::new(format!("V{}", i), "Democratic Party", i as u64));
            store.mine();
        }
        store.blocks().to_vec()
    }

    #[test]
    fn test_meets_difficulty() {
        assert!(meets_difficulty("00ab", 2));
        assert!(!meets_difficulty("0ab0", 2));
        assert!(!meets_difficulty("0", 2));
        assert!(meets_difficulty("abc", 0));
    }

    #[test]
    fn test_valid_chain() {
        let chain = mined_chain(3);
        assert!(check_validity(&chain, 2));
        for pair in chain.windows(2) {
            assert_eq!(pair[1].previous_hash, pair[0].hash_str());
        }
    }

    #[test]
    fn test_broken_linkage_detected() {
        let mut chain = mined_chain(2);
        // Re-seal block 2 on top of a bogus predecessor so its own proof still holds.
        chain[2].previous_hash = "00ffff".to_string();
        let hash = crate::miner::proof_of_work(&mut chain[2], 2);
        chain[2].hash = Some(hash);

        let err = verify_chain(&chain, 2).unwrap_err();
        assert_eq!(err.position, 2);
        assert!(matches!(err.reason, BlockRejection::BadLinkage { .. }));
    }

    #[test]
    fn test_tampered_transaction_detected() {
        let mut chain = mined_chain(2);
        chain[1].transactions[0].party = "Republican Party".to_string();
        let err = verify_chain(&chain, 2).unwrap_err();
        assert_eq!(err.position, 1);
        assert_eq!(err.reason, BlockRejection::BadProof);
    }

    #[test]
    fn test_missing_hash_detected() {
        let mut chain = mined_chain(1);
        chain[1].hash = None;
        assert_eq!(verify_chain(&chain, 2).unwrap_err().reason, BlockRejection::MissingHash);
    }

    #[test]
    fn test_chain_must_start_at_genesis() {
        let chain = mined_chain(2);
        assert!(!check_validity(&chain[1..], 2));
    }

    #[test]
    fn test_empty_chain_reported_as_empty() {
        let err = verify_chain(&[], 2).unwrap_err();
        assert_eq!(err.position, 0);
        assert_eq!(err.reason, BlockRejection::EmptyChain);
        assert_eq!(err.to_string(), "block at position 0: chain has no blocks");
    }
}
