//! Error types for VoteChain

use std::fmt;
use thiserror::Error;

/// Why a block was refused by a chain store. Refusal never mutates the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockRejection {
    BadLinkage { expected: String, found: String },
    BadIndex { expected: u64, found: u64 },
    BadProof,
    MissingHash,
    EmptyChain,
}

impl fmt::Display for BlockRejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BlockRejection::BadLinkage { expected, found } => write!(
                f,
                "previous hash mismatch (expected {}, found {})",
                expected, found
            ),
            BlockRejection::BadIndex { expected, found } => {
                write!(f, "unexpected index (expected {}, found {})", expected, found)
            }
            BlockRejection::BadProof => write!(f, "hash does not satisfy proof of work"),
            BlockRejection::MissingHash => write!(f, "block carries no hash"),
            BlockRejection::EmptyChain => write!(f, "chain has no blocks"),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Block rejected: {0}")]
    RejectedBlock(BlockRejection),
    #[error("Invalid peer address: {0:?}")]
    InvalidPeerAddress(String),
    #[error("Chain dump is tampered: {0}")]
    CorruptChainDump(String),
    #[error("Peer {peer} unreachable: {reason}")]
    UnreachablePeer { peer: String, reason: String },
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Cryptographic error: {0}")]
    Crypto(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<BlockRejection> for ChainError {
    fn from(rejection: BlockRejection) -> Self {
        ChainError::RejectedBlock(rejection)
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for ChainError {
    fn from(err: rusqlite::Error) -> Self {
        ChainError::Storage(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
