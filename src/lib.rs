//! VoteChain - a dual-ledger voting blockchain
//!
//! Every vote is recorded twice: on the public chain with the party choice
//! encrypted, and on the counting chain in clear for tallying. Both chains are
//! sealed by proof of work and replicated across a small set of cooperating
//! nodes that converge on the longest valid public chain.
//!
//! # Architecture
//!
//! ## Core Ledger
//! - [`blockchain`] - Blocks, chain stores and chain validity
//! - [`transaction`] - Vote transactions and input validation
//! - [`miner`] - Proof-of-work sealing
//! - [`ledger`] - The public/counting dual ledger and the tally
//!
//! ## Cryptography
//! - [`crypto`] - Block digests and party encryption
//!
//! ## State Management
//! - [`persistence`] - JSON file and SQLite snapshot stores
//!
//! ## Networking
//! - [`network`] - Peer wire types and HTTP client
//! - [`sync`] - Peer registry and longest-valid-chain consensus
//! - [`node`] - Node state, lifecycle and operations
//! - [`api`] - HTTP API (axum)
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Ledger
// ============================================================================
pub mod blockchain;
pub mod ledger;
pub mod miner;
pub mod transaction;

// ============================================================================
// Cryptography
// ============================================================================
pub mod crypto;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;

// ============================================================================
// Networking
// ============================================================================
pub mod api;
pub mod network;
pub mod node;
pub mod sync;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
