// Thin re-export module: implementation is in `blockchain/core.rs`, split into
// the chain store itself and the chain validity rules.

pub mod core;
pub use core::*;
