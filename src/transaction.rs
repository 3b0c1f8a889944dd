//! Vote transactions and the input checks applied before they reach a pool

pub mod types;
pub mod validation;

pub use types::*;
pub use validation::validate_vote_request;
