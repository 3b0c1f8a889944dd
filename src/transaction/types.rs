/// Transaction types for VoteChain
use serde::{Deserialize, Serialize};

/// Maximum length of a voter identifier or party name, in bytes
pub const MAX_FIELD_LENGTH: usize = 256;

/// A single cast vote.
///
/// On the counting ledger `party` holds the party name; on the public ledger it
/// holds the ciphertext produced by the ballot cipher. Fields are declared in
/// the canonical hashing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub party: String,
    /// Creation time in milliseconds since the Unix epoch
    pub timestamp: u64,
    pub voter_id: String,
}

impl Transaction {
    pub fn new(voter_id: impl Into<String>, party: impl Into<String>, timestamp: u64) -> Self {
        Self {
            voter_id: voter_id.into(),
            party: party.into(),
            timestamp,
        }
    }

    /// Current wall-clock time in the unit used by transaction and block timestamps.
    pub fn now_millis() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Submission body accepted by the node API. Both fields are required.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VoteRequest {
    #[serde(default)]
    pub voter_id: Option<String>,
    #[serde(default)]
    pub party: Option<String>,
}

impl VoteRequest {
    pub fn new(voter_id: &str, party: &str) -> Self {
        Self {
            voter_id: Some(voter_id.to_string()),
            party: Some(party.to_string()),
        }
    }
}

/// A submission that passed input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vote {
    pub voter_id: String,
    pub party: String,
}
