/// Validation logic for vote submissions, separated from type definitions
use crate::error::ChainError;
use crate::transaction::types::{Vote, VoteRequest, MAX_FIELD_LENGTH};

/// Checks that both required fields are present and non-blank. Accepted
/// values are stored exactly as submitted.
///
/// Voter eligibility and double-vote prevention belong to the front end; the
/// ledger accepts any well-formed submission.
pub fn validate_vote_request(request: &VoteRequest) -> Result<Vote, ChainError> {
    let voter_id = required_field("voter_id", request.voter_id.as_deref())?;
    let party = required_field("party", request.party.as_deref())?;
    Ok(Vote { voter_id, party })
}

fn required_field(name: &str, value: Option<&str>) -> Result<String, ChainError> {
    let value = value.unwrap_or_default();
    if value.trim().is_empty() {
        return Err(ChainError::InvalidTransaction(format!(
            "Missing required field '{}'",
            name
        )));
    }
    if value.len() > MAX_FIELD_LENGTH {
        return Err(ChainError::InvalidTransaction(format!(
            "Field '{}' exceeds maximum length of {} bytes",
            name, MAX_FIELD_LENGTH
        )));
    }
    Ok(value.to_string())
}
