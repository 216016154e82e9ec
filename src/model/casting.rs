use std::collections::{HashMap, HashSet};

use mongodb::bson::DateTime;
use serde::Deserialize;

use crate::error::Error;
use crate::model::ballot::NewCastVote;
use crate::model::candidate::CandidateCore;
use crate::model::voter::{constituency, VoterAuthCore, VoterCore};

/// One selection on a submitted ballot.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSelection {
    pub candidate_id: String,
    pub vote_type: crate::model::ballot::VoteType,
}

/// Resolve a submitted ballot token from the store's lookup result.
///
/// Consuming a token removes it from the auth record, so a token that was
/// already redeemed resolves to nothing and fails exactly like a token that
/// never existed or has expired.
pub fn resolve_ballot_token(
    auth: Option<VoterAuthCore>,
    now: DateTime,
) -> Result<VoterAuthCore, Error> {
    let auth = auth.ok_or(Error::InvalidOrExpiredToken)?;
    match auth.ballot_token_expires {
        Some(expires) if now < expires => Ok(auth),
        _ => Err(Error::InvalidOrExpiredToken),
    }
}

/// Re-check the identity record behind a resolved token before casting.
pub fn ensure_not_voted(voter: Option<VoterCore>) -> Result<VoterCore, Error> {
    let voter = voter.ok_or(Error::InvalidOrExpiredToken)?;
    if voter.vote_cast {
        return Err(Error::AlreadyVoted);
    }
    Ok(voter)
}

/// Validate one ballot's selections against the candidate list: at least one
/// selection, at most one per race, and every candidate standing in the race
/// they were selected for.
pub fn validate_selections(
    selections: &[VoteSelection],
    candidates: &[CandidateCore],
) -> Result<(), Error> {
    if selections.is_empty() {
        return Err(Error::Validation("No votes submitted".to_string()));
    }
    let candidate_lookup: HashMap<&str, &CandidateCore> = candidates
        .iter()
        .map(|candidate| (candidate.candidate_id.as_str(), candidate))
        .collect();
    let mut races_seen = HashSet::new();
    for selection in selections {
        if !races_seen.insert(selection.vote_type) {
            return Err(Error::Validation(
                "Multiple votes submitted for the same race".to_string(),
            ));
        }
        match candidate_lookup.get(selection.candidate_id.as_str()) {
            Some(candidate) if candidate.vote_type == selection.vote_type => {}
            _ => {
                return Err(Error::Validation(
                    "Invalid candidate selection".to_string(),
                ))
            }
        }
    }
    Ok(())
}

/// Interpret the conditional vote-gate update: zero matched documents means
/// another request (or an earlier ballot) already flipped `vote_cast`.
pub fn gate_passed(matched_count: u64) -> Result<(), Error> {
    if matched_count == 0 {
        return Err(Error::AlreadyVoted);
    }
    Ok(())
}

/// Build the anonymised per-race votes for one ballot.
pub fn ballot_votes(postcode: &str, selections: &[VoteSelection]) -> Vec<NewCastVote> {
    let voter_constituency = constituency(postcode);
    selections
        .iter()
        .map(|selection| {
            NewCastVote::new(
                voter_constituency.clone(),
                selection.candidate_id.clone(),
                selection.vote_type,
            )
        })
        .collect()
}
