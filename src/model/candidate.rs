use std::ops::Deref;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::model::ballot::VoteType;

/// Core candidate data, as stored in the `candidates` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCore {
    pub candidate_id: String,
    pub name: String,
    pub party: String,
    pub vote_type: VoteType,
}

/// A candidate without an ID.
pub type NewCandidate = CandidateCore;

/// A candidate from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub candidate: CandidateCore,
}

impl Deref for Candidate {
    type Target = CandidateCore;

    fn deref(&self) -> &Self::Target {
        &self.candidate
    }
}

#[cfg(test)]
pub mod examples {
    use super::*;

    impl CandidateCore {
        pub fn example(candidate_id: &str, party: &str, vote_type: VoteType) -> Self {
            Self {
                candidate_id: candidate_id.to_string(),
                name: format!("Candidate {candidate_id}"),
                party: party.to_string(),
                vote_type,
            }
        }
    }
}
