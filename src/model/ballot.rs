use std::ops::Deref;

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};

/// The fixed enumeration of races on a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteType {
    #[serde(rename = "memberOfParliament")]
    MemberOfParliament,
    #[serde(rename = "localCouncil")]
    LocalCouncil,
}

impl VoteType {
    pub const ALL: [VoteType; 2] = [VoteType::MemberOfParliament, VoteType::LocalCouncil];
}

/// One anonymised cast vote, as stored in the `cast_votes` collection.
///
/// Deliberately contains no voter identifier, name, or identity number: the
/// only link back to a voter was the ballot token, which is discarded after
/// use. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CastVoteCore {
    pub constituency: String,
    pub candidate_id: String,
    pub vote_type: VoteType,
    pub timestamp: DateTime,
}

impl CastVoteCore {
    pub fn new(constituency: String, candidate_id: String, vote_type: VoteType) -> Self {
        Self {
            constituency,
            candidate_id,
            vote_type,
            timestamp: DateTime::now(),
        }
    }
}

/// A cast vote without an ID.
pub type NewCastVote = CastVoteCore;

/// A cast vote from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastVote {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub vote: CastVoteCore,
}

impl Deref for CastVote {
    type Target = CastVoteCore;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}
