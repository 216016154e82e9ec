use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::ballot::{CastVoteCore, VoteType};
use crate::model::candidate::CandidateCore;
use crate::model::voter::{constituency, VoterCore};

/// Headline counts across the whole election.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallStats {
    pub total_registered_voters: usize,
    /// Individual cast-vote records across all races.
    pub total_votes_cast: usize,
    /// Voters who have cast at least one ballot.
    pub total_voters_turnout: usize,
    pub overall_turnout_percentage: u32,
    pub total_constituencies: usize,
}

/// Registration and turnout within one constituency.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstituencyTurnout {
    pub constituency: String,
    pub total_registered: usize,
    pub total_voted: usize,
    pub turnout_percentage: u32,
}

/// Vote share for one party within one race.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyVotes {
    pub party: String,
    pub total_votes: usize,
    pub percentage: u32,
}

/// Total votes for one candidate, broken down by constituency.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateVotes {
    pub candidate_id: String,
    pub candidate_name: String,
    pub party: String,
    pub vote_type: VoteType,
    pub total_votes: usize,
    pub constituencies: HashMap<String, usize>,
}

/// The full reporting view over the anonymised vote store.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionStats {
    pub overall: OverallStats,
    pub voters_by_constituency: Vec<ConstituencyTurnout>,
    pub mp_party_votes: Vec<PartyVotes>,
    pub council_party_votes: Vec<PartyVotes>,
    pub candidate_votes: Vec<CandidateVotes>,
    pub last_updated: DateTime<Utc>,
}

/// Aggregate turnout and vote-share statistics. Pure read-side computation
/// over the durable records; nothing here mutates or re-identifies.
pub fn aggregate(
    voters: &[VoterCore],
    votes: &[CastVoteCore],
    candidates: &[CandidateCore],
) -> ElectionStats {
    let candidate_lookup: HashMap<&str, &CandidateCore> = candidates
        .iter()
        .map(|candidate| (candidate.candidate_id.as_str(), candidate))
        .collect();

    // Registration and turnout by constituency.
    let mut turnout: HashMap<String, (usize, usize)> = HashMap::new();
    let mut voted = 0;
    for voter in voters {
        let entry = turnout.entry(constituency(&voter.postcode)).or_default();
        entry.0 += 1;
        if voter.vote_cast {
            entry.1 += 1;
            voted += 1;
        }
    }
    let mut voters_by_constituency: Vec<ConstituencyTurnout> = turnout
        .into_iter()
        .map(|(constituency, (registered, voted))| ConstituencyTurnout {
            constituency,
            total_registered: registered,
            total_voted: voted,
            turnout_percentage: percentage(voted, registered),
        })
        .collect();
    voters_by_constituency.sort_by(|a, b| a.constituency.cmp(&b.constituency));

    // Per-party and per-candidate tallies.
    let mut party_totals: HashMap<VoteType, HashMap<String, usize>> = HashMap::new();
    let mut candidate_totals: HashMap<&str, CandidateVotes> = HashMap::new();
    for vote in votes {
        let (name, party) = match candidate_lookup.get(vote.candidate_id.as_str()) {
            Some(candidate) => (candidate.name.clone(), candidate.party.clone()),
            None => ("Unknown Candidate".to_string(), "Unknown Party".to_string()),
        };

        *party_totals
            .entry(vote.vote_type)
            .or_default()
            .entry(party.clone())
            .or_default() += 1;

        let entry = candidate_totals
            .entry(vote.candidate_id.as_str())
            .or_insert_with(|| CandidateVotes {
                candidate_id: vote.candidate_id.clone(),
                candidate_name: name,
                party,
                vote_type: vote.vote_type,
                total_votes: 0,
                constituencies: HashMap::new(),
            });
        entry.total_votes += 1;
        *entry
            .constituencies
            .entry(vote.constituency.clone())
            .or_default() += 1;
    }

    let mut candidate_votes: Vec<CandidateVotes> = candidate_totals.into_values().collect();
    candidate_votes.sort_by(|a, b| {
        b.total_votes
            .cmp(&a.total_votes)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    });

    let overall = OverallStats {
        total_registered_voters: voters.len(),
        total_votes_cast: votes.len(),
        total_voters_turnout: voted,
        overall_turnout_percentage: percentage(voted, voters.len()),
        total_constituencies: voters_by_constituency.len(),
    };

    ElectionStats {
        overall,
        mp_party_votes: party_shares(party_totals.remove(&VoteType::MemberOfParliament)),
        council_party_votes: party_shares(party_totals.remove(&VoteType::LocalCouncil)),
        candidate_votes,
        voters_by_constituency,
        last_updated: Utc::now(),
    }
}

/// Turn one race's per-party counts into sorted shares.
fn party_shares(totals: Option<HashMap<String, usize>>) -> Vec<PartyVotes> {
    let totals = totals.unwrap_or_default();
    let race_total: usize = totals.values().sum();
    let mut shares: Vec<PartyVotes> = totals
        .into_iter()
        .map(|(party, votes)| PartyVotes {
            party,
            total_votes: votes,
            percentage: percentage(votes, race_total),
        })
        .collect();
    shares.sort_by(|a, b| {
        b.total_votes
            .cmp(&a.total_votes)
            .then_with(|| a.party.cmp(&b.party))
    });
    shares
}

/// Percentage rounded to the nearest integer; zero when the denominator is zero.
fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        0
    } else {
        ((part as f64 / total as f64) * 100.0).round() as u32
    }
}
