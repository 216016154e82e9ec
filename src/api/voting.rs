use std::collections::HashMap;

use log::{error, info};
use mongodb::bson::{doc, DateTime};
use rocket::{futures::TryStreamExt, serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        ballot::{NewCastVote, VoteType},
        candidate::Candidate,
        casting::{
            ballot_votes, ensure_not_voted, gate_passed, resolve_ballot_token,
            validate_selections, VoteSelection,
        },
        matching::{find_matching_voter, new_ballot_token, VotingCredentials},
        mongodb::Coll,
        vault::Vault,
        voter::{constituency, Voter, VoterAuth, VoterAuthCore, VoterCore},
    },
};

pub fn routes() -> Vec<Route> {
    routes![get_candidates, verify_voter, cast_vote]
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CandidateView {
    candidate_id: String,
    name: String,
    party: String,
    vote_type: VoteType,
}

/// The candidate list shown on the ballot.
#[get("/voting/candidates")]
async fn get_candidates(candidates: Coll<Candidate>) -> Result<Json<Vec<CandidateView>>> {
    let candidates: Vec<Candidate> = candidates.find(None, None).await?.try_collect().await?;
    let views = candidates
        .into_iter()
        .map(|candidate| CandidateView {
            candidate_id: candidate.candidate_id.clone(),
            name: candidate.name.clone(),
            party: candidate.party.clone(),
            vote_type: candidate.vote_type,
        })
        .collect();
    Ok(Json(views))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BallotIssue {
    ballot_token: String,
    first_name: String,
    last_name: String,
    postcode: String,
    constituency: String,
}

/// Check the three voting-day factors and issue a short-lived ballot token.
///
/// Every voter who has not yet cast a ballot is a candidate record; there is
/// no lookup key, so the whole set goes through the matching scan. A failed
/// match reveals nothing about which factor was wrong.
#[post("/voting/verify", data = "<credentials>", format = "json")]
async fn verify_voter(
    credentials: Json<VotingCredentials>,
    vault: &State<Vault>,
    config: &State<Config>,
    voters: Coll<Voter>,
    auths: Coll<VoterAuth>,
) -> Result<Json<BallotIssue>> {
    let eligible: Vec<Voter> = voters
        .find(doc! { "vote_cast": false }, None)
        .await?
        .try_collect()
        .await?;
    let voter_ids: Vec<&str> = eligible
        .iter()
        .map(|voter| voter.voter_id.as_str())
        .collect();
    let auth_records: Vec<VoterAuth> = auths
        .find(doc! { "voter_id": { "$in": voter_ids } }, None)
        .await?
        .try_collect()
        .await?;
    let mut auth_by_voter: HashMap<String, VoterAuthCore> = auth_records
        .into_iter()
        .map(|auth| (auth.voter_id.clone(), auth.auth))
        .collect();
    let records: Vec<(VoterCore, Option<VoterAuthCore>)> = eligible
        .into_iter()
        .map(|voter| {
            let auth = auth_by_voter.remove(&voter.voter.voter_id);
            (voter.voter, auth)
        })
        .collect();

    let now = DateTime::now();
    let matched = find_matching_voter(vault, &credentials, &records, now)
        .ok_or(Error::InvalidCredentials)?;

    let ballot_token = new_ballot_token();
    let expires = DateTime::from_millis(
        now.timestamp_millis() + config.ballot_token_ttl().num_milliseconds(),
    );
    auths
        .update_one(
            doc! { "voter_id": &matched.voter_id },
            doc! { "$set": {
                "ballot_token": &ballot_token,
                "ballot_token_expires": expires,
                "updated_at": DateTime::now(),
            }},
            None,
        )
        .await?;

    // The gate flag may have flipped between the scan and the token write;
    // revoke the token rather than hand out a credential that cannot cast.
    let still_unvoted = voters
        .find_one(
            doc! { "voter_id": &matched.voter_id, "vote_cast": false },
            None,
        )
        .await?
        .is_some();
    if !still_unvoted {
        auths
            .update_one(
                doc! { "voter_id": &matched.voter_id },
                doc! {
                    "$unset": { "ballot_token": "", "ballot_token_expires": "" },
                    "$set": { "updated_at": DateTime::now() },
                },
                None,
            )
            .await?;
        return Err(Error::InvalidCredentials);
    }
    info!("Ballot token issued to voter {}", matched.voter_id);

    Ok(Json(BallotIssue {
        ballot_token,
        first_name: matched.first_name.clone(),
        last_name: matched.last_name.clone(),
        postcode: matched.postcode.clone(),
        constituency: constituency(&matched.postcode),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CastRequest {
    ballot_token: String,
    votes: Vec<VoteSelection>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CastReceipt {
    message: String,
    votes_recorded: usize,
}

/// Redeem a ballot token and record the anonymised votes.
///
/// The one-vote guarantee is the conditional update on `vote_cast: false`:
/// whichever of two concurrent requests runs it first wins, the other sees
/// zero matched documents. The cast-vote documents carry no voter identity,
/// and the token is discarded afterwards.
#[post("/voting/cast", data = "<request>", format = "json")]
async fn cast_vote(
    request: Json<CastRequest>,
    voters: Coll<Voter>,
    auths: Coll<VoterAuth>,
    candidates: Coll<Candidate>,
    new_votes: Coll<NewCastVote>,
) -> Result<Json<CastReceipt>> {
    let now = DateTime::now();

    // Resolve the token to a voter.
    let auth = resolve_ballot_token(
        auths
            .find_one(doc! { "ballot_token": &request.ballot_token }, None)
            .await?
            .map(|auth| auth.auth),
        now,
    )?;
    let voter = ensure_not_voted(
        voters
            .find_one(doc! { "voter_id": &auth.voter_id }, None)
            .await?
            .map(|voter| voter.voter),
    )?;

    // Validate the selections against the candidate list.
    let candidate_list: Vec<Candidate> = candidates.find(None, None).await?.try_collect().await?;
    let candidate_cores: Vec<_> = candidate_list
        .into_iter()
        .map(|candidate| candidate.candidate)
        .collect();
    validate_selections(&request.votes, &candidate_cores)?;

    // The one-vote gate.
    let gate = voters
        .update_one(
            doc! { "voter_id": &auth.voter_id, "vote_cast": false },
            doc! { "$set": {
                "vote_cast": true,
                "vote_timestamp": now,
                "updated_at": now,
            }},
            None,
        )
        .await?;
    gate_passed(gate.matched_count)?;

    // Record the anonymised votes. On failure, reopen the gate so a retry
    // cannot be locked out without any recorded ballot.
    let cast_votes = ballot_votes(&voter.postcode, &request.votes);
    if let Err(err) = new_votes.insert_many(&cast_votes, None).await {
        let rollback = voters
            .update_one(
                doc! { "voter_id": &auth.voter_id },
                doc! {
                    "$set": { "vote_cast": false, "updated_at": DateTime::now() },
                    "$unset": { "vote_timestamp": "" },
                },
                None,
            )
            .await;
        if let Err(rollback_err) = rollback {
            error!(
                "Failed to roll back vote gate for {}: {rollback_err}",
                auth.voter_id
            );
        }
        return Err(err.into());
    }

    // The token is single-use.
    auths
        .update_one(
            doc! { "voter_id": &auth.voter_id },
            doc! {
                "$unset": { "ballot_token": "", "ballot_token_expires": "" },
                "$set": { "updated_at": DateTime::now() },
            },
            None,
        )
        .await?;
    info!("Ballot cast with {} votes", cast_votes.len());

    Ok(Json(CastReceipt {
        message: "Your vote has been recorded".to_string(),
        votes_recorded: cast_votes.len(),
    }))
}
