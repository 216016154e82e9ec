use chrono::{DateTime as ChronoDateTime, Utc};
use log::{info, warn};
use mongodb::bson::{doc, to_bson, DateTime};
use rocket::{
    futures::TryStreamExt,
    http::{Cookie, CookieJar},
    serde::json::Json,
    Route, State,
};
use serde::Serialize;

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        admin::{Admin, AdminCredentials},
        auth::{AdminToken, AUTH_TOKEN_COOKIE},
        ballot::CastVote,
        candidate::{Candidate, NewCandidate},
        mongodb::Coll,
        notify::{voting_day_message, Notifier},
        otp::Code,
        stats::{aggregate, ElectionStats},
        vault::Vault,
        voter::{constituency, Voter, VoterAuth},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        login,
        logout,
        get_stats,
        get_voters,
        create_candidates,
        open_election,
    ]
}

/// Authenticate an administrator and set the auth token cookie.
#[post("/admin/login", data = "<credentials>", format = "json")]
async fn login(
    credentials: Json<AdminCredentials>,
    cookies: &CookieJar<'_>,
    admins: Coll<Admin>,
    config: &State<Config>,
) -> Result<()> {
    let admin = admins
        .find_one(doc! { "username": &credentials.username }, None)
        .await?
        .filter(|admin| admin.verify_password(&credentials.password))
        .ok_or_else(|| {
            Error::Unauthorized("Incorrect username and password combination".to_string())
        })?;

    let token = AdminToken::new(&admin, config);
    cookies.add(token.into_cookie(config));
    info!("Admin {} logged in", admin.username);
    Ok(())
}

#[post("/admin/logout")]
fn logout(_token: AdminToken, cookies: &CookieJar<'_>) {
    cookies.remove(Cookie::named(AUTH_TOKEN_COOKIE));
}

/// Aggregated turnout and vote-share statistics over the anonymised store.
#[get("/admin/stats")]
async fn get_stats(
    _token: AdminToken,
    voters: Coll<Voter>,
    votes: Coll<CastVote>,
    candidates: Coll<Candidate>,
) -> Result<Json<ElectionStats>> {
    let voters: Vec<Voter> = voters.find(None, None).await?.try_collect().await?;
    let votes: Vec<CastVote> = votes.find(None, None).await?.try_collect().await?;
    let candidates: Vec<Candidate> = candidates.find(None, None).await?.try_collect().await?;

    let voter_cores: Vec<_> = voters.into_iter().map(|voter| voter.voter).collect();
    let vote_cores: Vec<_> = votes.into_iter().map(|vote| vote.vote).collect();
    let candidate_cores: Vec<_> = candidates
        .into_iter()
        .map(|candidate| candidate.candidate)
        .collect();

    Ok(Json(aggregate(&voter_cores, &vote_cores, &candidate_cores)))
}

/// A voter as shown to administrators: no encrypted fields, no email.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoterSummary {
    voter_id: String,
    first_name: String,
    last_name: String,
    postcode: String,
    constituency: String,
    vote_cast: bool,
    registration_date: ChronoDateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vote_timestamp: Option<ChronoDateTime<Utc>>,
}

#[get("/admin/voters")]
async fn get_voters(_token: AdminToken, voters: Coll<Voter>) -> Result<Json<Vec<VoterSummary>>> {
    let voters: Vec<Voter> = voters.find(None, None).await?.try_collect().await?;
    let summaries = voters
        .into_iter()
        .map(|voter| VoterSummary {
            constituency: constituency(&voter.postcode),
            voter_id: voter.voter.voter_id,
            first_name: voter.voter.first_name,
            last_name: voter.voter.last_name,
            postcode: voter.voter.postcode,
            vote_cast: voter.voter.vote_cast,
            registration_date: voter.voter.registration_date.to_chrono(),
            vote_timestamp: voter.voter.vote_timestamp.map(|ts| ts.to_chrono()),
        })
        .collect();
    Ok(Json(summaries))
}

/// Load the candidate list for the election.
#[post("/admin/candidates", data = "<candidates>", format = "json")]
async fn create_candidates(
    _token: AdminToken,
    candidates: Json<Vec<NewCandidate>>,
    new_candidates: Coll<NewCandidate>,
) -> Result<()> {
    if candidates.is_empty() {
        return Err(Error::Validation("No candidates provided".to_string()));
    }
    new_candidates.insert_many(&candidates.0, None).await?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ElectionOpened {
    notified: usize,
    failed: usize,
}

/// Open the election: issue every registered voter a fresh access code and
/// deliver it by email.
///
/// Each voter is processed independently. A delivery failure is counted and
/// logged but does not void that voter's stored code, and does not stop the
/// remaining voters from being notified.
#[post("/admin/election/open")]
async fn open_election(
    _token: AdminToken,
    vault: &State<Vault>,
    config: &State<Config>,
    notifier: &State<Box<dyn Notifier>>,
    auths: Coll<VoterAuth>,
) -> Result<Json<ElectionOpened>> {
    let auth_records: Vec<VoterAuth> = auths.find(None, None).await?.try_collect().await?;
    let expires = DateTime::from_millis(
        DateTime::now().timestamp_millis() + config.access_code_ttl().num_milliseconds(),
    );

    let mut notified = 0;
    let mut failed = 0;
    for auth in &auth_records {
        let code = Code::random();
        let encrypted_code = to_bson(&vault.encrypt_field(&code.to_string()))
            .expect("EncryptedField serialization does not fail");
        auths
            .update_one(
                doc! { "voter_id": &auth.voter_id },
                doc! { "$set": {
                    "access_code": encrypted_code,
                    "access_code_expires": expires,
                    "updated_at": DateTime::now(),
                }},
                None,
            )
            .await?;

        let email = match vault.decrypt_field(&auth.email) {
            Ok(email) => email,
            Err(_) => {
                warn!("Undeliverable notification for voter {}", auth.voter_id);
                failed += 1;
                continue;
            }
        };
        let (subject, body) = voting_day_message(code);
        match notifier.send(&email, &subject, &body).await {
            Ok(()) => notified += 1,
            Err(err) => {
                warn!("Notification failed for voter {}: {err}", auth.voter_id);
                failed += 1;
            }
        }
    }
    info!("Election opened: {notified} voters notified, {failed} failures");

    Ok(Json(ElectionOpened { notified, failed }))
}
