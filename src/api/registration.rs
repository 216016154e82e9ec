use log::info;
use mongodb::bson::doc;
use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::{
    config::Config,
    error::{Error, Result},
    model::{
        mongodb::{is_duplicate_key_error, Coll},
        notify::{verification_message, Notifier},
        otp::{new_totp_secret, Code},
        session::{PersonalDetails, SessionStore},
        vault::Vault,
        voter::{ensure_email_unused, NewVoter, NewVoterAuth, Voter, VoterAuth},
    },
};

pub fn routes() -> Vec<Route> {
    routes![
        create_session,
        attach_email,
        resend_email_code,
        verify_email,
        setup_totp,
        verify_totp,
        complete_registration,
    ]
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationRequest {
    first_name: String,
    last_name: String,
    postcode: String,
    national_identity: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionCreated {
    session_id: String,
}

/// Start a registration: validate the personal details and open a session.
/// Nothing is persisted until completion.
#[post("/registration", data = "<request>", format = "json")]
fn create_session(
    request: Json<RegistrationRequest>,
    sessions: &State<SessionStore>,
) -> Result<Json<SessionCreated>> {
    let details = PersonalDetails::new(
        &request.first_name,
        &request.last_name,
        &request.postcode,
        &request.national_identity,
    )?;
    let session_id = sessions.create(details);
    Ok(Json(SessionCreated { session_id }))
}

#[derive(Deserialize)]
struct EmailRequest {
    email: String,
}

/// Attach (or replace) the session's email address, then issue and deliver a
/// verification code. Posting again re-issues, invalidating the prior code.
#[post("/registration/<session_id>/email", data = "<request>", format = "json")]
async fn attach_email(
    session_id: &str,
    request: Json<EmailRequest>,
    sessions: &State<SessionStore>,
    config: &State<Config>,
    notifier: &State<Box<dyn Notifier>>,
) -> Result<()> {
    sessions.attach_email(session_id, &request.email)?;
    let ttl = config.email_code_ttl();
    let (code, email) = sessions.issue_email_code(session_id, ttl)?;
    let (subject, body) = verification_message(code, ttl.num_minutes());
    notifier.send(&email, &subject, &body).await?;
    Ok(())
}

/// Re-issue the verification code for the already-attached email address,
/// invalidating the prior one.
#[post("/registration/<session_id>/email/resend")]
async fn resend_email_code(
    session_id: &str,
    sessions: &State<SessionStore>,
    config: &State<Config>,
    notifier: &State<Box<dyn Notifier>>,
) -> Result<()> {
    let ttl = config.email_code_ttl();
    let (code, email) = sessions.issue_email_code(session_id, ttl)?;
    let (subject, body) = verification_message(code, ttl.num_minutes());
    notifier.send(&email, &subject, &body).await?;
    Ok(())
}

#[derive(Deserialize)]
struct CodeRequest {
    code: Code,
}

#[post(
    "/registration/<session_id>/email/verify",
    data = "<request>",
    format = "json"
)]
fn verify_email(
    session_id: &str,
    request: Json<CodeRequest>,
    sessions: &State<SessionStore>,
) -> Result<()> {
    sessions.verify_email_code(session_id, request.code)?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TotpSetup {
    secret: String,
    otpauth_url: String,
}

/// Generate an authenticator secret for the session. Posting again replaces
/// the secret, so a registrant who lost the first QR code can start over.
#[post("/registration/<session_id>/totp")]
fn setup_totp(session_id: &str, sessions: &State<SessionStore>) -> Result<Json<TotpSetup>> {
    let secret = new_totp_secret();
    sessions.set_totp_secret(session_id, &secret)?;
    let otpauth_url = format!("otpauth://totp/WeVote?secret={secret}&issuer=WeVote");
    Ok(Json(TotpSetup {
        secret,
        otpauth_url,
    }))
}

#[derive(Deserialize)]
struct TotpCodeRequest {
    code: String,
}

#[post(
    "/registration/<session_id>/totp/verify",
    data = "<request>",
    format = "json"
)]
fn verify_totp(
    session_id: &str,
    request: Json<TotpCodeRequest>,
    sessions: &State<SessionStore>,
) -> Result<()> {
    sessions.verify_totp_code(session_id, request.code.trim())?;
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegistrationReceipt {
    voter_id: String,
    message: String,
}

/// Persist a fully verified registration: one identity record and one auth
/// record, linked only by the opaque voter ID.
///
/// The duplicate-email check is check-then-insert; the unique `email_hash`
/// index is the backstop, so a concurrent duplicate surfaces as a
/// duplicate-key error and the already-inserted identity record is removed
/// again.
#[post("/registration/<session_id>/complete")]
async fn complete_registration(
    session_id: &str,
    sessions: &State<SessionStore>,
    vault: &State<Vault>,
    new_voters: Coll<NewVoter>,
    voters: Coll<Voter>,
    new_auths: Coll<NewVoterAuth>,
    auths: Coll<VoterAuth>,
) -> Result<Json<RegistrationReceipt>> {
    let completed = sessions.completable(session_id)?;

    let email_hash = vault.hash(&completed.email);
    let existing = auths
        .find_one(doc! { "email_hash": &email_hash }, None)
        .await?;
    ensure_email_unused(existing.as_ref().map(|auth| &auth.auth))?;

    let details = completed.details;
    let voter = NewVoter::new(
        details.first_name,
        details.last_name,
        details.postcode,
        vault.encrypt_field(&details.national_identity),
    );
    let voter_id = voter.voter_id.clone();
    new_voters.insert_one(&voter, None).await?;

    let auth = NewVoterAuth::new(
        voter_id.clone(),
        email_hash,
        vault.encrypt_field(&completed.email),
        vault.encrypt_field(&completed.totp_secret),
    );
    if let Err(err) = new_auths.insert_one(auth, None).await {
        // Roll back the identity record so the registrant can retry.
        voters
            .delete_one(doc! { "voter_id": &voter_id }, None)
            .await?;
        if is_duplicate_key_error(&err) {
            return Err(Error::DuplicateVoter);
        }
        return Err(err.into());
    }

    sessions.remove(session_id);
    info!("Registration completed for voter {voter_id}");
    Ok(Json(RegistrationReceipt {
        voter_id,
        message: "Registration completed successfully. You will be notified by email when voting opens.".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use rocket::{
        http::{ContentType, Status},
        local::blocking::{Client, LocalResponse},
        serde::json::serde_json::{self, json, Value},
    };

    use crate::{
        config::ConfigFairing,
        model::{notify::mock::MockNotifier, otp},
    };

    use super::*;

    /// A client serving the registration routes with a mock notifier. The
    /// verification pipeline up to completion touches no database.
    fn client(notifier: &MockNotifier) -> Client {
        let figment = rocket::Config::figment()
            .merge(("email_code_ttl", 300))
            .merge(("access_code_ttl", 86400))
            .merge(("ballot_token_ttl", 1800))
            .merge(("session_ttl", 1800))
            .merge(("auth_ttl", 86400))
            .merge(("sender_address", "noreply@example.com"))
            .merge(("encryption_secret", "test-encryption-secret"))
            .merge(("jwt_secret", "test-jwt-secret"))
            .merge(("default_admin_password", "test-admin-password"));
        let rocket = rocket::custom(figment)
            .mount("/", routes())
            .attach(ConfigFairing)
            .manage(Box::new(notifier.clone()) as Box<dyn Notifier>);
        Client::tracked(rocket).unwrap()
    }

    fn create_session(client: &Client) -> String {
        let response = client
            .post("/registration")
            .header(ContentType::JSON)
            .body(
                json!({
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                    "postcode": "SW1A 1AA",
                    "nationalIdentity": "AB123456C",
                })
                .to_string(),
            )
            .dispatch();
        assert_eq!(Status::Ok, response.status());
        json_body(response)["sessionId"].as_str().unwrap().to_string()
    }

    fn attach_email(client: &Client, session_id: &str) -> Status {
        client
            .post(format!("/registration/{session_id}/email"))
            .header(ContentType::JSON)
            .body(json!({ "email": "ada@example.com" }).to_string())
            .dispatch()
            .status()
    }

    fn verify_email(client: &Client, session_id: &str, code: &str) -> Status {
        client
            .post(format!("/registration/{session_id}/email/verify"))
            .header(ContentType::JSON)
            .body(json!({ "code": code }).to_string())
            .dispatch()
            .status()
    }

    fn json_body(response: LocalResponse) -> Value {
        serde_json::from_str(&response.into_string().unwrap()).unwrap()
    }

    #[test]
    fn registration_flow_verifies_email_and_totp() {
        let notifier = MockNotifier::default();
        let client = client(&notifier);
        let session_id = create_session(&client);

        assert_eq!(Status::Ok, attach_email(&client, &session_id));
        let code = notifier.last_code().unwrap();
        assert_eq!(Status::Ok, verify_email(&client, &session_id, &code));

        let response = client
            .post(format!("/registration/{session_id}/totp"))
            .dispatch();
        assert_eq!(Status::Ok, response.status());
        let setup = json_body(response);
        let secret = setup["secret"].as_str().unwrap();
        assert!(setup["otpauthUrl"].as_str().unwrap().contains(secret));

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let totp_code = otp::generate_totp(secret, now).unwrap();
        let response = client
            .post(format!("/registration/{session_id}/totp/verify"))
            .header(ContentType::JSON)
            .body(json!({ "code": totp_code }).to_string())
            .dispatch();
        assert_eq!(Status::Ok, response.status());
    }

    #[test]
    fn undelivered_code_is_still_usable() {
        let notifier = MockNotifier::failing();
        let client = client(&notifier);
        let session_id = create_session(&client);

        // Delivery fails, but the issued code stays attached to the session.
        assert_eq!(
            Status::InternalServerError,
            attach_email(&client, &session_id)
        );
        let code = notifier.last_code().unwrap();
        assert_eq!(Status::Ok, verify_email(&client, &session_id, &code));
    }

    #[test]
    fn resent_code_replaces_previous() {
        let notifier = MockNotifier::default();
        let client = client(&notifier);
        let session_id = create_session(&client);

        assert_eq!(Status::Ok, attach_email(&client, &session_id));
        let first = notifier.last_code().unwrap();

        let response = client
            .post(format!("/registration/{session_id}/email/resend"))
            .dispatch();
        assert_eq!(Status::Ok, response.status());
        let second = notifier.last_code().unwrap();
        assert_eq!(2, notifier.sent().len());

        if first != second {
            assert_eq!(Status::BadRequest, verify_email(&client, &session_id, &first));
        }
        assert_eq!(Status::Ok, verify_email(&client, &session_id, &second));
    }

    #[test]
    fn resend_requires_attached_email() {
        let notifier = MockNotifier::default();
        let client = client(&notifier);
        let session_id = create_session(&client);

        let response = client
            .post(format!("/registration/{session_id}/email/resend"))
            .dispatch();
        assert_eq!(Status::BadRequest, response.status());
        assert!(notifier.sent().is_empty());
    }
}
