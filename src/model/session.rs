use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use data_encoding::HEXLOWER;
use log::debug;
use rand::RngCore;

use crate::error::Error;
use crate::model::otp::{verify_totp, Code, REGISTRATION_WINDOW};

/// The four personal fields collected before any verification step.
/// Postcode and national identity number are normalised to uppercase with
/// whitespace stripped; names keep their submitted form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonalDetails {
    pub first_name: String,
    pub last_name: String,
    pub postcode: String,
    pub national_identity: String,
}

impl PersonalDetails {
    /// Validate and normalise submitted personal details.
    pub fn new(
        first_name: &str,
        last_name: &str,
        postcode: &str,
        national_identity: &str,
    ) -> Result<Self, Error> {
        for (name, value) in [
            ("firstName", first_name),
            ("lastName", last_name),
            ("postcode", postcode),
            ("nationalIdentity", national_identity),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Validation(format!("Missing required field: {name}")));
            }
        }
        Ok(Self {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            postcode: normalise(postcode),
            national_identity: normalise(national_identity),
        })
    }
}

/// Uppercase with all whitespace stripped, for fields compared by equality.
pub fn normalise(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Progress of a registration session through its verification steps.
///
/// The machine is linear with re-entrant back-edges: issuing a fresh email
/// code returns to `EmailPending` (invalidating the previous code), and
/// re-setting the authenticator secret returns to `TotpPending`. Completion
/// data (verified email plus authenticator secret) only exists in the
/// `TotpVerified` stage, so completing an unverified session is
/// unrepresentable.
#[derive(Debug, Clone)]
pub enum Stage {
    Created,
    EmailPending {
        email: String,
        code: Option<(Code, DateTime<Utc>)>,
    },
    EmailVerified {
        email: String,
    },
    TotpPending {
        email: String,
        secret: String,
    },
    TotpVerified {
        email: String,
        secret: String,
    },
}

/// An in-progress registration. Ephemeral: lives only in the session store,
/// never persisted.
#[derive(Debug, Clone)]
pub struct RegistrationSession {
    pub details: PersonalDetails,
    stage: Stage,
    created_at: DateTime<Utc>,
}

/// The payload extracted from a fully verified session at completion time.
#[derive(Debug, Clone)]
pub struct CompletedRegistration {
    pub details: PersonalDetails,
    pub email: String,
    pub totp_secret: String,
}

impl RegistrationSession {
    fn new(details: PersonalDetails) -> Self {
        Self {
            details,
            stage: Stage::Created,
            created_at: Utc::now(),
        }
    }

    /// Attach (or replace) the email address, returning to `EmailPending`.
    fn attach_email(&mut self, email: &str) -> Result<(), Error> {
        if !valid_email(email) {
            return Err(Error::Validation(
                "Please enter a valid email address".to_string(),
            ));
        }
        self.stage = Stage::EmailPending {
            email: email.trim().to_lowercase(),
            code: None,
        };
        Ok(())
    }

    /// Issue a fresh email verification code, invalidating any prior one.
    /// Returns the code and the email address to deliver it to.
    fn issue_email_code(&mut self, ttl: Duration) -> Result<(Code, String), Error> {
        let email = match &self.stage {
            Stage::EmailPending { email, .. } | Stage::EmailVerified { email } => email.clone(),
            _ => {
                return Err(Error::Validation(
                    "Email not provided. Please add an email address first.".to_string(),
                ))
            }
        };
        let code = Code::random();
        self.stage = Stage::EmailPending {
            email: email.clone(),
            code: Some((code, Utc::now() + ttl)),
        };
        Ok((code, email))
    }

    /// Check a submitted email code. The code is single-use: a successful
    /// check clears it and marks the email verified.
    fn verify_email_code(&mut self, submitted: Code) -> Result<String, Error> {
        let (email, code) = match &self.stage {
            Stage::EmailPending { email, code } => (email.clone(), *code),
            _ => return Err(Error::InvalidOrExpiredCode),
        };
        let (code, expires) = code.ok_or(Error::InvalidOrExpiredCode)?;
        if code != submitted || Utc::now() > expires {
            return Err(Error::InvalidOrExpiredCode);
        }
        self.stage = Stage::EmailVerified {
            email: email.clone(),
        };
        Ok(email)
    }

    /// Store (or replace) the authenticator secret, returning to
    /// `TotpPending`. The secret stays plaintext while in the session;
    /// encryption happens at persistence time.
    fn set_totp_secret(&mut self, secret: &str) -> Result<(), Error> {
        if secret.trim().is_empty() {
            return Err(Error::Validation("TOTP secret is required".to_string()));
        }
        let email = match &self.stage {
            Stage::EmailVerified { email }
            | Stage::TotpPending { email, .. }
            | Stage::TotpVerified { email, .. } => email.clone(),
            _ => {
                return Err(Error::Validation(
                    "Email verification must be completed first".to_string(),
                ))
            }
        };
        self.stage = Stage::TotpPending {
            email,
            secret: secret.trim().to_string(),
        };
        Ok(())
    }

    /// Check a submitted authenticator code with the registration tolerance.
    fn verify_totp_code(&mut self, code: &str, now: DateTime<Utc>) -> Result<(), Error> {
        let (email, secret) = match &self.stage {
            Stage::TotpPending { email, secret } => (email.clone(), secret.clone()),
            _ => {
                return Err(Error::Validation(
                    "TOTP not set up. Please set up your authenticator app first.".to_string(),
                ))
            }
        };
        if !verify_totp(&secret, code, now.timestamp() as u64, REGISTRATION_WINDOW) {
            return Err(Error::InvalidOrExpiredCode);
        }
        self.stage = Stage::TotpVerified { email, secret };
        Ok(())
    }

    /// The completion payload, available only once both factors are verified.
    fn completable(&self) -> Result<CompletedRegistration, Error> {
        match &self.stage {
            Stage::TotpVerified { email, secret } => Ok(CompletedRegistration {
                details: self.details.clone(),
                email: email.clone(),
                totp_secret: secret.clone(),
            }),
            _ => Err(Error::IncompleteVerification),
        }
    }
}

/// Minimal structural check, mirroring the client-side rule: one `@` with a
/// dot somewhere in the domain, no whitespace.
fn valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Process-lifetime store of in-progress registrations, keyed by a random
/// session identifier. Supports many concurrent registrants; each session
/// has a single writer. Sessions are evicted lazily after `ttl`, on insert
/// and on access, so abandoned registrations do not accumulate.
///
/// Backing is an in-process map, sufficient for single-instance
/// deployments; a multi-instance deployment would swap this for an external
/// store behind the same interface.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, RegistrationSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Create a session for the given personal details and return its ID.
    pub fn create(&self, details: PersonalDetails) -> String {
        let id = new_session_id();
        let mut sessions = self.sessions.write().unwrap();
        let ttl = self.ttl;
        let before = sessions.len();
        sessions.retain(|_, session| Utc::now() - session.created_at < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!("Evicted {evicted} expired registration sessions");
        }
        sessions.insert(id.clone(), RegistrationSession::new(details));
        id
    }

    /// Run a state-machine operation against one session.
    pub fn with_session<T>(
        &self,
        id: &str,
        op: impl FnOnce(&mut RegistrationSession) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions.get_mut(id).ok_or(Error::SessionNotFound)?;
        if Utc::now() - session.created_at >= self.ttl {
            sessions.remove(id);
            return Err(Error::SessionNotFound);
        }
        op(session)
    }

    pub fn attach_email(&self, id: &str, email: &str) -> Result<(), Error> {
        self.with_session(id, |session| session.attach_email(email))
    }

    pub fn issue_email_code(&self, id: &str, ttl: Duration) -> Result<(Code, String), Error> {
        self.with_session(id, |session| session.issue_email_code(ttl))
    }

    pub fn verify_email_code(&self, id: &str, code: Code) -> Result<String, Error> {
        self.with_session(id, |session| session.verify_email_code(code))
    }

    pub fn set_totp_secret(&self, id: &str, secret: &str) -> Result<(), Error> {
        self.with_session(id, |session| session.set_totp_secret(secret))
    }

    pub fn verify_totp_code(&self, id: &str, code: &str) -> Result<(), Error> {
        self.with_session(id, |session| session.verify_totp_code(code, Utc::now()))
    }

    /// The completion payload for a fully verified session. Leaves the
    /// session in place; call [`SessionStore::remove`] once the durable
    /// records have been written.
    pub fn completable(&self, id: &str) -> Result<CompletedRegistration, Error> {
        self.with_session(id, |session| session.completable())
    }

    /// Delete a session, on successful completion or explicit abandonment.
    pub fn remove(&self, id: &str) {
        self.sessions.write().unwrap().remove(id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

/// 128-bit random session identifier, hex-encoded.
fn new_session_id() -> String {
    let mut bytes = [0; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> PersonalDetails {
        PersonalDetails::new("Ada", "Lovelace", "sw1a 1aa", "ab 123456 c").unwrap()
    }

    fn store() -> SessionStore {
        SessionStore::new(Duration::minutes(30))
    }

    // Secret used by the TOTP tests; any valid base32 value works.
    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    /// Drive a session to the TotpVerified stage and return (store, id).
    fn verified_session() -> (SessionStore, String) {
        let store = store();
        let id = store.create(details());
        store.attach_email(&id, "ada@example.com").unwrap();
        let (code, _) = store.issue_email_code(&id, Duration::minutes(5)).unwrap();
        store.verify_email_code(&id, code).unwrap();
        store.set_totp_secret(&id, SECRET).unwrap();
        store
            .with_session(&id, |session| {
                session.stage = Stage::TotpVerified {
                    email: "ada@example.com".to_string(),
                    secret: SECRET.to_string(),
                };
                Ok(())
            })
            .unwrap();
        (store, id)
    }

    #[test]
    fn personal_details_normalised() {
        let details = details();
        assert_eq!("SW1A1AA", details.postcode);
        assert_eq!("AB123456C", details.national_identity);
        assert_eq!("Ada", details.first_name);
    }

    #[test]
    fn personal_details_require_all_fields() {
        assert!(matches!(
            PersonalDetails::new("Ada", "", "SW1A 1AA", "AB123456C"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn unknown_session_not_found() {
        assert!(matches!(
            store().attach_email("missing", "a@b.co"),
            Err(Error::SessionNotFound)
        ));
    }

    #[test]
    fn email_validation() {
        let store = store();
        let id = store.create(details());
        assert!(matches!(
            store.attach_email(&id, "not-an-email"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            store.attach_email(&id, "a b@example.com"),
            Err(Error::Validation(_))
        ));
        store.attach_email(&id, "Ada@Example.com").unwrap();
    }

    #[test]
    fn email_code_verifies_once() {
        let store = store();
        let id = store.create(details());
        store.attach_email(&id, "ada@example.com").unwrap();
        let (code, email) = store.issue_email_code(&id, Duration::minutes(5)).unwrap();
        assert_eq!("ada@example.com", email);
        assert_eq!("ada@example.com", store.verify_email_code(&id, code).unwrap());
        // Single-use: the code is cleared by the successful check.
        assert!(matches!(
            store.verify_email_code(&id, code),
            Err(Error::InvalidOrExpiredCode)
        ));
    }

    #[test]
    fn expired_email_code_rejected() {
        let store = store();
        let id = store.create(details());
        store.attach_email(&id, "ada@example.com").unwrap();
        let (code, _) = store.issue_email_code(&id, Duration::minutes(-1)).unwrap();
        assert!(matches!(
            store.verify_email_code(&id, code),
            Err(Error::InvalidOrExpiredCode)
        ));
    }

    #[test]
    fn reissue_invalidates_previous_code() {
        let store = store();
        let id = store.create(details());
        store.attach_email(&id, "ada@example.com").unwrap();
        let (first, _) = store.issue_email_code(&id, Duration::minutes(5)).unwrap();
        let (second, _) = store.issue_email_code(&id, Duration::minutes(5)).unwrap();
        if first != second {
            assert!(store.verify_email_code(&id, first).is_err());
        } else {
            store.verify_email_code(&id, second).unwrap();
        }
    }

    #[test]
    fn verify_without_issued_code_rejected() {
        let store = store();
        let id = store.create(details());
        store.attach_email(&id, "ada@example.com").unwrap();
        assert!(matches!(
            store.verify_email_code(&id, Code::random()),
            Err(Error::InvalidOrExpiredCode)
        ));
    }

    #[test]
    fn totp_setup_requires_verified_email() {
        let store = store();
        let id = store.create(details());
        assert!(matches!(
            store.set_totp_secret(&id, SECRET),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn completion_requires_both_verifications() {
        let store = store();
        let id = store.create(details());
        assert!(matches!(
            store.completable(&id),
            Err(Error::IncompleteVerification)
        ));

        store.attach_email(&id, "ada@example.com").unwrap();
        let (code, _) = store.issue_email_code(&id, Duration::minutes(5)).unwrap();
        store.verify_email_code(&id, code).unwrap();
        // Email verified but no authenticator yet.
        assert!(matches!(
            store.completable(&id),
            Err(Error::IncompleteVerification)
        ));

        store.set_totp_secret(&id, SECRET).unwrap();
        // Secret set but not verified.
        assert!(matches!(
            store.completable(&id),
            Err(Error::IncompleteVerification)
        ));
    }

    #[test]
    fn completable_session_yields_payload_and_survives_until_removed() {
        let (store, id) = verified_session();
        let completed = store.completable(&id).unwrap();
        assert_eq!("ada@example.com", completed.email);
        assert_eq!(SECRET, completed.totp_secret);
        assert_eq!("AB123456C", completed.details.national_identity);

        // Still present until explicitly removed (e.g. a failed persist
        // leaves the registrant able to retry).
        assert!(store.completable(&id).is_ok());
        store.remove(&id);
        assert!(matches!(
            store.completable(&id),
            Err(Error::SessionNotFound)
        ));
    }

    #[test]
    fn expired_sessions_evicted() {
        let store = SessionStore::new(Duration::seconds(0));
        let id = store.create(details());
        assert!(matches!(
            store.attach_email(&id, "ada@example.com"),
            Err(Error::SessionNotFound)
        ));
        // Creating another session purges the expired one.
        store.create(details());
        assert_eq!(1, store.len());
    }
}
