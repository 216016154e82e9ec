use data_encoding::HEXLOWER;
use mongodb::bson::DateTime;
use rand::RngCore;
use serde::Deserialize;

use crate::model::otp::{verify_totp, VOTING_DAY_WINDOW};
use crate::model::session::normalise;
use crate::model::vault::Vault;
use crate::model::voter::{VoterAuthCore, VoterCore};

/// The three independent voting-day factors: possession of the notification
/// email (access code), knowledge of the national identity number, and
/// possession of the registered authenticator app.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingCredentials {
    pub access_code: String,
    pub national_identity: String,
    pub totp_code: String,
}

/// Find the one un-voted voter matching all three credentials.
///
/// There is deliberately no indexed lookup here: the identity number is
/// encrypted at rest, and keying the search on any single factor would
/// collapse the three-factor requirement to that factor alone. Instead every
/// candidate record goes through the same decrypt-and-compare sequence, and
/// every failure (wrong value, missing auth record, expired access code,
/// undecryptable field) is treated identically as a non-match. The caller
/// fetches records with `vote_cast == false`, and the scan re-checks the
/// flag itself: a voter who has voted never matches regardless of
/// credential correctness.
pub fn find_matching_voter<'a>(
    vault: &Vault,
    credentials: &VotingCredentials,
    records: &'a [(VoterCore, Option<VoterAuthCore>)],
    now: DateTime,
) -> Option<&'a VoterCore> {
    let claimed_identity = normalise(&credentials.national_identity);

    for (voter, auth) in records {
        if !matches_record(vault, credentials, &claimed_identity, voter, auth, now) {
            continue;
        }
        return Some(voter);
    }
    None
}

/// Run the full three-factor check against a single record.
fn matches_record(
    vault: &Vault,
    credentials: &VotingCredentials,
    claimed_identity: &str,
    voter: &VoterCore,
    auth: &Option<VoterAuthCore>,
    now: DateTime,
) -> bool {
    if voter.vote_cast {
        return false;
    }

    // Factor one: national identity number, compared case-insensitively.
    let stored_identity = match vault.decrypt_field(&voter.national_identity) {
        Ok(identity) => identity,
        Err(_) => return false,
    };
    if normalise(&stored_identity) != claimed_identity {
        return false;
    }

    // Factor two: the access code from the voting-day notification.
    let auth = match auth {
        Some(auth) => auth,
        None => return false,
    };
    let access_code = match (&auth.access_code, auth.access_code_expires) {
        (Some(code), Some(expires)) if now < expires => code,
        _ => return false,
    };
    let stored_code = match vault.decrypt_field(access_code) {
        Ok(code) => code,
        Err(_) => return false,
    };
    if stored_code != credentials.access_code.trim() {
        return false;
    }

    // Factor three: the authenticator code, with the voting-day tolerance.
    let secret = match vault.decrypt_field(&auth.totp_secret) {
        Ok(secret) => secret,
        Err(_) => return false,
    };
    verify_totp(
        &secret,
        credentials.totp_code.trim(),
        (now.timestamp_millis() / 1000) as u64,
        VOTING_DAY_WINDOW,
    )
}

/// Generate a fresh 256-bit ballot token, hex-encoded.
pub fn new_ballot_token() -> String {
    let mut bytes = [0; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    HEXLOWER.encode(&bytes)
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::model::vault::Vault;

    const SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    fn vault() -> Vault {
        Vault::new(b"test-encryption-secret")
    }

    /// A registered, notified voter plus the credentials that match them.
    fn record_with_credentials(
        vault: &Vault,
        identity: &str,
        access_code: &str,
    ) -> ((VoterCore, Option<VoterAuthCore>), VotingCredentials) {
        let voter = VoterCore::example(vault, identity);
        let mut auth = VoterAuthCore::example(vault, &voter.voter_id, "ada@example.com", SECRET);
        auth.access_code = Some(vault.encrypt_field(access_code));
        auth.access_code_expires = Some(DateTime::from_millis(
            DateTime::now().timestamp_millis() + 60_000,
        ));
        let credentials = VotingCredentials {
            access_code: access_code.to_string(),
            national_identity: identity.to_string(),
            totp_code: current_totp(SECRET),
        };
        ((voter, Some(auth)), credentials)
    }

    /// Compute the currently valid authenticator code for a secret.
    fn current_totp(secret: &str) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        crate::model::otp::generate_totp(secret, now).unwrap()
    }

    #[test]
    fn all_three_factors_match() {
        let vault = vault();
        let (record, credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        let records = vec![record];
        let matched = find_matching_voter(&vault, &credentials, &records, DateTime::now());
        assert_eq!(
            Some(&records[0].0.voter_id),
            matched.map(|voter| &voter.voter_id)
        );
    }

    #[test]
    fn identity_comparison_is_case_insensitive() {
        let vault = vault();
        let (record, mut credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        credentials.national_identity = "ab 123456 c".to_string();
        let records = vec![record];
        assert!(find_matching_voter(&vault, &credentials, &records, DateTime::now()).is_some());
    }

    #[test]
    fn any_single_wrong_factor_fails() {
        let vault = vault();
        let (record, good) = record_with_credentials(&vault, "AB123456C", "482913");
        let records = vec![record];
        let now = DateTime::now();

        let wrong_identity = VotingCredentials {
            national_identity: "XY999999Z".to_string(),
            access_code: good.access_code.clone(),
            totp_code: good.totp_code.clone(),
        };
        let wrong_access = VotingCredentials {
            national_identity: good.national_identity.clone(),
            access_code: "000000".to_string(),
            totp_code: good.totp_code.clone(),
        };
        let wrong_totp = VotingCredentials {
            national_identity: good.national_identity.clone(),
            access_code: good.access_code.clone(),
            totp_code: "000000".to_string(),
        };

        assert!(find_matching_voter(&vault, &wrong_identity, &records, now).is_none());
        assert!(find_matching_voter(&vault, &wrong_access, &records, now).is_none());
        assert!(find_matching_voter(&vault, &wrong_totp, &records, now).is_none());
        assert!(find_matching_voter(&vault, &good, &records, now).is_some());
    }

    #[test]
    fn voter_who_voted_never_matches() {
        let vault = vault();
        let ((mut voter, auth), credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        voter.vote_cast = true;
        let records = vec![(voter, auth)];
        // All three factors are correct; the cast flag alone excludes.
        assert!(find_matching_voter(&vault, &credentials, &records, DateTime::now()).is_none());
    }

    #[test]
    fn missing_auth_record_never_matches() {
        let vault = vault();
        let ((voter, _), credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        let records = vec![(voter, None)];
        assert!(find_matching_voter(&vault, &credentials, &records, DateTime::now()).is_none());
    }

    #[test]
    fn expired_access_code_never_matches() {
        let vault = vault();
        let ((voter, auth), credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        let mut auth = auth.unwrap();
        auth.access_code_expires = Some(DateTime::from_millis(
            DateTime::now().timestamp_millis() - 1000,
        ));
        let records = vec![(voter, Some(auth))];
        assert!(find_matching_voter(&vault, &credentials, &records, DateTime::now()).is_none());
    }

    #[test]
    fn absent_access_code_never_matches() {
        let vault = vault();
        let ((voter, auth), credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        let mut auth = auth.unwrap();
        auth.access_code = None;
        auth.access_code_expires = None;
        let records = vec![(voter, Some(auth))];
        assert!(find_matching_voter(&vault, &credentials, &records, DateTime::now()).is_none());
    }

    #[test]
    fn matches_exactly_one_among_many() {
        let vault = vault();
        let (target, credentials) = record_with_credentials(&vault, "AB123456C", "482913");
        let (decoy_one, _) = record_with_credentials(&vault, "CD654321A", "111111");
        let (decoy_two, _) = record_with_credentials(&vault, "EF000000B", "222222");
        let records = vec![decoy_one, target, decoy_two];
        let matched =
            find_matching_voter(&vault, &credentials, &records, DateTime::now()).unwrap();
        assert_eq!(records[1].0.voter_id, matched.voter_id);
    }

    #[test]
    fn ballot_tokens_are_unique() {
        let a = new_ballot_token();
        assert_eq!(64, a.len());
        assert_ne!(a, new_ballot_token());
    }
}
