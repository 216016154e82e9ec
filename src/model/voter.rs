use std::ops::{Deref, DerefMut};

use data_encoding::HEXUPPER;
use mongodb::bson::{oid::ObjectId, DateTime};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::vault::EncryptedField;

/// Core voter identity data, as stored in the `voters` collection.
///
/// The national identity number is stored only in encrypted form; nothing in
/// this record can be used as a direct lookup key for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterCore {
    pub voter_id: String,
    pub first_name: String,
    pub last_name: String,
    pub postcode: String,
    pub national_identity: EncryptedField,
    pub vote_cast: bool,
    pub registration_date: DateTime,
    pub updated_at: DateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vote_timestamp: Option<DateTime>,
}

impl VoterCore {
    pub fn new(
        first_name: String,
        last_name: String,
        postcode: String,
        national_identity: EncryptedField,
    ) -> Self {
        let now = DateTime::now();
        Self {
            voter_id: new_voter_id(),
            first_name,
            last_name,
            postcode,
            national_identity,
            vote_cast: false,
            registration_date: now,
            updated_at: now,
            vote_timestamp: None,
        }
    }
}

/// A voter without an ID.
pub type NewVoter = VoterCore;

/// A voter record from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voter {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub voter: VoterCore,
}

impl Deref for Voter {
    type Target = VoterCore;

    fn deref(&self) -> &Self::Target {
        &self.voter
    }
}

impl DerefMut for Voter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.voter
    }
}

/// Core voter authentication data, stored in the separate `voter_auth`
/// collection so a compromise of either collection alone reveals neither a
/// full identity nor usable credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterAuthCore {
    pub voter_id: String,
    /// One-way email hash: duplicate-registration check only, never a
    /// matching key.
    pub email_hash: String,
    /// Encrypted email address, needed to deliver the voting-day
    /// notification after registration.
    pub email: EncryptedField,
    pub totp_secret: EncryptedField,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code: Option<EncryptedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_code_expires: Option<DateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ballot_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ballot_token_expires: Option<DateTime>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl VoterAuthCore {
    pub fn new(
        voter_id: String,
        email_hash: String,
        email: EncryptedField,
        totp_secret: EncryptedField,
    ) -> Self {
        let now = DateTime::now();
        Self {
            voter_id,
            email_hash,
            email,
            totp_secret,
            access_code: None,
            access_code_expires: None,
            ballot_token: None,
            ballot_token_expires: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A voter auth record without an ID.
pub type NewVoterAuth = VoterAuthCore;

/// A voter auth record from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoterAuth {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub auth: VoterAuthCore,
}

impl Deref for VoterAuth {
    type Target = VoterAuthCore;

    fn deref(&self) -> &Self::Target {
        &self.auth
    }
}

impl DerefMut for VoterAuth {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.auth
    }
}

/// Duplicate-registration check on the auth record found for a new
/// registrant's email hash. The unique `email_hash` index is the backstop
/// for the concurrent case; this closes the sequential one.
pub fn ensure_email_unused(existing: Option<&VoterAuthCore>) -> Result<(), Error> {
    match existing {
        Some(_) => Err(Error::DuplicateVoter),
        None => Ok(()),
    }
}

/// Generate a fresh opaque voter ID.
fn new_voter_id() -> String {
    let mut bytes = [0; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("VTR-{}", HEXUPPER.encode(&bytes))
}

/// Number of leading postcode characters that identify a constituency.
const CONSTITUENCY_PREFIX: usize = 3;

/// Derive a voter's constituency from their normalised postcode: the fixed
/// three-character prefix, or `Unknown` for postcodes too short to carry one.
pub fn constituency(postcode: &str) -> String {
    if postcode.chars().count() >= CONSTITUENCY_PREFIX {
        postcode.chars().take(CONSTITUENCY_PREFIX).collect()
    } else {
        "Unknown".to_string()
    }
}
