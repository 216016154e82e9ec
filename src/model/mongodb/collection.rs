use std::ops::Deref;

use log::debug;
use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    admin::{Admin, NewAdmin},
    ballot::{CastVote, NewCastVote},
    candidate::{Candidate, NewCandidate},
    voter::{NewVoter, NewVoterAuth, Voter, VoterAuth},
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `Derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Voter identity collection.
const VOTERS: &str = "voters";
impl MongoCollection for Voter {
    const NAME: &'static str = VOTERS;
}
impl MongoCollection for NewVoter {
    const NAME: &'static str = VOTERS;
}

// Voter authentication collection, segmented from identity data.
const VOTER_AUTH: &str = "voter_auth";
impl MongoCollection for VoterAuth {
    const NAME: &'static str = VOTER_AUTH;
}
impl MongoCollection for NewVoterAuth {
    const NAME: &'static str = VOTER_AUTH;
}

// Anonymised cast votes.
const CAST_VOTES: &str = "cast_votes";
impl MongoCollection for CastVote {
    const NAME: &'static str = CAST_VOTES;
}
impl MongoCollection for NewCastVote {
    const NAME: &'static str = CAST_VOTES;
}

// Candidates.
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}
impl MongoCollection for NewCandidate {
    const NAME: &'static str = CANDIDATES;
}

// Admins.
const ADMINS: &str = "admins";
impl MongoCollection for Admin {
    const NAME: &'static str = ADMINS;
}
impl MongoCollection for NewAdmin {
    const NAME: &'static str = ADMINS;
}

/// Ensure that all the required indexes exist on the given database.
///
/// The unique `email_hash` index is load-bearing: it closes the
/// check-then-insert race in registration completion, so two concurrent
/// completions with the same email cannot both create records.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = IndexOptions::builder().unique(true).build();

    // Voter collection.
    let voter_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<Voter>::from_db(db)
        .create_index(voter_index, None)
        .await?;

    // Voter auth collection.
    let email_index = IndexModel::builder()
        .keys(doc! {"email_hash": 1})
        .options(unique.clone())
        .build();
    Coll::<VoterAuth>::from_db(db)
        .create_index(email_index, None)
        .await?;
    let auth_voter_index = IndexModel::builder()
        .keys(doc! {"voter_id": 1})
        .options(unique.clone())
        .build();
    Coll::<VoterAuth>::from_db(db)
        .create_index(auth_voter_index, None)
        .await?;

    // Admin collection.
    let admin_index = IndexModel::builder()
        .keys(doc! {"username": 1})
        .options(unique)
        .build();
    Coll::<Admin>::from_db(db)
        .create_index(admin_index, None)
        .await?;

    Ok(())
}
