use std::ops::Deref;

use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Core admin user data.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCore {
    pub username: String,
    pub password_hash: String,
}

impl AdminCore {
    /// Hash the given password and construct a new admin.
    pub fn new(username: String, password: &str) -> Self {
        let mut salt = [0; 16];
        rand::Rng::fill(&mut rand::thread_rng(), &mut salt);
        let password_hash =
            argon2::hash_encoded(password.as_bytes(), &salt, &argon2::Config::default())
                .expect("Argon2 with default config does not fail");
        Self {
            username,
            password_hash,
        }
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }
}

/// An admin without an ID.
pub type NewAdmin = AdminCore;

/// An admin user from the database, with its unique ID.
#[derive(Serialize, Deserialize)]
pub struct Admin {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(flatten)]
    pub admin: AdminCore,
}

impl Deref for Admin {
    type Target = AdminCore;

    fn deref(&self) -> &Self::Target {
        &self.admin
    }
}

/// Login credentials submitted by an administrator.
#[derive(Debug, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}
