use aws_config::SdkConfig;
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sesv2::{Client as SesClient, Credentials, Region};
use chrono::Duration;
use log::{error, info};
use mongodb::{Client as MongoClient, Database};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::model::{
    admin::{Admin, NewAdmin},
    mongodb::{ensure_indexes_exist, Coll},
    notify::{Notifier, SesNotifier},
    session::SessionStore,
    vault::Vault,
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Deserialize)]
pub struct Config {
    // non-secrets
    email_code_ttl: u32,
    access_code_ttl: u32,
    ballot_token_ttl: u32,
    session_ttl: u32,
    auth_ttl: u32,
    sender_address: String,
    // secrets
    encryption_secret: String,
    jwt_secret: String,
    default_admin_password: String,
}

impl Config {
    /// Valid lifetime of an email verification code in seconds.
    pub fn email_code_ttl(&self) -> Duration {
        Duration::seconds(self.email_code_ttl.into())
    }

    /// Valid lifetime of a voting-day access code in seconds.
    pub fn access_code_ttl(&self) -> Duration {
        Duration::seconds(self.access_code_ttl.into())
    }

    /// Valid lifetime of a ballot token in seconds.
    pub fn ballot_token_ttl(&self) -> Duration {
        Duration::seconds(self.ballot_token_ttl.into())
    }

    /// Time before an abandoned registration session is evicted.
    pub fn session_ttl(&self) -> Duration {
        Duration::seconds(self.session_ttl.into())
    }

    /// Valid lifetime of admin auth token cookies in seconds.
    pub fn auth_ttl(&self) -> Duration {
        Duration::seconds(self.auth_ttl.into())
    }

    /// The From address for outbound notifications.
    pub fn sender_address(&self) -> &str {
        &self.sender_address
    }

    /// Secret from which the field-encryption key is derived.
    pub fn encryption_secret(&self) -> &[u8] {
        self.encryption_secret.as_bytes()
    }

    /// Secret key used to sign admin auth tokens.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }

    /// Password for the bootstrap admin account.
    pub fn default_admin_password(&self) -> &str {
        &self.default_admin_password
    }
}

/// A fairing that loads the application config and derives the state that
/// depends only on it: the field-encryption vault and the registration
/// session store.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };

        let vault = Vault::new(config.encryption_secret());
        let sessions = SessionStore::new(config.session_ttl());

        // Manage the state.
        rocket = rocket.manage(config).manage(vault).manage(sessions);
        Ok(rocket)
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    // secrets
    db_uri: String,
}

/// A fairing that loads the MongoDB config, connects to the database,
/// performs any setup necessary, and places both a `Client` and a `Database`
/// into managed state.
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!("Loaded database config, connecting...");
        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let db = client.database(&get_database_name());

        // Ensure the required indexes exist, including the unique email-hash
        // index that closes the duplicate-registration race.
        if let Err(e) = ensure_indexes_exist(&db).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }

        // Ensure there is at least one admin user.
        let app_config = rocket
            .state::<Config>()
            .expect("ConfigFairing is attached before DatabaseFairing");
        if let Err(e) = ensure_admin_exists(&db, app_config).await {
            error!("Failed to connect to database: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        // Manage the state.
        rocket = rocket.manage(client).manage(db);
        Ok(rocket)
    }
}

/// Create the bootstrap admin account if no admin exists yet.
async fn ensure_admin_exists(db: &Database, config: &Config) -> Result<(), mongodb::error::Error> {
    let admins = Coll::<Admin>::from_db(db);
    if admins.count_documents(None, None).await? == 0 {
        info!("No admin accounts found, creating the bootstrap admin");
        let admin = NewAdmin::new("admin".to_string(), config.default_admin_password());
        Coll::<NewAdmin>::from_db(db).insert_one(admin, None).await?;
    }
    Ok(())
}

/// Get the name of the database to use (production version).
#[cfg(not(test))]
fn get_database_name() -> String {
    "wevote".to_string()
}

/// Get the name of the database to use (test version).
/// Use a random name to avoid collisions between tests.
#[cfg(test)]
fn get_database_name() -> String {
    let random: u32 = rand::random();
    let db = format!("test{random}");
    info!("Using database {db}");
    db
}

/// Configuration for the AWS connection.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: String,
    aws_access_key_id: String,
    // secrets
    aws_secret_access_key: String,
}

/// A fairing that loads the AWS config and places the SES-backed
/// [`Notifier`] into managed state.
pub struct NotifierFairing;

#[rocket::async_trait]
impl Fairing for NotifierFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SES",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, mut rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load AWS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        // Construct the connection.
        let aws_config = SdkConfig::builder()
            .region(Region::new(config.aws_region))
            .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                config.aws_access_key_id,
                config.aws_secret_access_key,
                None,
                None,
                "rocket config",
            )))
            .build();
        let client = SesClient::new(&aws_config);
        info!("Loaded Amazon SES config");

        let sender_address = rocket
            .state::<Config>()
            .expect("ConfigFairing is attached before NotifierFairing")
            .sender_address()
            .to_string();
        let notifier: Box<dyn Notifier> = Box::new(SesNotifier::new(client, sender_address));

        // Manage the state.
        rocket = rocket.manage(notifier);
        Ok(rocket)
    }
}
