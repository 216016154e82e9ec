#[macro_use]
extern crate rocket;

use rocket::{Build, Rocket};

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;

use config::{ConfigFairing, DatabaseFairing, NotifierFairing};
use logging::LoggerFairing;

/// Assemble the Rocket instance. Fairing order matters: the config must be
/// in managed state before the database and notifier fairings run.
pub fn build() -> Rocket<Build> {
    rocket::build()
        .mount("/", api::routes())
        .attach(ConfigFairing)
        .attach(DatabaseFairing)
        .attach(NotifierFairing)
        .attach(LoggerFairing)
}
