use log::{error, warn};
use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy for the registration, matching, and casting pipeline.
///
/// Validation and business-rule variants carry messages that are safe to
/// show to the caller. Infrastructure variants (`Db`, `CorruptCiphertext`,
/// `Jwt`) are logged with full detail and collapse to an opaque server
/// failure at the HTTP boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Bad request: {0}")]
    Validation(String),
    #[error("Session not found. Please restart the registration process.")]
    SessionNotFound,
    #[error("Invalid or expired verification code")]
    InvalidOrExpiredCode,
    #[error("Invalid or expired ballot token")]
    InvalidOrExpiredToken,
    /// Deliberately undifferentiated across the three voting-day factors.
    #[error("Invalid credentials. Please check your access code, national identity number, and authenticator code.")]
    InvalidCredentials,
    #[error("Both email and authenticator app verification must be completed first")]
    IncompleteVerification,
    #[error("A voter with this email address is already registered")]
    DuplicateVoter,
    #[error("This voter has already cast their ballot")]
    AlreadyVoted,
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Malformed or tampered ciphertext")]
    CorruptCiphertext,
    #[error(transparent)]
    Notify(#[from] crate::model::notify::NotifyError),
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl From<crate::model::vault::VaultError> for Error {
    fn from(_: crate::model::vault::VaultError) -> Self {
        Self::CorruptCiphertext
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        Err(match self {
            Self::Validation(_)
            | Self::InvalidOrExpiredCode
            | Self::InvalidOrExpiredToken
            | Self::IncompleteVerification => {
                warn!("{self}");
                Status::BadRequest
            }
            Self::SessionNotFound | Self::NotFound(_) => {
                warn!("{self}");
                Status::NotFound
            }
            Self::InvalidCredentials | Self::Unauthorized(_) => {
                warn!("{self}");
                Status::Unauthorized
            }
            Self::DuplicateVoter | Self::AlreadyVoted => {
                warn!("{self}");
                Status::Conflict
            }
            // Never leak ciphertext, key material, or store detail.
            Self::CorruptCiphertext => {
                error!("Field decryption failed: corrupt ciphertext");
                Status::InternalServerError
            }
            Self::Db(ref err) => {
                error!("Database error: {err}");
                Status::InternalServerError
            }
            Self::Notify(ref err) => {
                error!("{err}");
                Status::InternalServerError
            }
            Self::Jwt(ref err) => {
                warn!("Auth token rejected: {err}");
                Status::Unauthorized
            }
        })
    }
}
