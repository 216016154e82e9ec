use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use data_encoding::HEXLOWER;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of the per-encryption nonce.
const IV_LENGTH: usize = 12;

/// A single encrypted field value as stored in the database: the ciphertext
/// and the initialisation vector it was encrypted under, both hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedField {
    pub ciphertext: String,
    pub iv: String,
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Malformed or tampered ciphertext")]
    CorruptCiphertext,
}

/// Field-level symmetric encryption for personally identifying data.
///
/// All fields are encrypted under one process-wide AES-256-GCM key derived
/// from the configured secret. Every call to [`Vault::encrypt_field`] draws a
/// fresh random nonce, so encrypting the same plaintext twice yields
/// different ciphertexts. Key rotation is not supported; rotating the
/// configured secret requires re-encrypting all stored fields.
pub struct Vault {
    cipher: Aes256Gcm,
}

impl Vault {
    /// Derive the field-encryption key from the configured secret.
    pub fn new(secret: &[u8]) -> Self {
        let key = Sha256::digest(secret);
        let cipher = Aes256Gcm::new_from_slice(&key).unwrap(); // SHA-256 output is always a valid key.
        Self { cipher }
    }

    /// Encrypt a single field value under a fresh random IV.
    pub fn encrypt_field(&self, plaintext: &str) -> EncryptedField {
        let mut iv = [0; IV_LENGTH];
        rand::thread_rng().fill_bytes(&mut iv);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .unwrap(); // GCM encryption of an in-memory buffer cannot fail.
        EncryptedField {
            ciphertext: HEXLOWER.encode(&ciphertext),
            iv: HEXLOWER.encode(&iv),
        }
    }

    /// Decrypt a single field value.
    ///
    /// Fails with [`VaultError::CorruptCiphertext`] if the IV or ciphertext
    /// is malformed, or if the authentication tag does not verify.
    pub fn decrypt_field(&self, field: &EncryptedField) -> Result<String, VaultError> {
        let iv = HEXLOWER
            .decode(field.iv.as_bytes())
            .map_err(|_| VaultError::CorruptCiphertext)?;
        if iv.len() != IV_LENGTH {
            return Err(VaultError::CorruptCiphertext);
        }
        let ciphertext = HEXLOWER
            .decode(field.ciphertext.as_bytes())
            .map_err(|_| VaultError::CorruptCiphertext)?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map_err(|_| VaultError::CorruptCiphertext)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::CorruptCiphertext)
    }

    /// One-way hash of a lookup value, hex-encoded.
    ///
    /// Deterministic, so only suitable for values compared by direct
    /// equality (e.g. the email hash). Values that must stay unlinkable at
    /// rest are encrypted instead.
    pub fn hash(&self, value: &str) -> String {
        HEXLOWER.encode(&Sha256::digest(value.as_bytes()))
    }
}
