use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

/// RFC 6238 time step in seconds.
const STEP_SECONDS: u64 = 30;

/// Number of code digits produced by authenticator apps.
const DIGITS: u32 = 6;

/// Step-window tolerance during registration (±1 step).
pub const REGISTRATION_WINDOW: u64 = 1;

/// Step-window tolerance on voting day (±2 steps), accommodating the delay
/// between the notification email and the voter sitting down to vote.
pub const VOTING_DAY_WINDOW: u64 = 2;

/// Verify a submitted TOTP code against a base32-encoded shared secret at
/// the given unix time, accepting codes up to `window` steps either side of
/// the current one.
///
/// A malformed secret or code simply fails verification; no distinct error
/// is surfaced to the caller.
pub fn verify_totp(secret: &str, code: &str, unix_time: u64, window: u64) -> bool {
    let key = match decode_secret(secret) {
        Some(key) => key,
        None => return false,
    };
    let step = unix_time / STEP_SECONDS;
    let start = step.saturating_sub(window);
    (start..=step + window).any(|counter| hotp(&key, counter) == code)
}

/// Generate the code for the current time step, or `None` if the secret is
/// not valid base32.
pub fn generate_totp(secret: &str, unix_time: u64) -> Option<String> {
    let key = decode_secret(secret)?;
    Some(hotp(&key, unix_time / STEP_SECONDS))
}

/// Generate a fresh 160-bit shared secret, base32-encoded for entry into an
/// authenticator app.
pub fn new_totp_secret() -> String {
    let mut bytes = [0; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

/// Decode an authenticator secret. Apps emit unpadded base32, but tolerate
/// padding, whitespace, and lowercase.
fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let normalised: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD.decode(normalised.as_bytes()).ok()
}

/// RFC 4226 HMAC-based one-time password for a single counter value.
fn hotp(key: &[u8], counter: u64) -> String {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    // Dynamic truncation.
    let offset = (digest[digest.len() - 1] & 0xf) as usize;
    let binary = u32::from_be_bytes([
        digest[offset] & 0x7f,
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    format!("{:06}", binary % 10u32.pow(DIGITS))
}
