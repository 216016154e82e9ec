mod code;
mod totp;

pub use code::{Code, CODE_LENGTH};
pub use totp::{
    generate_totp, new_totp_secret, verify_totp, REGISTRATION_WINDOW, VOTING_DAY_WINDOW,
};
