pub mod admin;
pub mod auth;
pub mod ballot;
pub mod candidate;
pub mod casting;
pub mod matching;
pub mod mongodb;
pub mod notify;
pub mod otp;
pub mod session;
pub mod stats;
pub mod vault;
pub mod voter;
