use std::fmt::Display;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_LENGTH: usize = 6;

/// A 6-digit one-time code, used both for registration email verification
/// and as the voting-day access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Code {
    digits: [u8; CODE_LENGTH],
}

impl Code {
    /// Generate a uniformly random code.
    pub fn random() -> Self {
        let digit_dist = Uniform::from(0..=9);
        let mut rng = rand::thread_rng();
        let mut digits = [0; CODE_LENGTH];
        for digit in &mut digits {
            *digit = digit_dist.sample(&mut rng);
        }
        Self { digits }
    }
}

impl Display for Code {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for digit in self.digits {
            write!(formatter, "{digit}")?;
        }
        Ok(())
    }
}

impl FromStr for Code {
    type Err = ParseCodeError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        if string.len() != CODE_LENGTH {
            return Err(ParseCodeError::InvalidLength(string.len()));
        }
        let mut digits = [0; CODE_LENGTH];
        for (digit, c) in digits.iter_mut().zip(string.chars()) {
            *digit = c
                .to_digit(10)
                .map(|d| d as u8)
                .ok_or(ParseCodeError::InvalidChar(c))?;
        }
        Ok(Self { digits })
    }
}

impl TryFrom<String> for Code {
    type Error = ParseCodeError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        string.parse()
    }
}

impl From<Code> for String {
    fn from(code: Code) -> Self {
        code.to_string()
    }
}

#[derive(Debug, Error)]
pub enum ParseCodeError {
    #[error("code must contain exactly {CODE_LENGTH} characters, found {0}")]
    InvalidLength(usize),
    #[error("code must contain only digits, found '{0}'")]
    InvalidChar(char),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_via_string() {
        let code = Code::random();
        let string = code.to_string();
        assert_eq!(CODE_LENGTH, string.len());
        assert_eq!(code, string.parse().unwrap());
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(
            "12345".parse::<Code>(),
            Err(ParseCodeError::InvalidLength(5))
        ));
        assert!(matches!(
            "12a456".parse::<Code>(),
            Err(ParseCodeError::InvalidChar('a'))
        ));
    }

    #[test]
    fn parse_accepts_leading_zeros() {
        let code = "004829".parse::<Code>().unwrap();
        assert_eq!("004829", code.to_string());
    }
}
