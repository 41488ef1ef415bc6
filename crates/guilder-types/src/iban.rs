//! IBAN parsing and validation
//!
//! Accepts the paper format with spaces, normalises to the compact
//! uppercase electronic format, and verifies the ISO 13616 mod-97 checksum.

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated International Bank Account Number in electronic format
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Iban(String);

impl Iban {
    /// Parse and validate an IBAN, tolerating spaces and lowercase input
    pub fn parse(input: &str) -> Result<Self> {
        let compact: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if compact.len() < 15 || compact.len() > 34 {
            return Err(TypesError::InvalidIban(input.to_string()));
        }

        let bytes = compact.as_bytes();
        let structure_ok = bytes[0].is_ascii_uppercase()
            && bytes[1].is_ascii_uppercase()
            && bytes[2].is_ascii_digit()
            && bytes[3].is_ascii_digit()
            && bytes[4..].iter().all(|b| b.is_ascii_alphanumeric());
        if !structure_ok {
            return Err(TypesError::InvalidIban(input.to_string()));
        }

        if mod97(&compact) != 1 {
            return Err(TypesError::InvalidIban(input.to_string()));
        }

        Ok(Self(compact))
    }

    /// The compact electronic-format string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-letter country code
    pub fn country_code(&self) -> &str {
        &self.0[..2]
    }
}

/// ISO 13616 checksum: move the first four characters to the end, map
/// letters to 10..35, and reduce the resulting number modulo 97.
fn mod97(compact: &str) -> u32 {
    let rearranged = compact[4..].bytes().chain(compact[..4].bytes());

    let mut rem: u32 = 0;
    for b in rearranged {
        if b.is_ascii_digit() {
            rem = (rem * 10 + (b - b'0') as u32) % 97;
        } else {
            let v = (b - b'A') as u32 + 10;
            rem = (rem * 100 + v) % 97;
        }
    }
    rem
}

impl fmt::Display for Iban {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Iban {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Iban> for String {
    fn from(iban: Iban) -> Self {
        iban.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_dutch_iban() {
        let iban = Iban::parse("NL91ABNA0417164300").unwrap();
        assert_eq!(iban.as_str(), "NL91ABNA0417164300");
        assert_eq!(iban.country_code(), "NL");
    }

    #[test]
    fn test_paper_format_is_normalised() {
        let iban = Iban::parse("nl91 abna 0417 1643 00").unwrap();
        assert_eq!(iban.as_str(), "NL91ABNA0417164300");
    }

    #[test]
    fn test_checksum_failure_is_rejected() {
        assert!(Iban::parse("NL91ABNA0417164301").is_err());
    }

    #[test]
    fn test_structure_failure_is_rejected() {
        assert!(Iban::parse("91NLABNA0417164300").is_err());
        assert!(Iban::parse("NL91").is_err());
        assert!(Iban::parse("").is_err());
    }

    #[test]
    fn test_german_iban() {
        assert!(Iban::parse("DE89370400440532013000").is_ok());
    }
}
