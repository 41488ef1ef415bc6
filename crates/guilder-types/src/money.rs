//! Money as integer minor units plus an ISO-4217 currency code
//!
//! There is deliberately no cross-currency arithmetic: two `Money` values
//! are equal only when both the amount and the currency match, and callers
//! that want to compare amounts must check the currency first.

use crate::{Result, TypesError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// ISO-4217 currency code, stored uppercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse a three-letter ISO-4217 code
    pub fn new(code: &str) -> Result<Self> {
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(TypesError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Euro, the currency every bunq account settles in
    pub fn eur() -> Self {
        Self("EUR".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An amount of money in minor units (cents for EUR)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: Currency,
}

impl Money {
    pub fn new(amount: i64, currency: Currency) -> Self {
        Self { amount, currency }
    }

    /// Shorthand for whole minor units of EUR
    pub fn eur(amount: i64) -> Self {
        Self::new(amount, Currency::eur())
    }

    /// Minor-unit amount
    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.amount > 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    /// True when the minor-unit amounts differ, treating a currency change
    /// as a difference as well
    pub fn differs_from(&self, other: &Money) -> bool {
        self != other
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.amount / 100;
        let cents = (self.amount % 100).abs();
        write!(f, "{}.{:02} {}", whole, cents, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalises_case() {
        assert_eq!(Currency::new("eur").unwrap(), Currency::eur());
    }

    #[test]
    fn test_currency_rejects_bad_codes() {
        assert!(Currency::new("EU").is_err());
        assert!(Currency::new("EUR0").is_err());
        assert!(Currency::new("€€€").is_err());
    }

    #[test]
    fn test_equality_includes_currency() {
        let eur = Money::eur(999);
        let usd = Money::new(999, Currency::new("USD").unwrap());
        assert_ne!(eur, usd);
        assert!(eur.differs_from(&usd));
        assert!(!eur.differs_from(&Money::eur(999)));
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::eur(1234).to_string(), "12.34 EUR");
        assert_eq!(Money::eur(-905).to_string(), "-9.05 EUR");
    }
}
