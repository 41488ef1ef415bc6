//! Guilder foundation types
//!
//! Strongly-typed building blocks shared by every other crate:
//!
//! - Nominal UUID identifiers (`UserId`, `MonetaryAccountId`, ...) that
//!   cannot be mixed up at compile time
//! - `Money` as integer minor units plus an ISO-4217 currency code
//! - `Iban` with structural and mod-97 validation
//! - `Period` for ISO-8601 recurrence periods
//! - `TransactionParty`, `Institution` and `Source` enums

pub mod iban;
pub mod identity;
pub mod money;
pub mod period;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub use iban::Iban;
pub use identity::{
    AuthId, MonetaryAccountId, RecurringTransactionId, RecurringTransactionInstanceId, SyncId,
    TransactionId, UserId,
};
pub use money::{Currency, Money};
pub use period::Period;

/// Errors raised while constructing foundation values
#[derive(Debug, Error)]
pub enum TypesError {
    #[error("invalid IBAN: {0}")]
    InvalidIban(String),

    #[error("invalid ISO-8601 period: {0}")]
    InvalidPeriod(String),

    #[error("invalid currency code: {0}")]
    InvalidCurrency(String),
}

pub type Result<T> = std::result::Result<T, TypesError>;

/// Upstream institution a record originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Institution {
    Bunq,
}

impl fmt::Display for Institution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bunq => write!(f, "Bunq"),
        }
    }
}

/// Origin of a recurring-transaction series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    Schedule,
    DirectDebit,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schedule => write!(f, "Schedule"),
            Self::DirectDebit => write!(f, "DirectDebit"),
        }
    }
}

/// One side of a transaction. Both fields are optional and their absence is
/// meaningful: a missing IBAN is not the same as an empty one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionParty {
    pub iban: Option<Iban>,
    pub name: Option<String>,
}

impl TransactionParty {
    pub fn new(iban: Option<Iban>, name: Option<String>) -> Self {
        Self { iban, name }
    }
}
