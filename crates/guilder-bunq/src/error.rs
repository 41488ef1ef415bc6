use thiserror::Error;

/// Errors raised by the bunq integration
#[derive(Debug, Error)]
pub enum BunqError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("bunq returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not parse amount {0:?}")]
    ParseAmount(String),

    #[error("could not parse datetime {0:?}")]
    ParseDatetime(String),

    #[error("invalid IBAN in response: {0}")]
    InvalidIban(#[from] guilder_types::TypesError),

    #[error("invalid api context: {0}")]
    InvalidContext(#[from] serde_json::Error),

    #[error("response is missing {0}")]
    MissingField(&'static str),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<sled::Error> for BunqError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BunqError>;
