use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the event-sourcing core
#[derive(Debug, Error)]
pub enum EventSourcingError {
    #[error("version conflict on aggregate {aggregate_id}: expected {expected}, found {actual}")]
    VersionConflict {
        aggregate_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("append on aggregate {aggregate_id} still conflicting after {attempts} attempts")]
    ConflictRetriesExhausted { aggregate_id: Uuid, attempts: usize },

    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    #[error("unknown aggregate type: {0}")]
    UnknownAggregateType(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sled::Error> for EventSourcingError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EventSourcingError>;
