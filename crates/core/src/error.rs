use thiserror::Error;

pub type WavelineResult<T> = Result<T, DispatchError>;

/// Failures reported by the persistence collaborator.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Account delay must be at least 1 second")]
    InvalidDelay,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Campaign-level dispatch failures. Per-recipient send failures are never
/// raised; they land in the report's outcome list instead.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("No available sender accounts")]
    NoAvailableSenders,

    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Recipient list is empty")]
    NoRecipients,

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}
