//! Channel client error types

use thiserror::Error;

/// Error returned by a single backend channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// No record with this id
    #[error("record {0} not found")]
    NotFound(u64),

    /// Record exists but is a text record
    #[error("record {0} is a text record, not an attachment")]
    NotABlob(u64),

    /// Record exists but is an attachment
    #[error("record {0} is an attachment, not a text record")]
    NotText(u64),

    /// Text content over the channel limit
    #[error("content of {size} bytes exceeds text limit of {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    /// The backend refused a create or edit
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The backend could not be reached
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Result type for channel operations
pub type ClientResult<T> = Result<T, ClientError>;
