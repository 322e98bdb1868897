//! Error types for chainstore
//!
//! This module defines the common error types used throughout the system.
//! Errors are `Clone` so a single write outcome can be shared by every
//! handle waiting on the same pending address.

use crate::types::RecordAddress;
use thiserror::Error;

/// Common result type for chainstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for chainstore
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // Backend errors
    #[error("record not found: {0}")]
    NotFound(RecordAddress),

    #[error("backend write failed: {0}")]
    BackendWrite(String),

    #[error("backend read failed: {0}")]
    BackendRead(String),

    #[error("record content too large: {size} bytes exceeds limit of {limit} bytes")]
    ContentTooLarge { size: usize, limit: usize },

    // Decode errors
    #[error("record {address} is not a {expected} record (found tag {found:?})")]
    DiscriminatorMismatch {
        address: RecordAddress,
        expected: String,
        found: String,
    },

    #[error("unknown record discriminator: {0:?}")]
    UnknownDiscriminator(String),

    #[error("malformed record {address}: {reason}")]
    MalformedRecord {
        address: RecordAddress,
        reason: String,
    },

    #[error("invalid record address: {0:?}")]
    InvalidAddress(String),

    // Scheduling errors
    #[error("pending address was abandoned before it resolved")]
    AddressAbandoned,

    // Value errors
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("integer overflow: {0}")]
    IntegerOverflow(String),

    #[error("division by zero: {0}")]
    DivisionByZero(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a backend write error
    pub fn backend_write(msg: impl Into<String>) -> Self {
        Self::BackendWrite(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a malformed record error
    pub fn malformed(address: RecordAddress, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            address,
            reason: reason.into(),
        }
    }

    /// Check if this error may succeed when the caller retries the write.
    /// The storage core itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendWrite(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this error means stored content was misread or corrupted
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::DiscriminatorMismatch { .. }
                | Self::UnknownDiscriminator(_)
                | Self::MalformedRecord { .. }
                | Self::InvalidAddress(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::backend_write("flood wait").is_retryable());
        assert!(!Error::BackendRead("gone".into()).is_retryable());
        assert!(!Error::UnknownDiscriminator("x".into()).is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::NotFound(RecordAddress::new(0, 1, 2)).is_not_found());
        assert!(!Error::AddressAbandoned.is_not_found());
    }

    #[test]
    fn test_error_decode() {
        let err = Error::DiscriminatorMismatch {
            address: RecordAddress::new(0, 0, 7),
            expected: "chunked bytes root".into(),
            found: "i".into(),
        };
        assert!(err.is_decode_error());
        assert_eq!(
            err.to_string(),
            "record 0|0|7 is not a chunked bytes root record (found tag \"i\")"
        );
        assert!(!Error::backend_write("x").is_decode_error());
    }
}
