//! Errors raised by backing stores

use std::io;

use missive_common::QueueId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpoolError {
    /// Reading, writing, renaming or removing a record file failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Queue item not found: {0}")]
    NotFound(QueueId),

    /// Writes are for new items only; changes go through `update`
    #[error("Queue item already exists: {0}")]
    AlreadyExists(QueueId),

    #[error("Spool capacity exceeded: {capacity} items")]
    CapacityExceeded { capacity: usize },

    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Lock poisoning, waiting on the test store
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// The record decoded, but trailing bytes were left over
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

/// Rejections of a configured spool location
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),

    #[error("Invalid spool path: {0}")]
    InvalidPath(String),
}

pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_keeps_its_message() {
        let spool_err = SpoolError::from(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "spool directory is read-only",
        ));

        assert!(matches!(spool_err, SpoolError::Io(_)));
        assert!(spool_err.to_string().contains("read-only"));
    }

    #[test]
    fn test_capacity_display() {
        let error = SpoolError::CapacityExceeded { capacity: 2 };
        assert_eq!(error.to_string(), "Spool capacity exceeded: 2 items");
    }

    #[test]
    fn test_validation_wraps() {
        let error: SpoolError = ValidationError::InvalidPath("relative".into()).into();
        assert!(matches!(error, SpoolError::Validation(_)));
    }
}
