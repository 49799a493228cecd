//! Error types for the missive-common crate.

use thiserror::Error;

/// Errors raised while building a [`crate::Message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// A message must have at least one `to` recipient.
    #[error("Message has no primary recipients")]
    NoRecipients,

    /// A recipient address is empty or lacks an `@`.
    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    /// Neither HTML nor text content was supplied.
    #[error("Message has no content")]
    NoContent,
}

/// A state change was requested that the queue item state machine forbids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Cannot {action} an item that is {from}")]
pub struct TransitionError {
    pub from: crate::QueueStatus,
    pub action: &'static str,
}
