//! Typed error handling for delivery operations.
//!
//! Transport failures are classified as permanent or temporary for logging
//! and reporting, but the cascade treats both the same way: every failed
//! cascade consumes one attempt of the retry budget.

use std::time::Duration;

use missive_common::{QueueId, TransitionError};
use missive_spool::SpoolError;
use thiserror::Error;

/// Top-level delivery error type.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Transport configuration could not be turned into a working transport.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error (task failure, missing wiring).
    #[error("System error: {0}")]
    System(String),
}

/// Errors raised by the queue store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The durable write failed. The in-memory state was left untouched.
    #[error("Storage failure: {0}")]
    Storage(#[from] SpoolError),

    #[error("Queue item not found: {0}")]
    NotFound(QueueId),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Failure of a single transport call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Recipient rejected: {0}")]
    RejectedRecipient(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    /// The provider answered, but not with success.
    #[error("Provider error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },

    #[error("Transport misconfigured: {0}")]
    Configuration(String),

    /// The queued message could not be expressed in the transport's format.
    #[error("Message could not be built: {0}")]
    MessageBuild(String),
}

impl TransportError {
    /// Would sending the same message again through this transport fail the same way?
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_)
                | Self::RejectedRecipient(_)
                | Self::Configuration(_)
                | Self::MessageBuild(_)
        )
    }

    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        !self.is_permanent()
    }
}

/// Errors raised while ingesting provider callbacks.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown transport: {0}")]
    UnknownTransport(String),

    /// Applying a valid event failed to persist.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl WebhookError {
    /// Authentication problems are rejected without touching any state.
    #[must_use]
    pub const fn is_unauthenticated(&self) -> bool {
        matches!(self, Self::MissingSignature | Self::InvalidSignature)
    }
}
