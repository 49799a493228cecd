//! Shared types for the missive delivery pipeline
//!
//! Everything that more than one crate needs to agree on lives here: the
//! immutable [`Message`], the mutable [`QueueItem`] and its state machine,
//! the injectable [`Clock`], delivery events consumed by observers, and the
//! logging setup.

pub mod audit;
pub mod clock;
pub mod error;
pub mod event;
pub mod item;
pub mod logging;
pub mod message;
pub mod render;
pub mod status;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MessageError, TransitionError};
pub use event::DeliveryEvent;
pub use item::{FailedAttempt, QueueId, QueueItem, WebhookEventRecord};
pub use message::{Attachment, Message, MessageBuilder, MessageId, Priority, Recipients};
pub use status::QueueStatus;
pub use tracing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}
