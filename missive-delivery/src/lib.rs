//! Delivery queue, provider cascade and scheduler
//!
//! This crate provides functionality to:
//! - Durably queue rendered messages and track their delivery state
//! - Dispatch ready items through a priority-ordered cascade of transports
//! - Back off and retry failed attempts, up to a per-priority budget
//! - Ingest provider webhooks that correct delivery outcomes after the fact
//! - Derive delivery statistics for observers

pub mod error;
pub mod events;
pub mod policy;
pub mod processor;
pub mod queue;
pub mod service;
pub mod stats;
pub mod transport;
pub mod webhook;

pub use error::{DeliveryError, QueueError, TransportError, WebhookError};
pub use events::EventBus;
pub use policy::RetryPolicy;
pub use processor::{DispatchOutcome, Dispatcher, Scheduler, SchedulerConfig};
pub use queue::DeliveryQueue;
pub use service::{DeliveryQueryService, DeliveryService, ImmediateOutcome};
pub use stats::DeliveryStats;
pub use transport::{
    Credential, Transport, TransportConfig, TransportEntry, TransportKind, TransportReceipt,
    TransportRegistry,
};
pub use webhook::{WebhookIngest, WebhookSummary};
