//! Outbound transports
//!
//! Each provider (an HTTP mail API, an SMTP relay) sits behind the same
//! [`Transport`] contract so the dispatcher can cascade across them without
//! knowing which is which.

pub mod config;
pub mod http;
pub mod registry;
pub mod smtp;

use async_trait::async_trait;
use missive_common::QueueItem;

pub use config::{Credential, HttpTransportConfig, SmtpTls, SmtpTransportConfig, TransportConfig, TransportKind};
pub use http::HttpTransport;
pub use registry::{TransportEntry, TransportRegistry};
pub use smtp::SmtpTransport;

use crate::error::TransportError;

/// What a transport hands back when it accepted a message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportReceipt {
    /// Provider-side id, later used to match webhook callbacks
    pub tracking_id: Option<String>,
}

/// A single outbound channel
///
/// Implementations classify their own failures; callers bound every call
/// with a timeout, so `send` need not enforce one itself.
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Hand the item's message to the provider
    ///
    /// # Errors
    /// Any failure to get the message accepted, classified as a [`TransportError`].
    async fn send(&self, item: &QueueItem) -> Result<TransportReceipt, TransportError>;
}
