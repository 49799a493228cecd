//! Fan-out of delivery events to observers

use missive_common::{
    DeliveryEvent,
    audit::{self, AuditConfig},
};
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 1024;

/// Publishes every persisted state change to the audit log and to subscribers
///
/// Subscribers that fall behind miss events rather than slowing delivery.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DeliveryEvent>,
    audit: AuditConfig,
}

impl EventBus {
    #[must_use]
    pub fn new(audit: AuditConfig) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender, audit }
    }

    pub fn publish(&self, event: DeliveryEvent) {
        audit::record(&self.audit, &event);
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}
