use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MessageId, Priority, QueueId, QueueStatus};

/// A change in delivery state that observers may want to know about
///
/// Published by the delivery service after the change has been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryEvent {
    Enqueued {
        queue_id: QueueId,
        message_id: MessageId,
        priority: Priority,
        recipients: Vec<String>,
        scheduled_for: Option<DateTime<Utc>>,
    },
    Sent {
        queue_id: QueueId,
        provider: String,
        tracking_id: Option<String>,
        attempt: u32,
    },
    RetryScheduled {
        queue_id: QueueId,
        attempt: u32,
        next_retry_at: DateTime<Utc>,
        reason: String,
    },
    Failed {
        queue_id: QueueId,
        attempts: u32,
        reason: String,
    },
    Cancelled {
        queue_id: QueueId,
    },
    RetryRequested {
        queue_id: QueueId,
    },
    WebhookRecorded {
        queue_id: QueueId,
        tracking_id: String,
        event: String,
    },
    /// A provider callback overrode an earlier outcome
    Corrected {
        queue_id: QueueId,
        from: QueueStatus,
        to: QueueStatus,
        reason: String,
    },
}

impl DeliveryEvent {
    #[must_use]
    pub const fn queue_id(&self) -> QueueId {
        match self {
            Self::Enqueued { queue_id, .. }
            | Self::Sent { queue_id, .. }
            | Self::RetryScheduled { queue_id, .. }
            | Self::Failed { queue_id, .. }
            | Self::Cancelled { queue_id }
            | Self::RetryRequested { queue_id }
            | Self::WebhookRecorded { queue_id, .. }
            | Self::Corrected { queue_id, .. } => *queue_id,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "Enqueued",
            Self::Sent { .. } => "Sent",
            Self::RetryScheduled { .. } => "RetryScheduled",
            Self::Failed { .. } => "Failed",
            Self::Cancelled { .. } => "Cancelled",
            Self::RetryRequested { .. } => "RetryRequested",
            Self::WebhookRecorded { .. } => "WebhookRecorded",
            Self::Corrected { .. } => "Corrected",
        }
    }
}
