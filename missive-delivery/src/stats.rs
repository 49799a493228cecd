//! Delivery statistics derived from the queue

use chrono::{DateTime, Utc};
use missive_common::{QueueItem, QueueStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub queued: usize,
    pub sending: usize,
    pub sent: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `sent / (sent + failed) * 100`, or 100 when nothing has finished yet
    pub success_rate: f64,
    /// Mean of `delivered_at - created_at` in minutes, 0 when nothing was delivered
    pub average_delivery_minutes: f64,
    /// Items created on the current UTC calendar day
    pub total_today: usize,
}

impl DeliveryStats {
    /// Compute over a snapshot of the queue
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        reason = "Counts stay far below f64's exact integer range"
    )]
    pub fn compute(items: &[QueueItem], now: DateTime<Utc>) -> Self {
        let mut stats = Self {
            total: items.len(),
            ..Self::default()
        };

        let today = now.date_naive();
        let mut delivery_millis: i64 = 0;
        let mut delivered: i64 = 0;

        for item in items {
            match item.status() {
                QueueStatus::Queued => stats.queued += 1,
                QueueStatus::Sending => stats.sending += 1,
                QueueStatus::Sent => stats.sent += 1,
                QueueStatus::Failed => stats.failed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }

            if let Some(delivered_at) = item.delivered_at() {
                delivery_millis = delivery_millis
                    .saturating_add((delivered_at - item.created_at()).num_milliseconds());
                delivered += 1;
            }

            if item.created_at().date_naive() == today {
                stats.total_today += 1;
            }
        }

        let finished = stats.sent + stats.failed;
        stats.success_rate = if finished == 0 {
            100.0
        } else {
            stats.sent as f64 / finished as f64 * 100.0
        };

        if delivered > 0 {
            stats.average_delivery_minutes = delivery_millis as f64 / delivered as f64 / 60_000.0;
        }

        stats
    }
}
