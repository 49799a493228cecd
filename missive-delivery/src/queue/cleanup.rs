//! Retention cleanup
//!
//! Terminal items are kept for a retention window so observers can still
//! query them, then purged. `QUEUED` and `SENDING` items are never touched.

use chrono::Duration;
use missive_common::tracing::{debug, warn};

use super::DeliveryQueue;

impl DeliveryQueue {
    /// Remove terminal items whose last state change is older than `retention`
    ///
    /// Returns the number of items removed. An item whose durable record
    /// cannot be deleted is kept and retried on the next pass.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn purge_expired(&self, retention: Duration) -> usize {
        let Some(cutoff) = self.clock.now().checked_sub_signed(retention) else {
            return 0;
        };
        let mut purged = 0;

        for slot in self.slots() {
            let item = slot.lock().await;

            if !item.status().is_terminal() || item.terminal_since() >= cutoff {
                continue;
            }

            match self.remove(&item).await {
                Ok(()) => {
                    debug!(queue_id = %item.id(), status = %item.status(), "Purged queue item");
                    purged += 1;
                }
                Err(e) => {
                    warn!(
                        queue_id = %item.id(),
                        error = %e,
                        "Failed to purge queue item, will retry on next cleanup"
                    );
                }
            }
        }

        purged
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::Arc;

    use missive_common::{Clock, ManualClock, Message, QueueStatus};
    use missive_spool::TestBackingStore;

    use super::*;

    #[tokio::test]
    async fn test_purge_only_old_terminal_items() {
        let store = TestBackingStore::new();
        let clock = ManualClock::default();
        let queue = DeliveryQueue::new(Arc::new(store.clone()), Arc::new(clock.clone()));

        let message = || {
            Arc::new(
                Message::builder()
                    .to("alice@example.com")
                    .text("hi")
                    .build(clock.now())
                    .unwrap(),
            )
        };

        let queued = queue.enqueue(message(), 3).await.unwrap();
        let cancelled = queue.enqueue(message(), 3).await.unwrap();
        let sent = queue.enqueue(message(), 3).await.unwrap();

        queue.cancel(&cancelled.id()).await.unwrap();

        clock.advance(Duration::days(20));
        queue.claim(&sent.id()).await.unwrap();
        let now = clock.now();
        queue
            .update(&sent.id(), |item| item.mark_sent("primary", None, now))
            .await
            .unwrap();

        clock.advance(Duration::days(15));
        let purged = queue.purge_expired(Duration::days(30)).await;

        assert_eq!(purged, 1);
        assert!(queue.get(&cancelled.id()).await.is_none());
        assert_eq!(
            queue.get(&queued.id()).await.unwrap().status(),
            QueueStatus::Queued
        );
        assert_eq!(
            queue.get(&sent.id()).await.unwrap().status(),
            QueueStatus::Sent
        );
        assert_eq!(store.item_count(), 2);
    }

    #[tokio::test]
    async fn test_purge_keeps_item_when_delete_fails() {
        let store = TestBackingStore::new();
        let clock = ManualClock::default();
        let queue = DeliveryQueue::new(Arc::new(store.clone()), Arc::new(clock.clone()));

        let message = Arc::new(
            Message::builder()
                .to("alice@example.com")
                .text("hi")
                .build(clock.now())
                .unwrap(),
        );
        let item = queue.enqueue(message, 3).await.unwrap();
        queue.cancel(&item.id()).await.unwrap();

        clock.advance(Duration::days(31));
        store.set_fail_writes(true);

        assert_eq!(queue.purge_expired(Duration::days(30)).await, 0);
        assert!(queue.get(&item.id()).await.is_some());
    }
}
