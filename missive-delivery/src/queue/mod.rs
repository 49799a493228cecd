//! The queue store
//!
//! Source of truth for delivery state. Every item sits behind its own async
//! mutex; [`DeliveryQueue::claim`] and [`DeliveryQueue::update`] hold that
//! lock across the durable write, so writers to the same item are totally
//! ordered while different items never contend.

pub mod cleanup;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use missive_common::{
    Clock, Message, QueueId, QueueItem, QueueStatus, TransitionError, internal,
    tracing::{error, warn},
};
use missive_spool::{BackingStore, SpoolError};
use tokio::sync::Mutex;

use crate::error::QueueError;

type Slot = Arc<Mutex<QueueItem>>;

#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    items: Arc<DashMap<QueueId, Slot>>,
    /// Provider tracking id to queue item
    tracking: Arc<DashMap<String, QueueId>>,
    store: Arc<dyn BackingStore>,
    clock: Arc<dyn Clock>,
}

impl DeliveryQueue {
    #[must_use]
    pub fn new(store: Arc<dyn BackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            items: Arc::new(DashMap::new()),
            tracking: Arc::new(DashMap::new()),
            store,
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Load every persisted item
    ///
    /// Items caught in `SENDING` by a crash go back to `QUEUED` so they are
    /// sent again. Records that cannot be decoded are logged and skipped.
    ///
    /// # Errors
    /// If the store cannot be listed, or a recovered item cannot be re-persisted.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let ids = self.store.list().await?;
        let mut restored = 0;

        for id in ids {
            let mut item = match self.store.read(&id).await {
                Ok(item) => item,
                Err(e) => {
                    error!(queue_id = %id, error = %e, "Skipping unreadable queue item");
                    continue;
                }
            };

            if item.status() == QueueStatus::Sending {
                warn!(
                    queue_id = %id,
                    "Queue item was in flight at shutdown, returning it to the queue"
                );
                item.requeue_interrupted()?;
                self.store.update(&item).await?;
            }

            self.index(&item);
            self.items.insert(id, Arc::new(Mutex::new(item)));
            restored += 1;
        }

        internal!(level = INFO, "Restored {restored} queue items");

        Ok(restored)
    }

    /// Durably add a message, returning its queue id
    ///
    /// Nothing is visible to the scheduler until the write has succeeded.
    ///
    /// # Errors
    /// If the backing store rejects the write.
    #[tracing::instrument(level = "debug", skip(self, message), fields(message_id = %message.id()))]
    pub async fn enqueue(
        &self,
        message: Arc<Message>,
        max_retries: u32,
    ) -> Result<QueueItem, QueueError> {
        let item = QueueItem::new(QueueId::generate(), message, max_retries);

        self.store.write(&item).await?;
        self.items
            .insert(item.id(), Arc::new(Mutex::new(item.clone())));

        Ok(item)
    }

    /// Snapshot of one item
    pub async fn get(&self, id: &QueueId) -> Option<QueueItem> {
        let slot = self.slot(id)?;
        let item = slot.lock().await;
        Some(item.clone())
    }

    /// Items the scheduler may dispatch at `now`
    ///
    /// Highest priority first, then oldest first. Items whose lock is held
    /// are being worked on and are skipped.
    pub fn list_ready(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        let mut ready: Vec<QueueItem> = self
            .slots()
            .into_iter()
            .filter_map(|slot| {
                slot.try_lock()
                    .ok()
                    .filter(|item| item.is_ready(now))
                    .map(|item| item.clone())
            })
            .collect();

        ready.sort_by(|a, b| {
            b.message()
                .priority()
                .cmp(&a.message().priority())
                .then_with(|| a.created_at().cmp(&b.created_at()))
                .then_with(|| a.id().cmp(&b.id()))
        });

        ready
    }

    /// Atomically move an item from `QUEUED` to `SENDING`
    ///
    /// Returns `Ok(false)` when the item is in any other state or unknown;
    /// the caller must then not send it.
    ///
    /// # Errors
    /// If persisting the claim fails. The item stays `QUEUED`.
    #[tracing::instrument(level = "trace", skip(self), fields(queue_id = %id))]
    pub async fn claim(&self, id: &QueueId) -> Result<bool, QueueError> {
        match self.update(id, QueueItem::claim).await {
            Ok(()) => Ok(true),
            Err(QueueError::Transition(_) | QueueError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Apply one mutation transactionally
    ///
    /// The mutator runs on a copy under the item lock. If it succeeds the copy
    /// is persisted and only then becomes the live item; if either step fails
    /// the live item is unchanged.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `Transition` if the mutator refuses, or
    /// `Storage` if the durable write fails.
    pub async fn update<F, R>(&self, id: &QueueId, mutate: F) -> Result<R, QueueError>
    where
        F: FnOnce(&mut QueueItem) -> Result<R, TransitionError>,
    {
        let slot = self.slot(id).ok_or(QueueError::NotFound(*id))?;
        let mut live = slot.lock().await;

        let mut next = live.clone();
        let result = mutate(&mut next)?;

        if next != *live {
            self.store.update(&next).await?;
            if live.tracking_id() != next.tracking_id() {
                self.unindex(&live);
            }
            self.index(&next);
            *live = next;
        }

        Ok(result)
    }

    /// `QUEUED` -> `CANCELLED`. False if the item is unknown or not `QUEUED`.
    ///
    /// # Errors
    /// If persisting the cancellation fails.
    pub async fn cancel(&self, id: &QueueId) -> Result<bool, QueueError> {
        refused_as_false(self.update(id, QueueItem::cancel).await)
    }

    /// `FAILED` -> `QUEUED` with a fresh retry budget. False unless `FAILED`.
    ///
    /// # Errors
    /// If persisting the reset fails.
    pub async fn manual_retry(&self, id: &QueueId) -> Result<bool, QueueError> {
        refused_as_false(self.update(id, QueueItem::reset_for_retry).await)
    }

    #[must_use]
    pub fn find_by_tracking_id(&self, tracking_id: &str) -> Option<QueueId> {
        self.tracking.get(tracking_id).map(|entry| *entry.value())
    }

    /// Snapshot of every item, oldest first
    pub async fn snapshot(&self) -> Vec<QueueItem> {
        let mut items = Vec::with_capacity(self.items.len());
        for slot in self.slots() {
            items.push(slot.lock().await.clone());
        }
        items.sort_by_key(QueueItem::id);
        items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop an item from the store and the index
    ///
    /// The durable record is deleted first; if that fails the item stays.
    async fn remove(&self, item: &QueueItem) -> Result<(), QueueError> {
        match self.store.delete(&item.id()).await {
            Ok(()) | Err(SpoolError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        self.items.remove(&item.id());
        self.unindex(item);

        Ok(())
    }

    fn index(&self, item: &QueueItem) {
        if let Some(tracking_id) = item.tracking_id() {
            self.tracking.insert(tracking_id.to_string(), item.id());
        }
    }

    /// Forget the item's tracking id, unless it now belongs to another item
    fn unindex(&self, item: &QueueItem) {
        if let Some(tracking_id) = item.tracking_id() {
            self.tracking
                .remove_if(tracking_id, |_, id| *id == item.id());
        }
    }

    fn slot(&self, id: &QueueId) -> Option<Slot> {
        self.items.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Clone the slot handles out so no map shard lock is held across an await
    fn slots(&self) -> Vec<Slot> {
        self.items
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

fn refused_as_false(result: Result<(), QueueError>) -> Result<bool, QueueError> {
    match result {
        Ok(()) => Ok(true),
        Err(QueueError::Transition(_) | QueueError::NotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
