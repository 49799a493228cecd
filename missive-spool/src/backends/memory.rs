use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use missive_common::{QueueId, QueueItem};

use crate::{SpoolError, r#trait::BackingStore};

/// In-memory backing store
///
/// Items live in a `HashMap` behind an `RwLock`. Nothing survives a restart,
/// so this is for development, tests, and deployments that accept losing
/// queued mail on a crash.
///
/// # Capacity Management
/// The store can be configured with a maximum capacity. Once full, `write`
/// fails with an error, which the queue surfaces to the enqueuing caller.
#[derive(Debug, Clone)]
pub struct MemoryBackingStore {
    pub(crate) items: Arc<RwLock<HashMap<QueueId, QueueItem>>>,
    /// Maximum number of items to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    /// Create a new empty memory-backed store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            capacity: None,
        }
    }

    /// Create a new memory-backed store with a capacity limit
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            capacity: Some(capacity),
        }
    }

    /// Get the current number of items in the store
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the configured capacity (None = unlimited)
    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

impl Default for MemoryBackingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, item: &QueueItem) -> crate::Result<()> {
        let mut items = self.items.write()?;

        if items.contains_key(&item.id()) {
            return Err(SpoolError::AlreadyExists(item.id()));
        }

        if let Some(cap) = self.capacity
            && items.len() >= cap
        {
            return Err(SpoolError::CapacityExceeded { capacity: cap });
        }

        items.insert(item.id(), item.clone());

        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<QueueId>> {
        let mut ids: Vec<_> = self.items.read()?.keys().copied().collect();

        // ULIDs are lexicographically sortable by creation time
        ids.sort();

        Ok(ids)
    }

    async fn read(&self, id: &QueueId) -> crate::Result<QueueItem> {
        self.items
            .read()?
            .get(id)
            .cloned()
            .ok_or(SpoolError::NotFound(*id))
    }

    async fn update(&self, item: &QueueItem) -> crate::Result<()> {
        let mut items = self.items.write()?;
        let slot = items
            .get_mut(&item.id())
            .ok_or(SpoolError::NotFound(item.id()))?;
        *slot = item.clone();
        Ok(())
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.items
            .write()?
            .remove(id)
            .ok_or(SpoolError::NotFound(*id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::sync::Arc;

    use chrono::Utc;
    use missive_common::{Message, QueueStatus};

    use super::*;

    fn create_test_item(subject: &str) -> QueueItem {
        let message = Message::builder()
            .to("alice@example.com")
            .subject(subject)
            .text("body")
            .build(Utc::now())
            .expect("valid message");
        QueueItem::new(QueueId::generate(), Arc::new(message), 3)
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_basic_operations() {
        let store = MemoryBackingStore::new();
        let item = create_test_item("hello");

        store.write(&item).await.expect("Failed to write");

        let ids = store.list().await.expect("Failed to list");
        assert_eq!(ids, vec![item.id()]);

        let read = store.read(&item.id()).await.expect("Failed to read");
        assert_eq!(read, item);

        store.delete(&item.id()).await.expect("Failed to delete");
        assert!(store.list().await.expect("Failed to list").is_empty());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_update() {
        let store = MemoryBackingStore::new();
        let mut item = create_test_item("update me");

        assert!(matches!(
            store.update(&item).await,
            Err(SpoolError::NotFound(_))
        ));

        store.write(&item).await.expect("Failed to write");
        item.claim().unwrap();
        store.update(&item).await.expect("Failed to update");

        let read = store.read(&item.id()).await.expect("Failed to read");
        assert_eq!(read.status(), QueueStatus::Sending);

        assert!(matches!(
            store.write(&item).await,
            Err(SpoolError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_memory_store_capacity_limit() {
        let store = MemoryBackingStore::with_capacity(2);

        store
            .write(&create_test_item("1"))
            .await
            .expect("First write should succeed");
        store
            .write(&create_test_item("2"))
            .await
            .expect("Second write should succeed");

        let third = create_test_item("3");
        assert!(matches!(
            store.write(&third).await,
            Err(SpoolError::CapacityExceeded { capacity: 2 })
        ));

        // After deleting one, we should be able to write again
        let ids = store.list().await.expect("Failed to list");
        store.delete(&ids[0]).await.expect("Failed to delete");
        assert!(store.write(&third).await.is_ok());
    }

    #[tokio::test]
    #[cfg_attr(miri, ignore = "Calls an unsupported method")]
    async fn test_item_ordering() {
        let store = MemoryBackingStore::new();

        let mut generated = Vec::new();
        for i in 0..10 {
            let item = create_test_item(&format!("message {i}"));
            generated.push(item.id());
            store.write(&item).await.expect("Failed to write");
        }

        let listed = store.list().await.expect("Failed to list");
        generated.sort();
        assert_eq!(generated, listed, "Listed ids should be sorted");
    }

    #[test]
    fn test_capacity_methods() {
        assert_eq!(MemoryBackingStore::new().capacity(), None);
        assert_eq!(MemoryBackingStore::with_capacity(100).capacity(), Some(100));
    }
}
