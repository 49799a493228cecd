use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use missive_common::{QueueId, QueueItem};
use tokio::sync::Notify;

use super::memory::MemoryBackingStore;
use crate::{SpoolError, r#trait::BackingStore};

/// Memory store with hooks for tests
///
/// Wakes waiters on every mutation, and can be switched into a mode where
/// every mutation fails as if the disk had gone away.
#[derive(Debug, Clone)]
pub struct TestBackingStore {
    pub(crate) inner: MemoryBackingStore,
    notify: Arc<Notify>,
    fail_writes: Arc<AtomicBool>,
}

impl Default for TestBackingStore {
    fn default() -> Self {
        Self {
            inner: MemoryBackingStore::new(),
            notify: Arc::new(Notify::new()),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl TestBackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `write`, `update` and `delete` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Wait for the next mutation
    pub async fn wait_for_change(&self) {
        self.notify.notified().await;
    }

    /// Wait until at least `expected` items are stored, with timeout
    ///
    /// # Errors
    /// Returns an error if the timeout is reached before the expected count
    pub async fn wait_for_count(
        &self,
        expected: usize,
        timeout: std::time::Duration,
    ) -> crate::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if self.inner.len() >= expected {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|e| SpoolError::Internal(format!("Timeout waiting for items: {e}")))?;
        Ok(())
    }

    pub fn clear(&self) {
        self.inner
            .items
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }

    pub fn item_count(&self) -> usize {
        self.inner.len()
    }

    /// Every stored item, oldest first
    ///
    /// # Errors
    /// If there is an issue with listing the items inside this store
    pub async fn items(&self) -> crate::Result<Vec<QueueItem>> {
        let ids = self.inner.list().await?;
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            items.push(self.inner.read(&id).await?);
        }
        Ok(items)
    }

    fn check_writable(&self) -> crate::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(SpoolError::Io(std::io::Error::other("injected write failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackingStore for TestBackingStore {
    async fn write(&self, item: &QueueItem) -> crate::Result<()> {
        self.check_writable()?;
        self.inner.write(item).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<QueueId>> {
        self.inner.list().await
    }

    async fn read(&self, id: &QueueId) -> crate::Result<QueueItem> {
        self.inner.read(id).await
    }

    async fn update(&self, item: &QueueItem) -> crate::Result<()> {
        self.check_writable()?;
        self.inner.update(item).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        self.check_writable()?;
        self.inner.delete(id).await?;
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used, clippy::unwrap_used)]

    use std::{sync::Arc, time::Duration};

    use chrono::Utc;
    use missive_common::Message;

    use super::*;

    fn item() -> QueueItem {
        let message = Message::builder()
            .to("bob@example.com")
            .text("hi")
            .build(Utc::now())
            .unwrap();
        QueueItem::new(QueueId::generate(), Arc::new(message), 3)
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let store = TestBackingStore::new();
        store.set_fail_writes(true);

        let result = store.write(&item()).await;
        assert!(matches!(result, Err(SpoolError::Io(_))));
        assert_eq!(store.item_count(), 0);

        store.set_fail_writes(false);
        store.write(&item()).await.unwrap();
        assert_eq!(store.item_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_count() {
        let store = TestBackingStore::new();
        let writer = store.clone();

        tokio::spawn(async move {
            for _ in 0..3 {
                writer.write(&item()).await.unwrap();
            }
        });

        store
            .wait_for_count(3, Duration::from_secs(5))
            .await
            .expect("items should arrive");
        assert_eq!(store.items().await.unwrap().len(), 3);

        store.clear();
        assert_eq!(store.item_count(), 0);
    }
}
