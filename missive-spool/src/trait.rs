use async_trait::async_trait;
use missive_common::{QueueId, QueueItem};

/// Durable storage for [`QueueItem`] records, one record per item
///
/// Implementations must have written the record durably by the time a call
/// returns `Ok`. The queue holds the item's lock across these calls, so an
/// implementation never sees two concurrent writes for the same id.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Persist a new item
    ///
    /// # Errors
    /// `AlreadyExists` if a record with the same id is present, otherwise
    /// any I/O or serialization failure.
    async fn write(&self, item: &QueueItem) -> crate::Result<()>;

    /// Ids of every stored item, oldest first
    ///
    /// # Errors
    /// If the underlying storage cannot be enumerated.
    async fn list(&self) -> crate::Result<Vec<QueueId>>;

    /// # Errors
    /// `NotFound` if there is no such record, otherwise any I/O or
    /// deserialization failure.
    async fn read(&self, id: &QueueId) -> crate::Result<QueueItem>;

    /// Replace an existing record
    ///
    /// # Errors
    /// `NotFound` if there is no such record, otherwise any I/O or
    /// serialization failure.
    async fn update(&self, item: &QueueItem) -> crate::Result<()>;

    /// # Errors
    /// `NotFound` if there is no such record, otherwise any I/O failure.
    async fn delete(&self, id: &QueueId) -> crate::Result<()>;
}
