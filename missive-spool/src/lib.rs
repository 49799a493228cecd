//! Durable storage for queue items
//!
//! The delivery queue keeps its working set in memory and writes every state
//! change through a [`BackingStore`] before acknowledging it.

pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore, TestBackingStore};
pub use config::{MemoryConfig, SpoolConfig};
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use r#trait::BackingStore;
