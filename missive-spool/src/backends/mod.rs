//! Backing store implementations
//!
//! - `file`: one bincode record per item on disk, for production
//! - `memory`: a `HashMap`, for development and transient deployments
//! - `test`: memory plus wake-ups and failure injection for tests

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
