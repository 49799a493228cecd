use std::sync::Arc;

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Selects the backing store at startup
///
/// File-backed spool:
/// ```ron
/// spool: File(
///     path: "/var/spool/missive",
/// ),
/// ```
///
/// Memory-backed spool with a capacity limit:
/// ```ron
/// spool: Memory(
///     capacity: 1000,
/// ),
/// ```
///
/// Both forms rely on the `unwrap_variant_newtypes` and `implicit_some` RON
/// extensions, which the configuration loader enables.
#[derive(Debug, Clone, Deserialize)]
pub enum SpoolConfig {
    File(FileBackingStore),
    /// Nothing survives a restart
    Memory(MemoryConfig),
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoryConfig {
    /// Maximum number of items to store (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File(FileBackingStore::default())
    }
}

impl SpoolConfig {
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Open the configured store
    ///
    /// File-backed stores are initialised (directory created, crash leftovers
    /// removed) before they are returned.
    ///
    /// # Errors
    /// Returns an error if file spool initialisation fails
    pub fn into_backing_store(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File(store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}
