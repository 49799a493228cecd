use std::path::{Path, PathBuf};

use async_trait::async_trait;
use missive_common::{QueueId, QueueItem, internal};
use serde::Deserialize;
use tokio::fs;

use crate::{
    SerializationError, SpoolError, ValidationError, r#trait::BackingStore,
};

/// File-based backing store
///
/// Every queue item is a single bincode record named `{queue_id}.bin`, where
/// the id is a ULID. Records are small and rewritten in full on each state
/// change.
///
/// # Atomicity
/// Writes go to `.tmp_{queue_id}.bin` first and are renamed into place, so a
/// crash never leaves a half-written record behind. Deletes rename the record
/// to `.deleted` before removing it. Leftovers of either are removed by
/// [`FileBackingStore::init`].
///
/// # Security
/// Only file names that parse as ULIDs are ever read, and the directory
/// itself is validated when configured.
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/missive"),
        }
    }
}

// Custom Deserialize implementation with path validation
impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileBackingStoreHelper {
            path: PathBuf,
        }

        let helper = FileBackingStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

impl FileBackingStore {
    /// Validate a spool path
    ///
    /// Rejects `..` components, relative paths, and system directories.
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path
            .components()
            .any(|component| component == std::path::Component::ParentDir)
        {
            return Err(ValidationError::InvalidPath(format!(
                "Spool path cannot contain '..' components: {}",
                path.display()
            )));
        }

        if !path.is_absolute() {
            return Err(ValidationError::InvalidPath(format!(
                "Spool path must be absolute: {}",
                path.display()
            )));
        }

        let sensitive_prefixes = [
            "/etc",
            "/bin",
            "/sbin",
            "/usr/bin",
            "/usr/sbin",
            "/boot",
            "/sys",
            "/proc",
            "/dev",
        ];

        if let Some(prefix) = sensitive_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::InvalidPath(format!(
                "Spool path cannot be in system directory {prefix}: {}",
                path.display()
            )));
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepare the spool directory
    ///
    /// Creates the directory if needed and removes orphaned `.deleted` and
    /// `.tmp_` files left behind by a crash.
    ///
    /// # Errors
    /// - If the spool path cannot be created
    /// - If the path exists but is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising spool at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_orphans()
    }

    fn cleanup_orphans(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".deleted") || filename.starts_with(".tmp_") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned files from spool"
            );
        }

        Ok(())
    }

    fn record_path(&self, id: &QueueId) -> PathBuf {
        self.path.join(format!("{id}.bin"))
    }

    async fn write_atomically(&self, item: &QueueItem) -> crate::Result<()> {
        let id = item.id();
        let bytes = bincode::serde::encode_to_vec(item, bincode_config())
            .map_err(SerializationError::from)?;

        let temp_path = self.path.join(format!(".tmp_{id}.bin"));
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, self.record_path(&id)).await?;

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[tracing::instrument(level = "debug", skip(self, item), fields(id = %item.id()))]
    async fn write(&self, item: &QueueItem) -> crate::Result<()> {
        if fs::try_exists(self.record_path(&item.id())).await? {
            return Err(SpoolError::AlreadyExists(item.id()));
        }

        self.write_atomically(item).await?;
        internal!(level = DEBUG, "Spooled queue item {}", item.id());

        Ok(())
    }

    /// Scan the directory for `{ulid}.bin` records, oldest first
    ///
    /// Temporary and deleted files, and anything whose name is not a valid
    /// ULID, are skipped.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn list(&self) -> crate::Result<Vec<QueueId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with(".tmp_")
                && let Some(id) = QueueId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();

        Ok(ids)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn read(&self, id: &QueueId) -> crate::Result<QueueItem> {
        let bytes = match fs::read(self.record_path(id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        };

        let (item, consumed): (QueueItem, usize) =
            bincode::serde::decode_from_slice(&bytes, bincode_config())
                .map_err(SerializationError::from)?;

        if consumed != bytes.len() {
            return Err(SerializationError::Corrupted(format!(
                "{id}: {} trailing bytes",
                bytes.len() - consumed
            ))
            .into());
        }

        Ok(item)
    }

    #[tracing::instrument(level = "debug", skip(self, item), fields(id = %item.id()))]
    async fn update(&self, item: &QueueItem) -> crate::Result<()> {
        if !fs::try_exists(self.record_path(&item.id())).await? {
            return Err(SpoolError::NotFound(item.id()));
        }

        self.write_atomically(item).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(id = %id))]
    async fn delete(&self, id: &QueueId) -> crate::Result<()> {
        let path = self.record_path(id);
        let deleted = self.path.join(format!("{id}.bin.deleted"));

        match fs::rename(&path, &deleted).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(*id));
            }
            Err(err) => return Err(err.into()),
        }

        // If this fails, the .deleted file is cleaned up on next init
        fs::remove_file(&deleted).await?;

        internal!(level = DEBUG, "Deleted queue item {id} from spool");

        Ok(())
    }
}

/// Builder for `FileBackingStore`
#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> crate::Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}
