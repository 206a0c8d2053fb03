//! Subscription Stores
//!
//! Adapters for [`SubscriptionStore`]:
//!
//! - [`JsonFileStore`]: one JSON document on disk, replaced atomically
//! - [`MemoryStore`]: process-local, for tests and embedding

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::application::ports::{PersistenceError, SubscriptionStore};
use crate::domain::subscription::Subscription;

// =============================================================================
// JSON File Store
// =============================================================================

/// Stores subscriptions as a JSON array in a single file.
///
/// Writes go to a sibling `.tmp` file that is then renamed over the target,
/// so a crash never leaves a half-written document behind.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`. The file need not exist yet.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SubscriptionStore for JsonFileStore {
    fn save(&self, subscriptions: &[Subscription]) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec_pretty(subscriptions)?;
        let tmp_path = self.tmp_path();
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;

        tracing::debug!(path = %self.path.display(), count = subscriptions.len(), "Subscriptions saved");
        Ok(())
    }

    fn load(&self) -> Result<Vec<Subscription>, PersistenceError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Keeps the last saved subscriptions in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Vec<Subscription>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionStore for MemoryStore {
    fn save(&self, subscriptions: &[Subscription]) -> Result<(), PersistenceError> {
        *self.saved.lock() = subscriptions.to_vec();
        Ok(())
    }

    fn load(&self) -> Result<Vec<Subscription>, PersistenceError> {
        Ok(self.saved.lock().clone())
    }
}
