//! Checkpoint persistence.
//!
//! One JSON file per category holding the high-water mark of fully flushed
//! source indexes. Saves are guarded: a save carrying a lower index than the
//! stored one is refused, so a slow worker finishing late cannot rewind the
//! cursor another worker already advanced.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use qaforge_shared::{Checkpoint, QaForgeError, Result};

/// File-backed checkpoint store for one category.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    /// Create a store writing to `path`. Nothing is touched until the first
    /// save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored checkpoint, or `None` when the file does not exist.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(&self.path).map_err(|e| QaForgeError::io(&self.path, e))?;
        let checkpoint = serde_json::from_str(&content)
            .map_err(|e| QaForgeError::Storage(format!("corrupt checkpoint: {e}")))?;
        Ok(Some(checkpoint))
    }

    /// Persist `checkpoint`, refusing to regress the stored index.
    ///
    /// Returns `true` when the file was written, `false` when the monotonic
    /// guard refused the save.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<bool> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| QaForgeError::io(parent, e))?;
        }

        if let Some(stored) = self.load()? {
            if stored.last_file_index > checkpoint.last_file_index {
                info!(
                    incoming = checkpoint.last_file_index,
                    stored = stored.last_file_index,
                    "not overwriting checkpoint with a lower index"
                );
                return Ok(false);
            }
        }

        let json = serde_json::to_string(checkpoint)
            .map_err(|e| QaForgeError::Storage(e.to_string()))?;
        std::fs::write(&self.path, json).map_err(|e| QaForgeError::io(&self.path, e))?;
        debug!(
            path = %self.path.display(),
            last_file_index = checkpoint.last_file_index,
            "checkpoint saved"
        );
        Ok(true)
    }
}
