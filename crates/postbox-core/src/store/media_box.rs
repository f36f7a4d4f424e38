//! Payload files referenced by message media.
//!
//! Files are named by the hex encoding of their resource id so arbitrary ids
//! map to safe file names.

use std::path::{Path, PathBuf};

use crate::error::StorageError;

#[derive(Debug, Clone)]
pub struct MediaBox {
    root: Option<PathBuf>,
}

impl MediaBox {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root: Some(root) })
    }

    /// Media box of an in-memory store: nothing is ever written.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    pub fn resource_path(&self, resource_id: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(hex::encode(resource_id.as_bytes())))
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        self.resource_path(resource_id)
            .is_some_and(|path| path.exists())
    }

    /// Write the payload through a temp file and rename, so readers never see
    /// a partial file.
    pub fn store_resource(&self, resource_id: &str, data: &[u8]) -> Result<Option<PathBuf>, StorageError> {
        let Some(path) = self.resource_path(resource_id) else {
            return Ok(None);
        };
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, data)?;
        std::fs::rename(&temp, &path)?;
        Ok(Some(path))
    }

    /// Remove payload files; missing files are ignored. Returns how many
    /// files were deleted.
    pub(crate) fn remove_resources(&self, resource_ids: &[String]) -> usize {
        let mut removed = 0;
        for resource_id in resource_ids {
            let Some(path) = self.resource_path(resource_id) else {
                continue;
            };
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(resource_id = %resource_id, "Failed to remove media file: {}", error);
                }
            }
        }
        removed
    }
}
