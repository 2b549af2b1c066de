//! Stored audio clips.
//!
//! Clips are raw encoded bytes keyed by a generated path (`"{id}.mp3"`).
//! They are too large for the render cache, so this goes through the
//! uncached byte collection and every access is awaited.

use verba_storage::{RawCollection, StorageResult, Vault};

/// Byte-blob storage for encoded audio clips.
#[derive(Debug)]
pub struct AudioStore {
    clips: RawCollection,
}

impl AudioStore {
    /// Open the audio collection on `vault`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(vault: &Vault) -> Self {
        Self {
            clips: vault.raw_collection("Audio"),
        }
    }

    /// Read the clip stored under `path`.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the read.
    pub async fn clip(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        self.clips.get(path).await
    }

    /// Store an encoded clip under `path`.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the write.
    pub async fn put_clip(&self, path: &str, bytes: Vec<u8>) -> StorageResult<()> {
        self.clips.set(path, bytes).await
    }

    /// Remove the clip stored under `path`.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the delete.
    pub async fn remove_clip(&self, path: &str) -> StorageResult<()> {
        self.clips.remove(path).await
    }

    /// Paths of every stored clip.
    ///
    /// # Errors
    ///
    /// Returns the storage failure of the enumeration.
    pub async fn clip_paths(&self) -> StorageResult<Vec<String>> {
        self.clips.keys().await
    }
}
