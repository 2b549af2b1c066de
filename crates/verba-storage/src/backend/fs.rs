//! Filesystem backend: one directory per collection, one file per key.
//!
//! The preferred deployment backend. The root directory is host-granted
//! (the application decides where it lives and whether the user has to
//! authorize it); this module only ever touches paths beneath it.
//!
//! Read failures surface as absence and are logged; write failures
//! propagate. Values are written whole — partial updates never happen at
//! this layer, and overlapping writes to one key are prevented above by the
//! transaction lanes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use crate::store::{EntryInfo, RawStore, Store, validate_collection_name, validate_key};

/// Directory that holds all collection directories under the root.
const COLLECTIONS_DIR: &str = "collections";

fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}

fn mtime_millis(metadata: &std::fs::Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Byte store over a single collection directory.
#[derive(Debug)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(key))
    }
}

#[async_trait]
impl Store<Vec<u8>> for FsStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "file read failed, treating as absent");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::write(&path, &value)
            .await
            .map_err(StorageError::from)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(StorageError::from(e)),
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(StorageError::from)?;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from)? {
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Ok(name) = entry.file_name().into_string() {
                keys.push(name);
            }
        }
        Ok(keys)
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(metadata) => Ok(Some(EntryInfo {
                size: metadata.len(),
                last_modified: mtime_millis(&metadata),
            })),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => {
                warn!(key, error = %e, "stat failed, treating as absent");
                Ok(None)
            },
        }
    }

    async fn reset(&self) -> StorageResult<()> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(StorageError::from)?;
        while let Some(entry) = entries.next_entry().await.map_err(StorageError::from)? {
            let path = entry.path();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                tokio::fs::remove_dir_all(&path)
                    .await
                    .map_err(StorageError::from)?;
            } else {
                tokio::fs::remove_file(&path)
                    .await
                    .map_err(StorageError::from)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RawStore for FsStore {
    async fn append(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .map_err(StorageError::from)?;
        file.write_all(&bytes).await.map_err(StorageError::from)?;
        file.flush().await.map_err(StorageError::from)
    }
}

/// Filesystem backend rooted at a host-granted directory.
#[derive(Debug)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Open the backend, creating `<root>/collections` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the directory cannot be
    /// created.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(COLLECTIONS_DIR))
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self { root })
    }
}

#[async_trait]
impl Backend for FsBackend {
    async fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn RawStore>> {
        validate_collection_name(name)?;
        let dir = self.root.join(COLLECTIONS_DIR).join(name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Arc::new(FsStore { dir }))
    }
}
