//! Host storage backends.
//!
//! A [`Backend`] hands out one [`RawStore`] per named collection. Which
//! backend is active is a configuration choice made by the composition root
//! (see [`crate::vault`]); nothing above the raw store can tell them apart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::store::{MemoryStore, RawStore, validate_collection_name};

pub mod fs;

#[cfg(feature = "kv")]
pub mod kv;

/// A facility that can open byte-level stores for named collections.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Open (creating if necessary) the raw store for `name`.
    ///
    /// Collections are isolated: two names never share keys or data.
    async fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn RawStore>>;
}

/// In-memory backend for tests and ephemeral sessions.
///
/// Reopening a collection name on the same backend instance returns the
/// same store, so data survives for the lifetime of the backend and no
/// longer.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: Mutex<HashMap<String, Arc<MemoryStore>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn RawStore>> {
        validate_collection_name(name)?;
        let mut collections = self
            .collections
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let store = collections
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(MemoryStore::new()));
        Ok(Arc::clone(store) as Arc<dyn RawStore>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[tokio::test]
    async fn test_memory_backend_isolates_collections() {
        let backend = MemoryBackend::new();
        let a = backend.open_collection("a").await.unwrap();
        let b = backend.open_collection("b").await.unwrap();

        a.set("k", b"from-a".to_vec()).await.unwrap();
        assert!(b.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_backend_reopen_shares_state() {
        let backend = MemoryBackend::new();
        let first = backend.open_collection("c").await.unwrap();
        first.set("k", b"v".to_vec()).await.unwrap();

        let second = backend.open_collection("c").await.unwrap();
        assert_eq!(second.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_backend_rejects_bad_name() {
        let backend = MemoryBackend::new();
        assert!(backend.open_collection("").await.is_err());
        assert!(backend.open_collection("a/b").await.is_err());
    }
}
