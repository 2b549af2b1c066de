//! Named collection façades.
//!
//! [`Collection`] is the surface the rest of the application uses: a typed,
//! synchronously-readable view over the full stack (raw store → transaction
//! lanes → JSON codec → deferred init → pending instrumentation → sync
//! cache). [`RawCollection`] is its uncached byte-level sibling for blob
//! data, which skips the transaction and codec layers entirely.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::deferred::DeferredStore;
use crate::error::StorageResult;
use crate::json::JsonStore;
use crate::pending::PendingStore;
use crate::store::{EntryInfo, Store};
use crate::sync::SyncStore;
use crate::transaction::TransactionStore;
use crate::vault::BackendFuture;

fn pending_label(name: &str) -> String {
    format!("Collection ({name})")
}

/// A named, typed, durably-stored record collection.
///
/// Reads and writes are synchronous against the in-memory cache; durability
/// follows in the background. One instance per collection name per process —
/// the cache assumes it is the collection's only writer.
pub struct Collection<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> {
    name: String,
    /// The stack below the cache; `get_promise` reads through it directly.
    resolved: DeferredStore<T>,
    sync: SyncStore<T>,
}

impl<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> Collection<T> {
    pub(crate) fn new(backend: BackendFuture, name: &str, write_delay: Option<Duration>) -> Self {
        let init = {
            let name = name.to_owned();
            async move {
                let backend = backend.await?;
                let raw: Arc<dyn Store<Vec<u8>>> = backend.open_collection(&name).await?;
                let lanes = TransactionStore::new(raw, write_delay);
                let typed: Arc<dyn Store<T>> = Arc::new(JsonStore::new(Arc::new(lanes)));
                Ok(typed)
            }
        };
        let resolved = DeferredStore::new(init);
        let instrumented: Arc<dyn Store<T>> = Arc::new(PendingStore::new(
            pending_label(name),
            Arc::new(resolved.clone()) as Arc<dyn Store<T>>,
        ));
        Self {
            name: name.to_owned(),
            resolved,
            sync: SyncStore::new(instrumented),
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best currently-known value for `key`; see [`SyncStore::get`].
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        self.sync.get(key)
    }

    /// Write-through set; see [`SyncStore::set`].
    pub fn set(&self, key: &str, value: T) {
        self.sync.set(key, value);
    }

    /// Remove a key; see [`SyncStore::remove`].
    pub fn remove(&self, key: &str) {
        self.sync.remove(key);
    }

    /// Best currently-known key set, sorted; see [`SyncStore::keys`].
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.sync.keys()
    }

    /// Best currently-known metadata for `key`; see [`SyncStore::info`].
    #[must_use]
    pub fn info(&self, key: &str) -> Option<EntryInfo> {
        self.sync.info(key)
    }

    /// Known keys joined with their cached values, unresolved keys skipped.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, T)> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                let value = self.get(&key)?;
                Some((key, value))
            })
            .collect()
    }

    /// Cached values for every known key, unresolved keys skipped.
    #[must_use]
    pub fn values(&self) -> Vec<T> {
        self.keys().into_iter().filter_map(|key| self.get(&key)).collect()
    }

    /// One-shot resolved read that bypasses the cache.
    ///
    /// Use this before mutating a record that must already exist; the
    /// synchronous [`get`](Self::get) only promises eventual convergence.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure, including an initialization
    /// failure of the backend.
    pub async fn get_promise(&self, key: &str) -> StorageResult<Option<T>> {
        self.resolved.get(key).await
    }

    /// Clear the cache synchronously and destroy the collection's durable
    /// data.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's reset failure.
    pub async fn reset(&self) -> StorageResult<()> {
        self.sync.reset().await
    }

    /// Current revision of the observable cache state.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.sync.revision()
    }

    /// Subscribe to revision changes; see [`SyncStore::subscribe`].
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.sync.subscribe()
    }
}

impl<T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static> std::fmt::Debug
    for Collection<T>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A named collection of raw byte blobs.
///
/// Asynchronous and uncached: blob values are too large to hold in a render
/// cache, and blob writers do not need coalescing, so this skips the sync
/// cache, transaction and codec layers — deferred init and instrumentation
/// over the raw store only.
pub struct RawCollection {
    name: String,
    store: Arc<dyn Store<Vec<u8>>>,
}

impl RawCollection {
    pub(crate) fn new(backend: BackendFuture, name: &str) -> Self {
        let init = {
            let name = name.to_owned();
            async move {
                let backend = backend.await?;
                let raw: Arc<dyn Store<Vec<u8>>> = backend.open_collection(&name).await?;
                Ok(raw)
            }
        };
        let deferred = DeferredStore::new(init);
        let store: Arc<dyn Store<Vec<u8>>> = Arc::new(PendingStore::new(
            pending_label(name),
            Arc::new(deferred) as Arc<dyn Store<Vec<u8>>>,
        ));
        Self {
            name: name.to_owned(),
            store,
        }
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the blob stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.store.get(key).await
    }

    /// Store a blob under `key`.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.store.set(key, value).await
    }

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        self.store.remove(key).await
    }

    /// Enumerate stored keys.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.store.keys().await
    }

    /// Metadata for `key`.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        self.store.info(key).await
    }

    /// Destroy every blob in the collection.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's failure.
    pub async fn reset(&self) -> StorageResult<()> {
        self.store.reset().await
    }
}

impl std::fmt::Debug for RawCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCollection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
