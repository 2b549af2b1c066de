//! Storage configuration and the vault composition root.
//!
//! A [`Vault`] owns one lazily-opened [`Backend`](crate::backend::Backend)
//! and wires the full stack together once per named collection. Opening the
//! backend may be slow or user-gated, so [`Vault::new`] is synchronous and
//! cheap: the backend future is shared, driven on first use, and every
//! collection created beforehand buffers its calls until it resolves.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::backend::fs::FsBackend;
use crate::backend::{Backend, MemoryBackend};
use crate::collection::{Collection, RawCollection};
use crate::error::StorageResult;

#[cfg(feature = "kv")]
use crate::backend::kv::DbBackend;

/// Which host facility backs the raw stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// A directory per collection, a file per key. The preferred backend.
    Filesystem,
    /// Process-lifetime memory; for tests and ephemeral sessions.
    Memory,
    /// An embedded key-value database shared by all collections.
    #[cfg(feature = "kv")]
    Database,
}

/// Storage configuration for a [`Vault`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory granted to the application. Unused by the memory
    /// backend.
    pub root: PathBuf,
    /// Backend selection; a deployment choice, invisible above the raw
    /// store.
    pub backend: BackendKind,
}

impl StorageConfig {
    /// Filesystem-backed storage under `root`.
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backend: BackendKind::Filesystem,
        }
    }

    /// In-memory storage.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            root: PathBuf::new(),
            backend: BackendKind::Memory,
        }
    }

    /// Embedded-database storage under `root`.
    #[cfg(feature = "kv")]
    pub fn database(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            backend: BackendKind::Database,
        }
    }
}

pub(crate) type BackendFuture = Shared<BoxFuture<'static, StorageResult<Arc<dyn Backend>>>>;

async fn open_backend(config: StorageConfig) -> StorageResult<Arc<dyn Backend>> {
    match config.backend {
        BackendKind::Filesystem => Ok(Arc::new(FsBackend::open(config.root).await?)),
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "kv")]
        BackendKind::Database => Ok(Arc::new(DbBackend::open(config.root).await?)),
    }
}

/// Composition root for a process's collections.
///
/// Construction is synchronous; the configured backend opens once, lazily,
/// when the first collection touches storage. An open failure is fanned out
/// to every operation on every collection of this vault.
#[derive(Clone)]
pub struct Vault {
    backend: BackendFuture,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}

impl Vault {
    /// Create a vault over `config`. No I/O happens until a collection is
    /// used.
    #[must_use]
    pub fn new(config: StorageConfig) -> Self {
        Self {
            backend: open_backend(config).boxed().shared(),
        }
    }

    /// Build the full stack for the typed collection `name`.
    ///
    /// `write_delay` is the per-collection coalescing window for rapid
    /// successive writes to one key; `None` flushes writes immediately.
    ///
    /// Call once per collection name per process: the returned façade
    /// assumes it is the collection's only writer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn collection<T>(&self, name: &str, write_delay: Option<Duration>) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        Collection::new(self.backend.clone(), name, write_delay)
    }

    /// Build the uncached byte-blob collection `name`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn raw_collection(&self, name: &str) -> RawCollection {
        RawCollection::new(self.backend.clone(), name)
    }
}
