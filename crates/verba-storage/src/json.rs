//! Typed codec layer: JSON text over the byte store.
//!
//! Decode failures degrade to absence so one corrupt record cannot block
//! the rest of a collection; encode failures propagate to the writer.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::store::{EntryInfo, Store};

/// JSON codec boundary between a record type and the byte store below.
pub struct JsonStore<T> {
    inner: Arc<dyn Store<Vec<u8>>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T> {
    /// Wrap `inner` with a JSON codec for `T`.
    #[must_use]
    pub fn new(inner: Arc<dyn Store<Vec<u8>>>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for JsonStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl<T> Store<T> for JsonStore<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> StorageResult<Option<T>> {
        let Some(bytes) = self.inner.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "stored record failed to parse, treating as absent");
                Ok(None)
            },
        }
    }

    async fn set(&self, key: &str, value: T) -> StorageResult<()> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.inner.set(key, bytes).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        self.inner.info(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        self.inner.reset().await
    }
}
