//! Pending-operation registry for liveness indicators.
//!
//! A process-wide map from a human-readable collection label to the number
//! of storage operations currently awaiting completion on it. The registry
//! is created on first use and never torn down; an external observer (a
//! busy spinner, a status line) may snapshot it at any time. It is advisory
//! only — nothing in the stack gates correctness on these counts.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StorageResult;
use crate::store::{EntryInfo, Store};

static REGISTRY: OnceLock<PendingOps> = OnceLock::new();

/// The process-wide pending-operation registry.
pub fn pending_ops() -> &'static PendingOps {
    REGISTRY.get_or_init(PendingOps::new)
}

/// Live counts of in-flight storage operations, by collection label.
#[derive(Debug)]
pub struct PendingOps {
    counts: DashMap<String, usize>,
}

impl PendingOps {
    fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Record the start of an operation; the returned guard records its end
    /// when dropped, on every exit path.
    pub(crate) fn begin(&'static self, label: &str) -> PendingGuard {
        self.counts
            .entry(label.to_owned())
            .and_modify(|c| *c = c.saturating_add(1))
            .or_insert(1);
        PendingGuard {
            label: label.to_owned(),
        }
    }

    fn end(&self, label: &str) {
        let drained = {
            let Some(mut entry) = self.counts.get_mut(label) else {
                return;
            };
            *entry = entry.saturating_sub(1);
            *entry == 0
        };
        if drained {
            self.counts.remove_if(label, |_, count| *count == 0);
        }
    }

    /// In-flight operation count for one label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.counts.get(label).map_or(0, |entry| *entry.value())
    }

    /// In-flight operation count across every label.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts
            .iter()
            .fold(0, |acc, entry| acc.saturating_add(*entry.value()))
    }

    /// Read-only snapshot of every label with in-flight operations,
    /// sorted by label.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort();
        entries
    }
}

/// Scoped decrement for one in-flight operation.
#[derive(Debug)]
pub(crate) struct PendingGuard {
    label: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        pending_ops().end(&self.label);
    }
}

/// Transparent wrapper that counts in-flight operations under a label.
///
/// Semantics and ordering are untouched; every call is forwarded as-is.
pub struct PendingStore<V: Send + Sync + 'static> {
    label: String,
    inner: Arc<dyn Store<V>>,
}

impl<V: Send + Sync + 'static> PendingStore<V> {
    /// Wrap `inner`, counting its operations under `label`.
    #[must_use]
    pub fn new(label: impl Into<String>, inner: Arc<dyn Store<V>>) -> Self {
        Self {
            label: label.into(),
            inner,
        }
    }
}

impl<V: Send + Sync + 'static> std::fmt::Debug for PendingStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStore")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<V: Send + Sync + 'static> Store<V> for PendingStore<V> {
    async fn get(&self, key: &str) -> StorageResult<Option<V>> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: V) -> StorageResult<()> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.remove(key).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.keys().await
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.info(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        let _guard = pending_ops().begin(&self.label);
        self.inner.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use tokio::sync::oneshot;

    /// A store whose reads block until released.
    struct GatedStore {
        gate: std::sync::Mutex<Option<oneshot::Receiver<()>>>,
        fail: bool,
    }

    impl GatedStore {
        fn new(fail: bool) -> (Arc<Self>, oneshot::Sender<()>) {
            let (tx, rx) = oneshot::channel();
            (
                Arc::new(Self {
                    gate: std::sync::Mutex::new(Some(rx)),
                    fail,
                }),
                tx,
            )
        }
    }

    #[async_trait]
    impl Store<Vec<u8>> for GatedStore {
        async fn get(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
            let gate = self.gate.lock().unwrap().take();
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            if self.fail {
                Err(StorageError::Io("gated failure".into()))
            } else {
                Ok(None)
            }
        }

        async fn set(&self, _key: &str, _value: Vec<u8>) -> StorageResult<()> {
            Ok(())
        }

        async fn remove(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }

        async fn keys(&self) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn info(&self, _key: &str) -> StorageResult<Option<EntryInfo>> {
            Ok(None)
        }

        async fn reset(&self) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_count_rises_and_falls_around_an_operation() {
        let label = "Collection (pending-count)";
        let (gated, release) = GatedStore::new(false);
        let store = Arc::new(PendingStore::new(label, gated as Arc<dyn Store<Vec<u8>>>));

        assert_eq!(pending_ops().count(label), 0);

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("k").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(pending_ops().count(label), 1);

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert_eq!(pending_ops().count(label), 0);
    }

    #[tokio::test]
    async fn test_count_falls_on_failure_too() {
        let label = "Collection (pending-failure)";
        let (gated, release) = GatedStore::new(true);
        let store = Arc::new(PendingStore::new(label, gated as Arc<dyn Store<Vec<u8>>>));

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("k").await })
        };
        tokio::task::yield_now().await;
        assert_eq!(pending_ops().count(label), 1);

        release.send(()).unwrap();
        assert!(task.await.unwrap().is_err());
        assert_eq!(pending_ops().count(label), 0);
    }

    #[tokio::test]
    async fn test_snapshot_and_total_observe_labels() {
        let label = "Collection (pending-snapshot)";
        let (gated, release) = GatedStore::new(false);
        let store = Arc::new(PendingStore::new(label, gated as Arc<dyn Store<Vec<u8>>>));

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.get("k").await })
        };
        tokio::task::yield_now().await;

        let snapshot = pending_ops().snapshot();
        assert!(snapshot.contains(&(label.to_owned(), 1)));
        assert!(pending_ops().total() >= 1);

        release.send(()).unwrap();
        task.await.unwrap().unwrap();
        assert!(!pending_ops().snapshot().iter().any(|(l, _)| l == label));
    }

    #[tokio::test]
    async fn test_forwarding_is_transparent() {
        let raw: Arc<dyn Store<Vec<u8>>> = Arc::new(crate::store::MemoryStore::new());
        let store = PendingStore::new("Collection (forward)", raw);

        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.keys().await.unwrap(), vec!["k"]);
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }
}
