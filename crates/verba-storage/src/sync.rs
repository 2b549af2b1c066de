//! Synchronous cached façade over the async stack.
//!
//! This is the surface a render-on-demand UI calls on every frame: reads
//! and writes return immediately, backed by an in-memory cache that is
//! eagerly consistent with local writes and eventually consistent with
//! durable state.
//!
//! Every cached entry is tri-state: *unknown* (never requested), *pending*
//! (resolution in flight, provisionally absent) and *resolved* (value or
//! definite absence). The first read of an unknown key marks it pending and
//! spawns one resolution; when the resolution lands — unless a local write
//! superseded it — the cache fills and the revision counter bumps so
//! observers re-read.
//!
//! The façade assumes it is the collection's only writer. Local writes take
//! effect in the cache synchronously and are persisted fire-and-forget; a
//! failed persist leaves the cache ahead of durable state, never behind it,
//! and is logged rather than rolled back.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::{EntryInfo, Store};

/// Read status of one cached key. Absence from the cache map is the
/// *unknown* state.
enum CacheEntry<U> {
    /// Resolution in flight; reads observe provisional absence.
    Pending,
    /// Value or definite absence is known.
    Resolved(Option<U>),
}

struct CacheState<T> {
    values: HashMap<String, CacheEntry<T>>,
    infos: HashMap<String, CacheEntry<EntryInfo>>,
    /// Best current knowledge of which keys exist: enumeration result
    /// (once it lands) plus local set/remove deltas.
    keys: BTreeSet<String>,
    /// Enumeration has been issued at least once.
    keys_loaded: bool,
    /// Enumeration has completed (successfully or not).
    keys_resolved: bool,
    /// Keys removed locally while enumeration was in flight; they must stay
    /// absent when the enumerated set lands.
    tombstones: HashSet<String>,
}

impl<T> CacheState<T> {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            infos: HashMap::new(),
            keys: BTreeSet::new(),
            keys_loaded: false,
            keys_resolved: false,
            tombstones: HashSet::new(),
        }
    }
}

/// A write headed for durable storage, in submission order.
enum PersistOp<T> {
    Set(String, T),
    Remove(String),
    Reset(oneshot::Sender<StorageResult<()>>),
}

struct Shared<T> {
    inner: Arc<dyn Store<T>>,
    state: Mutex<CacheState<T>>,
    revision: watch::Sender<u64>,
    runtime: tokio::runtime::Handle,
    /// Feeds the persist dispatcher; unbounded so the synchronous surface
    /// never blocks.
    persists: mpsc::UnboundedSender<PersistOp<T>>,
}

impl<T> Shared<T> {
    fn state(&self) -> MutexGuard<'_, CacheState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev = rev.wrapping_add(1));
    }
}

/// Synchronous, observable cache over an async store.
///
/// Assumes it is the only writer to the collection it fronts — one instance
/// per collection name, never shared across processes. Concurrent external
/// writers produce undefined interleavings.
pub struct SyncStore<T: Clone + Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Clone + Send + Sync + 'static> Clone for SyncStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for SyncStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> SyncStore<T> {
    /// Wrap `inner` with a synchronous cache.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime; resolutions and persists
    /// are spawned on the runtime captured here.
    #[must_use]
    pub fn new(inner: Arc<dyn Store<T>>) -> Self {
        let (revision, _) = watch::channel(0);
        let (persists, persist_rx) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Handle::current();
        runtime.spawn(dispatch_persists(Arc::clone(&inner), persist_rx));
        Self {
            shared: Arc::new(Shared {
                inner,
                state: Mutex::new(CacheState::new()),
                revision,
                runtime,
                persists,
            }),
        }
    }

    /// Best currently-known value for `key`.
    ///
    /// An unknown key returns `None` immediately and resolves in the
    /// background; once the resolution lands the revision bumps and a
    /// re-read observes the durable value. A key already resolved — by a
    /// prior resolution or a local write — returns from cache with no
    /// async work.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<T> {
        let mut state = self.shared.state();
        match state.values.get(key) {
            Some(CacheEntry::Resolved(value)) => value.clone(),
            Some(CacheEntry::Pending) => None,
            None => {
                state.values.insert(key.to_owned(), CacheEntry::Pending);
                drop(state);
                self.resolve_value(key.to_owned());
                None
            },
        }
    }

    /// Write-through set: the cache and known key set update synchronously,
    /// the persist runs in the background and is not awaited.
    pub fn set(&self, key: &str, value: T) {
        {
            let mut state = self.shared.state();
            state.keys.insert(key.to_owned());
            state.tombstones.remove(key);
            state
                .values
                .insert(key.to_owned(), CacheEntry::Resolved(Some(value.clone())));
        }
        self.shared.bump();
        let _ = self
            .shared
            .persists
            .send(PersistOp::Set(key.to_owned(), value));
    }

    /// Remove `key` from the cache and known key set synchronously; the
    /// durable delete runs in the background.
    pub fn remove(&self, key: &str) {
        {
            let mut state = self.shared.state();
            state.keys.remove(key);
            state
                .values
                .insert(key.to_owned(), CacheEntry::Resolved(None));
            state
                .infos
                .insert(key.to_owned(), CacheEntry::Resolved(None));
            if !state.keys_resolved {
                state.tombstones.insert(key.to_owned());
            }
        }
        self.shared.bump();
        let _ = self.shared.persists.send(PersistOp::Remove(key.to_owned()));
    }

    /// Best currently-known key set, sorted.
    ///
    /// The first call triggers a one-time enumeration; until it lands this
    /// returns only locally-written keys. The enumerated set is merged as a
    /// union so keys added locally in the meantime survive, and keys
    /// removed locally stay absent.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let (first_call, known) = {
            let mut state = self.shared.state();
            let first_call = !state.keys_loaded;
            state.keys_loaded = true;
            (first_call, state.keys.iter().cloned().collect())
        };
        if first_call {
            self.enumerate_keys();
        }
        known
    }

    /// Best currently-known metadata for `key`; same tri-state lifecycle
    /// as [`get`](Self::get).
    #[must_use]
    pub fn info(&self, key: &str) -> Option<EntryInfo> {
        let mut state = self.shared.state();
        match state.infos.get(key) {
            Some(CacheEntry::Resolved(info)) => *info,
            Some(CacheEntry::Pending) => None,
            None => {
                state.infos.insert(key.to_owned(), CacheEntry::Pending);
                drop(state);
                self.resolve_info(key.to_owned());
                None
            },
        }
    }

    /// Clear every cache synchronously (observers see an empty collection
    /// at once), then reset the stack below and wait for it.
    ///
    /// Enumeration is re-armed: the next [`keys`](Self::keys) call will
    /// enumerate the (now empty) store again.
    ///
    /// # Errors
    ///
    /// Returns the underlying stack's reset failure.
    pub async fn reset(&self) -> StorageResult<()> {
        {
            let mut state = self.shared.state();
            state.values.clear();
            state.infos.clear();
            state.keys.clear();
            state.tombstones.clear();
            state.keys_loaded = false;
            state.keys_resolved = false;
        }
        self.shared.bump();

        // Route through the dispatcher so every persist submitted before
        // the reset reaches the stack first.
        let (tx, rx) = oneshot::channel();
        let _ = self.shared.persists.send(PersistOp::Reset(tx));
        rx.await
            .unwrap_or_else(|_| Err(StorageError::Internal("persist dispatcher dropped".into())))
    }

    /// Current revision of the observable cache state.
    #[must_use]
    pub fn revision(&self) -> u64 {
        *self.shared.revision.borrow()
    }

    /// Subscribe to revision changes. Await
    /// [`changed`](watch::Receiver::changed) on the receiver to learn when
    /// any externally-observable cache state moved.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    fn resolve_value(&self, key: String) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            let resolved = match shared.inner.get(&key).await {
                Ok(value) => value,
                Err(e) => {
                    warn!(key, error = %e, "read resolution failed, treating as absent");
                    None
                },
            };
            let mut state = shared.state();
            // A local write between the request and now wins over this
            // resolution.
            if matches!(state.values.get(&key), Some(CacheEntry::Pending)) {
                state.values.insert(key, CacheEntry::Resolved(resolved));
                drop(state);
                shared.bump();
            }
        });
    }

    fn resolve_info(&self, key: String) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            let resolved = match shared.inner.info(&key).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(key, error = %e, "info resolution failed, treating as absent");
                    None
                },
            };
            let mut state = shared.state();
            if matches!(state.infos.get(&key), Some(CacheEntry::Pending)) {
                state.infos.insert(key, CacheEntry::Resolved(resolved));
                drop(state);
                shared.bump();
            }
        });
    }

    fn enumerate_keys(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.runtime.spawn(async move {
            match shared.inner.keys().await {
                Ok(found) => {
                    debug!(count = found.len(), "key enumeration resolved");
                    let mut state = shared.state();
                    for key in found {
                        if !state.tombstones.contains(&key) {
                            state.keys.insert(key);
                        }
                    }
                    state.keys_resolved = true;
                    state.tombstones.clear();
                    drop(state);
                    shared.bump();
                },
                Err(e) => {
                    warn!(error = %e, "key enumeration failed, keeping locally-known keys");
                    let mut state = shared.state();
                    state.keys_resolved = true;
                    state.tombstones.clear();
                },
            }
        });
    }
}

fn persist_future<T: Send + Sync + 'static>(
    inner: Arc<dyn Store<T>>,
    op: PersistOp<T>,
) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match op {
            PersistOp::Set(key, value) => {
                if let Err(e) = inner.set(&key, value).await {
                    warn!(key, error = %e, "persist failed; cache is ahead of durable state");
                }
            },
            PersistOp::Remove(key) => {
                if let Err(e) = inner.remove(&key).await {
                    warn!(key, error = %e, "delete failed; cache is ahead of durable state");
                }
            },
            PersistOp::Reset(tx) => {
                let _ = tx.send(inner.reset().await);
            },
        }
    })
}

/// Drive persists in submission order.
///
/// Each persist is polled once, immediately, before the next one starts:
/// that first poll carries the write through the codec into the per-key
/// write lane (or the deferred buffer), so writes reach the layer that
/// orders them in exactly the order the façade issued them. The remainder
/// of each persist then completes concurrently.
///
/// The loop ends when the façade (every sender) is dropped; in-flight
/// persists are drained first.
async fn dispatch_persists<T: Send + Sync + 'static>(
    inner: Arc<dyn Store<T>>,
    mut ops: mpsc::UnboundedReceiver<PersistOp<T>>,
) {
    let mut inflight: FuturesUnordered<BoxFuture<'static, ()>> = FuturesUnordered::new();
    loop {
        tokio::select! {
            op = ops.recv() => {
                let Some(op) = op else { break };
                let mut persist = persist_future(Arc::clone(&inner), op);
                if futures::poll!(persist.as_mut()).is_pending() {
                    inflight.push(persist);
                }
            },
            Some(()) = inflight.next() => {},
        }
    }
    while inflight.next().await.is_some() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Typed store with preset contents, an optional gate on reads and
    /// enumeration, and operation counters.
    struct StubStore {
        data: Mutex<HashMap<String, String>>,
        gate: Option<Arc<Notify>>,
        gets: AtomicUsize,
        enumerations: AtomicUsize,
    }

    impl StubStore {
        fn with_data(entries: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                data: Mutex::new(
                    entries
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
                gate: None,
                gets: AtomicUsize::new(0),
                enumerations: AtomicUsize::new(0),
            })
        }

        fn gated(entries: &[(&str, &str)]) -> (Arc<Self>, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            let store = Arc::new(Self {
                data: Mutex::new(
                    entries
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
                gate: Some(Arc::clone(&gate)),
                gets: AtomicUsize::new(0),
                enumerations: AtomicUsize::new(0),
            });
            (store, gate)
        }

        async fn wait_gate(&self) {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
        }
    }

    #[async_trait]
    impl Store<String> for StubStore {
        async fn get(&self, key: &str) -> StorageResult<Option<String>> {
            self.wait_gate().await;
            self.gets.fetch_add(1, Ordering::SeqCst);
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn set(&self, key: &str, value: String) -> StorageResult<()> {
            self.data.lock().unwrap().insert(key.to_owned(), value);
            Ok(())
        }

        async fn remove(&self, key: &str) -> StorageResult<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn keys(&self) -> StorageResult<Vec<String>> {
            // Snapshot first: an in-flight enumeration reflects the store
            // as it was when the listing started.
            let snapshot = self.data.lock().unwrap().keys().cloned().collect();
            self.wait_gate().await;
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok(snapshot)
        }

        async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
            self.wait_gate().await;
            Ok(self.data.lock().unwrap().get(key).map(|v| EntryInfo {
                size: u64::try_from(v.len()).unwrap(),
                last_modified: 1,
            }))
        }

        async fn reset(&self) -> StorageResult<()> {
            self.data.lock().unwrap().clear();
            Ok(())
        }
    }

    /// Drive spawned resolutions to completion on the current-thread
    /// test runtime.
    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_unknown_key_resolves_in_background() {
        let stub = StubStore::with_data(&[("k", "durable")]);
        let sync = SyncStore::new(stub as Arc<dyn Store<String>>);

        let mut watcher = sync.subscribe();
        assert_eq!(sync.get("k"), None);

        watcher.changed().await.unwrap();
        assert_eq!(sync.get("k"), Some("durable".to_owned()));
    }

    #[tokio::test]
    async fn test_missing_key_stays_absent_after_resolution() {
        let stub = StubStore::with_data(&[]);
        let sync = SyncStore::new(stub as Arc<dyn Store<String>>);

        let mut watcher = sync.subscribe();
        assert_eq!(sync.get("nope"), None);
        watcher.changed().await.unwrap();
        assert_eq!(sync.get("nope"), None);
    }

    #[tokio::test]
    async fn test_pending_read_does_not_duplicate_resolution() {
        let stub = StubStore::with_data(&[("k", "v")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        let mut watcher = sync.subscribe();
        assert_eq!(sync.get("k"), None);
        assert_eq!(sync.get("k"), None);
        watcher.changed().await.unwrap();

        assert_eq!(stub.gets.load(Ordering::SeqCst), 1);
        assert_eq!(sync.get("k"), Some("v".to_owned()));
        assert_eq!(stub.gets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_is_observable_in_the_same_turn() {
        let stub = StubStore::with_data(&[]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        sync.set("k", "now".to_owned());
        assert_eq!(sync.get("k"), Some("now".to_owned()));
        assert_eq!(sync.keys(), vec!["k"]);

        settle().await;
        assert_eq!(stub.data.lock().unwrap().get("k").cloned(), Some("now".to_owned()));
    }

    #[tokio::test]
    async fn test_local_set_supersedes_inflight_resolution() {
        let (stub, gate) = StubStore::gated(&[("k", "stale")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        assert_eq!(sync.get("k"), None);
        sync.set("k", "local".to_owned());

        // The resolution task must be parked on the gate before releasing it.
        settle().await;
        gate.notify_waiters();
        settle().await;

        assert_eq!(sync.get("k"), Some("local".to_owned()));
    }

    #[tokio::test]
    async fn test_remove_is_definite_absence() {
        let stub = StubStore::with_data(&[("k", "v")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        sync.set("k", "v".to_owned());
        sync.remove("k");
        assert_eq!(sync.get("k"), None);
        assert!(sync.keys().is_empty());

        settle().await;
        assert!(stub.data.lock().unwrap().get("k").is_none());
        assert_eq!(stub.gets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keys_unions_enumeration_with_local_writes() {
        let (stub, gate) = StubStore::gated(&[("stored", "1")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        assert!(sync.keys().is_empty());
        sync.set("local", "2".to_owned());
        assert_eq!(sync.keys(), vec!["local"]);

        settle().await;
        gate.notify_waiters();
        settle().await;

        assert_eq!(sync.keys(), vec!["local", "stored"]);
        assert_eq!(stub.enumerations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_removed_keys_stay_absent_after_enumeration_lands() {
        let (stub, gate) = StubStore::gated(&[("doomed", "1"), ("kept", "2")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        assert!(sync.keys().is_empty());
        sync.remove("doomed");

        settle().await;
        gate.notify_waiters();
        settle().await;

        assert_eq!(sync.keys(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_info_resolves_like_get() {
        let stub = StubStore::with_data(&[("k", "hello")]);
        let sync = SyncStore::new(stub as Arc<dyn Store<String>>);

        let mut watcher = sync.subscribe();
        assert!(sync.info("k").is_none());
        watcher.changed().await.unwrap();

        let info = sync.info("k").unwrap();
        assert_eq!(info.size, 5);
    }

    #[tokio::test]
    async fn test_reset_clears_synchronously_and_rearms_enumeration() {
        let stub = StubStore::with_data(&[("a", "1")]);
        let sync = SyncStore::new(Arc::clone(&stub) as Arc<dyn Store<String>>);

        sync.set("b", "2".to_owned());
        let _ = sync.keys();
        settle().await;

        sync.reset().await.unwrap();
        assert!(sync.keys().is_empty());
        assert!(sync.get("b").is_none());

        settle().await;
        assert!(stub.data.lock().unwrap().is_empty());
        assert_eq!(stub.enumerations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_revision_bumps_on_every_observable_change() {
        let stub = StubStore::with_data(&[]);
        let sync = SyncStore::new(stub as Arc<dyn Store<String>>);

        let before = sync.revision();
        sync.set("k", "v".to_owned());
        let after_set = sync.revision();
        assert_ne!(before, after_set);

        sync.remove("k");
        assert_ne!(after_set, sync.revision());
    }
}
