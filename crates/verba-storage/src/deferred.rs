//! Storage over a store that does not exist yet.
//!
//! Opening a backend is itself asynchronous and may wait on the user
//! (granting access to a directory), so collections are built over a
//! *future* store. Every call issued before the future resolves is buffered
//! in a FIFO queue; once the store exists the queue is replayed strictly in
//! submission order, with late arrivals appended to the tail, and only then
//! does the layer switch to pass-through. Buffered calls observe the real
//! result of their replayed operation — failures during the buffering
//! window are surfaced, not dropped.
//!
//! If initialization fails, the failure is fanned out to every buffered
//! call and every call made afterwards.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::error;

use crate::error::{StorageError, StorageResult};
use crate::store::{EntryInfo, Store};

enum QueuedCall<V> {
    Get {
        key: String,
        tx: oneshot::Sender<StorageResult<Option<V>>>,
    },
    Set {
        key: String,
        value: V,
        tx: oneshot::Sender<StorageResult<()>>,
    },
    Remove {
        key: String,
        tx: oneshot::Sender<StorageResult<()>>,
    },
    Keys {
        tx: oneshot::Sender<StorageResult<Vec<String>>>,
    },
    Info {
        key: String,
        tx: oneshot::Sender<StorageResult<Option<EntryInfo>>>,
    },
    Reset {
        tx: oneshot::Sender<StorageResult<()>>,
    },
}

impl<V: Send + Sync + 'static> QueuedCall<V> {
    async fn run(self, store: &Arc<dyn Store<V>>) {
        match self {
            Self::Get { key, tx } => {
                let _ = tx.send(store.get(&key).await);
            },
            Self::Set { key, value, tx } => {
                let _ = tx.send(store.set(&key, value).await);
            },
            Self::Remove { key, tx } => {
                let _ = tx.send(store.remove(&key).await);
            },
            Self::Keys { tx } => {
                let _ = tx.send(store.keys().await);
            },
            Self::Info { key, tx } => {
                let _ = tx.send(store.info(&key).await);
            },
            Self::Reset { tx } => {
                let _ = tx.send(store.reset().await);
            },
        }
    }

    fn fail(self, err: StorageError) {
        match self {
            Self::Get { tx, .. } => {
                let _ = tx.send(Err(err));
            },
            Self::Set { tx, .. } | Self::Remove { tx, .. } | Self::Reset { tx } => {
                let _ = tx.send(Err(err));
            },
            Self::Keys { tx } => {
                let _ = tx.send(Err(err));
            },
            Self::Info { tx, .. } => {
                let _ = tx.send(Err(err));
            },
        }
    }
}

enum State<V> {
    /// Init (or replay) still running; calls are queued.
    Buffering(VecDeque<QueuedCall<V>>),
    /// Store resolved and queue drained; calls pass through.
    Ready(Arc<dyn Store<V>>),
    /// Init failed; every call answers with this error.
    Failed(StorageError),
}

/// Buffering adapter over a future store instance.
pub struct DeferredStore<V: Send + Sync + 'static> {
    state: Arc<Mutex<State<V>>>,
}

impl<V: Send + Sync + 'static> Clone for DeferredStore<V> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<V: Send + Sync + 'static> std::fmt::Debug for DeferredStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredStore").finish_non_exhaustive()
    }
}

fn lock<V>(state: &Mutex<State<V>>) -> MutexGuard<'_, State<V>> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<V: Send + Sync + 'static> DeferredStore<V> {
    /// Start buffering over `init`, which resolves to the eventual store.
    ///
    /// The initialization is driven immediately on a background task.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new<F>(init: F) -> Self
    where
        F: Future<Output = StorageResult<Arc<dyn Store<V>>>> + Send + 'static,
    {
        let state = Arc::new(Mutex::new(State::Buffering(VecDeque::new())));
        let task_state = Arc::clone(&state);
        tokio::spawn(async move {
            match init.await {
                Ok(store) => replay(&task_state, &store).await,
                Err(e) => {
                    error!(error = %e, "storage initialization failed");
                    let queued = {
                        let mut state = lock(&task_state);
                        let queued = match &mut *state {
                            State::Buffering(queue) => std::mem::take(queue),
                            _ => VecDeque::new(),
                        };
                        *state = State::Failed(e.clone());
                        queued
                    };
                    for call in queued {
                        call.fail(e.clone());
                    }
                },
            }
        });
        Self { state }
    }
}

/// Drain the queue in submission order, then switch to pass-through.
async fn replay<V: Send + Sync + 'static>(
    state: &Arc<Mutex<State<V>>>,
    store: &Arc<dyn Store<V>>,
) {
    loop {
        let call = {
            let mut state = lock(state);
            match &mut *state {
                State::Buffering(queue) => match queue.pop_front() {
                    Some(call) => call,
                    None => {
                        *state = State::Ready(Arc::clone(store));
                        return;
                    },
                },
                _ => return,
            }
        };
        call.run(store).await;
    }
}

/// Outcome of checking the state for one call.
enum Dispatch<V, R> {
    Direct(Arc<dyn Store<V>>),
    Buffered(oneshot::Receiver<StorageResult<R>>),
}

impl<V: Send + Sync + 'static> DeferredStore<V> {
    fn dispatch<R>(
        &self,
        make_call: impl FnOnce(oneshot::Sender<StorageResult<R>>) -> QueuedCall<V>,
    ) -> Result<Dispatch<V, R>, StorageError> {
        let mut state = lock(&self.state);
        match &mut *state {
            State::Ready(store) => Ok(Dispatch::Direct(Arc::clone(store))),
            State::Failed(e) => Err(e.clone()),
            State::Buffering(queue) => {
                let (tx, rx) = oneshot::channel();
                queue.push_back(make_call(tx));
                Ok(Dispatch::Buffered(rx))
            },
        }
    }
}

async fn recv<R>(rx: oneshot::Receiver<StorageResult<R>>) -> StorageResult<R> {
    rx.await
        .unwrap_or_else(|_| Err(StorageError::Internal("deferred store dropped".into())))
}

#[async_trait]
impl<V: Send + Sync + 'static> Store<V> for DeferredStore<V> {
    async fn get(&self, key: &str) -> StorageResult<Option<V>> {
        match self.dispatch(|tx| QueuedCall::Get {
            key: key.to_owned(),
            tx,
        })? {
            Dispatch::Direct(store) => store.get(key).await,
            Dispatch::Buffered(rx) => recv(rx).await,
        }
    }

    async fn set(&self, key: &str, value: V) -> StorageResult<()> {
        // `set` cannot use `dispatch`: the value moves into the queue only
        // on the buffered path. The guard is scoped to this block so it is
        // released before any `.await`; `value` rides along on the direct
        // path so the move stays unambiguous across the two paths.
        let dispatched: Result<(Arc<dyn Store<V>>, V), oneshot::Receiver<StorageResult<()>>> = {
            let mut state = lock(&self.state);
            match &mut *state {
                State::Ready(store) => Ok((Arc::clone(store), value)),
                State::Failed(e) => return Err(e.clone()),
                State::Buffering(queue) => {
                    let (tx, rx) = oneshot::channel();
                    queue.push_back(QueuedCall::Set {
                        key: key.to_owned(),
                        value,
                        tx,
                    });
                    Err(rx)
                },
            }
        };
        match dispatched {
            Ok((store, value)) => store.set(key, value).await,
            Err(rx) => recv(rx).await,
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match self.dispatch(|tx| QueuedCall::Remove {
            key: key.to_owned(),
            tx,
        })? {
            Dispatch::Direct(store) => store.remove(key).await,
            Dispatch::Buffered(rx) => recv(rx).await,
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        match self.dispatch(|tx| QueuedCall::Keys { tx })? {
            Dispatch::Direct(store) => store.keys().await,
            Dispatch::Buffered(rx) => recv(rx).await,
        }
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        match self.dispatch(|tx| QueuedCall::Info {
            key: key.to_owned(),
            tx,
        })? {
            Dispatch::Direct(store) => store.info(key).await,
            Dispatch::Buffered(rx) => recv(rx).await,
        }
    }

    async fn reset(&self) -> StorageResult<()> {
        match self.dispatch(|tx| QueuedCall::Reset { tx })? {
            Dispatch::Direct(store) => store.reset().await,
            Dispatch::Buffered(rx) => recv(rx).await,
        }
    }
}
