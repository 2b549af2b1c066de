//! Per-key write serialization and coalescing.
//!
//! The raw store offers no transactions, so this layer guarantees that
//! writes to one key are applied strictly in submission order and never
//! overlap at the host API. Each key with outstanding writes owns a *lane*:
//! at most one queued write plus the waiters of every submission coalesced
//! into it, serviced by a single flusher task.
//!
//! With a configured `write_delay`, the flusher sleeps before taking the
//! queued write, so rapid successive writes inside the window collapse into
//! one durable write of the newest value; intermediate values never reach
//! the raw store. A submission superseded inside the window resolves with
//! the outcome of the write that replaced it.
//!
//! Reads wait for the key's lane to settle before passing through, so a
//! read issued after a write never observes the pre-write value. `reset`
//! drains every lane before forwarding.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, oneshot};
use tracing::{trace, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::{EntryInfo, Store};

enum WriteOp {
    Put(Vec<u8>),
    Remove,
}

struct PendingWrite {
    op: WriteOp,
    waiters: Vec<oneshot::Sender<StorageResult<()>>>,
}

struct Lane {
    queued: Option<PendingWrite>,
}

struct Shared {
    inner: Arc<dyn Store<Vec<u8>>>,
    write_delay: Option<Duration>,
    lanes: Mutex<HashMap<String, Lane>>,
    settled: Notify,
}

impl Shared {
    fn lanes(&self) -> MutexGuard<'_, HashMap<String, Lane>> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Write-serializing wrapper over a byte store.
#[derive(Clone)]
pub struct TransactionStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TransactionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStore")
            .field("write_delay", &self.shared.write_delay)
            .finish_non_exhaustive()
    }
}

impl TransactionStore {
    /// Wrap `inner`, serializing writes per key.
    ///
    /// `write_delay` is the optional coalescing window: how long a queued
    /// write waits for a newer value before being flushed.
    #[must_use]
    pub fn new(inner: Arc<dyn Store<Vec<u8>>>, write_delay: Option<Duration>) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner,
                write_delay,
                lanes: Mutex::new(HashMap::new()),
                settled: Notify::new(),
            }),
        }
    }

    fn enqueue(&self, key: &str, op: WriteOp) -> oneshot::Receiver<StorageResult<()>> {
        let (tx, rx) = oneshot::channel();
        let spawn_flusher = {
            let mut lanes = self.shared.lanes();
            match lanes.get_mut(key) {
                Some(lane) => {
                    match &mut lane.queued {
                        Some(pending) => {
                            trace!(key, "coalescing write");
                            pending.op = op;
                            pending.waiters.push(tx);
                        },
                        None => {
                            lane.queued = Some(PendingWrite {
                                op,
                                waiters: vec![tx],
                            });
                        },
                    }
                    false
                },
                None => {
                    lanes.insert(
                        key.to_owned(),
                        Lane {
                            queued: Some(PendingWrite {
                                op,
                                waiters: vec![tx],
                            }),
                        },
                    );
                    true
                },
            }
        };
        if spawn_flusher {
            tokio::spawn(flush_lane(Arc::clone(&self.shared), key.to_owned()));
        }
        rx
    }

    async fn submit(&self, key: &str, op: WriteOp) -> StorageResult<()> {
        let rx = self.enqueue(key, op);
        rx.await
            .unwrap_or_else(|_| Err(StorageError::Internal("write lane dropped".into())))
    }

    /// Wait until no write for `key` is queued or in flight.
    async fn wait_settled(&self, key: &str) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.shared.lanes().contains_key(key) {
                return;
            }
            notified.await;
        }
    }

    /// Wait until every lane has settled.
    async fn wait_drained(&self) {
        loop {
            let notified = self.shared.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lanes().is_empty() {
                return;
            }
            notified.await;
        }
    }
}

async fn flush_lane(shared: Arc<Shared>, key: String) {
    loop {
        if let Some(delay) = shared.write_delay {
            tokio::time::sleep(delay).await;
        }

        let pending = shared
            .lanes()
            .get_mut(&key)
            .and_then(|lane| lane.queued.take());

        if let Some(pending) = pending {
            let result = match pending.op {
                WriteOp::Put(bytes) => shared.inner.set(&key, bytes).await,
                WriteOp::Remove => shared.inner.remove(&key).await,
            };
            if let Err(e) = &result {
                warn!(key, error = %e, "write flush failed");
            }
            for waiter in pending.waiters {
                let _ = waiter.send(result.clone());
            }
        }

        let retired = {
            let mut lanes = shared.lanes();
            let idle = lanes
                .get(&key)
                .is_none_or(|lane| lane.queued.is_none());
            if idle {
                lanes.remove(&key);
            }
            idle
        };
        if retired {
            shared.settled.notify_waiters();
            return;
        }
    }
}

#[async_trait]
impl Store<Vec<u8>> for TransactionStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.wait_settled(key).await;
        self.shared.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.submit(key, WriteOp::Put(value)).await
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.submit(key, WriteOp::Remove).await
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        self.shared.inner.keys().await
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        self.wait_settled(key).await;
        self.shared.inner.info(key).await
    }

    async fn reset(&self) -> StorageResult<()> {
        self.wait_drained().await;
        self.shared.inner.reset().await
    }
}
