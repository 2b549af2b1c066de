//! Verba Storage — client-side collection persistence.
//!
//! A layered stack that lets a reactive, render-on-demand UI read and write
//! records *synchronously* against data that lives behind asynchronous,
//! sometimes slow host storage:
//!
//! 1. **Raw store** ([`RawStore`]) — byte blobs under string keys, per
//!    named collection. Filesystem directory, embedded KV database (behind
//!    the **`kv`** feature), or memory.
//! 2. **Transaction lanes** ([`TransactionStore`]) — per-key write
//!    serialization and optional newest-wins coalescing.
//! 3. **JSON codec** ([`JsonStore`]) — typed records over bytes; corrupt
//!    records read as absent instead of poisoning the collection.
//! 4. **Deferred init** ([`DeferredStore`]) — FIFO buffering while the
//!    backend is still opening (which may wait on the user).
//! 5. **Pending-op instrumentation** ([`PendingStore`], [`pending_ops`]) —
//!    advisory in-flight counts for busy indicators.
//! 6. **Sync cache** ([`SyncStore`]) — the synchronous façade: tri-state
//!    cached reads, write-through writes, an observable revision counter.
//!
//! [`Vault`] wires the stack together once per collection name and hands
//! out [`Collection`] (typed, cached) and [`RawCollection`] (bytes,
//! uncached) façades.
//!
//! # Example
//!
//! ```rust,no_run
//! use verba_storage::{StorageConfig, Vault};
//!
//! # #[derive(Clone, serde::Serialize, serde::Deserialize)]
//! # struct Paragraph { text: String }
//! # async fn example() {
//! let vault = Vault::new(StorageConfig::filesystem("./data"));
//! let paragraphs = vault.collection::<Paragraph>("Paragraph", None);
//!
//! // Synchronous surface: a cache miss resolves in the background and
//! // bumps the revision so observers re-read.
//! paragraphs.set("p1", Paragraph { text: "hi".into() });
//! assert!(paragraphs.get("p1").is_some());
//!
//! let mut changes = paragraphs.subscribe();
//! let _ = changes.changed().await;
//! # }
//! ```
//!
//! Each collection assumes exactly one writer: one façade instance per
//! collection name, never shared across processes.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod backend;
pub mod collection;
pub mod deferred;
pub mod error;
pub mod json;
pub mod pending;
pub mod store;
pub mod sync;
pub mod transaction;
pub mod vault;

pub use backend::{Backend, MemoryBackend, fs::FsBackend, fs::FsStore};
pub use collection::{Collection, RawCollection};
pub use deferred::DeferredStore;
pub use error::{StorageError, StorageResult};
pub use json::JsonStore;
pub use pending::{PendingOps, PendingStore, pending_ops};
pub use store::{EntryInfo, MemoryStore, RawStore, Store};
pub use sync::SyncStore;
pub use transaction::TransactionStore;
pub use vault::{BackendKind, StorageConfig, Vault};

#[cfg(feature = "kv")]
pub use backend::kv::{DbBackend, DbStore};
