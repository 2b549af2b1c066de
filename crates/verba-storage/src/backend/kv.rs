//! Embedded key-value backend over `SurrealKV`.
//!
//! Fallback for deployments where a writable directory is unavailable. One
//! tree lives at `<root>/kv`; each collection is a namespace with composite
//! keys `"{collection}\0{key}"`, so the range
//! `["{collection}\0", "{collection}\x01")` captures exactly one
//! collection's entries.
//!
//! The tree does not track modification times, so every value carries an
//! 8-byte little-endian milliseconds-since-epoch prefix. A record shorter
//! than the prefix is corrupt and reads as absent.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::backend::Backend;
use crate::error::{StorageError, StorageResult};
use crate::store::{
    EntryInfo, RawStore, Store, now_millis, validate_collection_name, validate_key,
};

/// Directory under the root that holds the tree.
const KV_DIR: &str = "kv";

/// Length of the last-modified prefix on every stored value.
const STAMP_LEN: usize = 8;

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// Build the composite key `"{collection}\0{key}"` as bytes.
fn composite_key(collection: &str, key: &str) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(collection.len().saturating_add(1).saturating_add(key.len()));
    buf.extend_from_slice(collection.as_bytes());
    buf.push(0);
    buf.extend_from_slice(key.as_bytes());
    buf
}

/// Start of the collection's key range (inclusive): `"{collection}\0"`.
fn range_start(collection: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(collection.len().saturating_add(1));
    buf.extend_from_slice(collection.as_bytes());
    buf.push(0);
    buf
}

/// End of the collection's key range (exclusive): `"{collection}\x01"`.
fn range_end(collection: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(collection.len().saturating_add(1));
    buf.extend_from_slice(collection.as_bytes());
    buf.push(1);
    buf
}

/// Prefix `payload` with the current time stamp.
fn encode_value(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(STAMP_LEN.saturating_add(payload.len()));
    buf.extend_from_slice(&now_millis().to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Split a raw record into `(last_modified, payload)`.
fn decode_value(raw: &[u8]) -> Option<(u64, &[u8])> {
    let stamp = raw.get(..STAMP_LEN)?;
    let stamp = u64::from_le_bytes(stamp.try_into().ok()?);
    Some((stamp, raw.get(STAMP_LEN..)?))
}

/// Byte store over one collection namespace of the shared tree.
pub struct DbStore {
    tree: Arc<surrealkv::Tree>,
    name: String,
}

impl std::fmt::Debug for DbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbStore")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DbStore {
    fn read_raw(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let ck = composite_key(&self.name, key);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&ck).map_err(|ref e| map_kv_err(e))
    }

}

#[async_trait]
impl Store<Vec<u8>> for DbStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let raw = match self.read_raw(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(collection = %self.name, key, error = %e, "kv read failed, treating as absent");
                return Ok(None);
            },
        };
        match raw {
            Some(raw) => match decode_value(&raw) {
                Some((_, payload)) => Ok(Some(payload.to_vec())),
                None => {
                    warn!(collection = %self.name, key, "kv record too short, treating as absent");
                    Ok(None)
                },
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let ck = composite_key(&self.name, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        tx.set(&ck, &encode_value(&value))
            .map_err(|ref e| map_kv_err(e))?;
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let ck = composite_key(&self.name, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let existed = tx.get(&ck).map_err(|ref e| map_kv_err(e))?.is_some();
        if existed {
            tx.delete(&ck).map_err(|ref e| map_kv_err(e))?;
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let start = range_start(&self.name);
        let end = range_end(&self.name);
        let prefix_len = self.name.len().saturating_add(1);

        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;

        let mut keys = Vec::new();
        while iter.valid() {
            let raw_key = iter.key();
            if raw_key.len() > prefix_len
                && let Some(tail) = raw_key.get(prefix_len..)
                && let Ok(key_str) = std::str::from_utf8(tail)
            {
                keys.push(key_str.to_string());
            }
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        Ok(keys)
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        validate_key(key)?;
        let raw = match self.read_raw(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(collection = %self.name, key, error = %e, "kv stat failed, treating as absent");
                return Ok(None);
            },
        };
        Ok(raw.as_deref().and_then(decode_value).map(|(stamp, payload)| {
            EntryInfo {
                size: u64::try_from(payload.len()).unwrap_or(u64::MAX),
                last_modified: stamp,
            }
        }))
    }

    async fn reset(&self) -> StorageResult<()> {
        let start = range_start(&self.name);
        let end = range_end(&self.name);

        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;

        // The range iterator holds an immutable borrow of the transaction,
        // so collect the keys before issuing deletes.
        let keys_to_delete = {
            let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
            iter.seek_first().map_err(|ref e| map_kv_err(e))?;
            let mut keys = Vec::new();
            while iter.valid() {
                keys.push(iter.key());
                iter.next().map_err(|ref e| map_kv_err(e))?;
            }
            keys
        };

        let any = !keys_to_delete.is_empty();
        for key in &keys_to_delete {
            tx.delete(key).map_err(|ref e| map_kv_err(e))?;
        }
        if any {
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RawStore for DbStore {
    async fn append(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let ck = composite_key(&self.name, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        let existing = tx
            .get(&ck)
            .map_err(|ref e| map_kv_err(e))?
            .as_deref()
            .and_then(decode_value)
            .map(|(_, payload)| payload.to_vec())
            .unwrap_or_default();

        let mut joined = existing;
        joined.extend_from_slice(&bytes);
        tx.set(&ck, &encode_value(&joined))
            .map_err(|ref e| map_kv_err(e))?;
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }
}

/// Embedded-database backend holding one shared tree.
pub struct DbBackend {
    tree: Arc<surrealkv::Tree>,
}

impl std::fmt::Debug for DbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbBackend").finish_non_exhaustive()
    }
}

impl DbBackend {
    /// Open the backend, creating the tree directory under `root` if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the tree cannot be opened.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let path = root.into().join(KV_DIR);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path)
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            tree: Arc::new(tree),
        })
    }
}

#[async_trait]
impl Backend for DbBackend {
    async fn open_collection(&self, name: &str) -> StorageResult<Arc<dyn RawStore>> {
        validate_collection_name(name)?;
        Ok(Arc::new(DbStore {
            tree: Arc::clone(&self.tree),
            name: name.to_owned(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_backend() -> (DbBackend, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let backend = DbBackend::open(dir.path()).await.unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn test_db_get_set() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        store.set("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_db_get_missing() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_db_overwrite() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        store.set("k", b"v1".to_vec()).await.unwrap();
        store.set("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_db_remove_is_idempotent() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        store.set("k", b"v".to_vec()).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_db_keys() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        store.set("a", b"1".to_vec()).await.unwrap();
        store.set("b", b"2".to_vec()).await.unwrap();
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_db_info_tracks_payload_size() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        assert!(store.info("k").await.unwrap().is_none());
        store.set("k", b"hello".to_vec()).await.unwrap();
        let info = store.info("k").await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert!(info.last_modified > 0);
    }

    #[tokio::test]
    async fn test_db_append() {
        let (backend, _dir) = make_backend().await;
        let store = backend.open_collection("c").await.unwrap();
        store.append("log", b"one ".to_vec()).await.unwrap();
        store.append("log", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("log").await.unwrap(), Some(b"one two".to_vec()));
    }

    #[tokio::test]
    async fn test_db_collections_are_isolated() {
        let (backend, _dir) = make_backend().await;
        let a = backend.open_collection("a").await.unwrap();
        let b = backend.open_collection("b").await.unwrap();

        a.set("k", b"from-a".to_vec()).await.unwrap();
        b.set("k", b"from-b".to_vec()).await.unwrap();
        assert_eq!(a.get("k").await.unwrap(), Some(b"from-a".to_vec()));
        assert_eq!(b.get("k").await.unwrap(), Some(b"from-b".to_vec()));
    }

    #[tokio::test]
    async fn test_db_reset_scoped_to_collection() {
        let (backend, _dir) = make_backend().await;
        let a = backend.open_collection("a").await.unwrap();
        let b = backend.open_collection("b").await.unwrap();

        a.set("k1", b"1".to_vec()).await.unwrap();
        a.set("k2", b"2".to_vec()).await.unwrap();
        b.set("k", b"kept".to_vec()).await.unwrap();

        a.reset().await.unwrap();
        assert!(a.keys().await.unwrap().is_empty());
        assert_eq!(b.get("k").await.unwrap(), Some(b"kept".to_vec()));
    }

    #[test]
    fn test_decode_rejects_short_records() {
        assert!(decode_value(b"short").is_none());
        let encoded = encode_value(b"payload");
        let (stamp, payload) = decode_value(&encoded).unwrap();
        assert!(stamp > 0);
        assert_eq!(payload, b"payload");
    }
}
