//! The asynchronous storage contract shared by every layer of the stack.
//!
//! [`Store`] is the byte- or value-level contract: `get`/`set`/`remove`/
//! `keys`/`info`/`reset`, all asynchronous and fallible. Backends implement
//! it over raw bytes (see [`RawStore`]); wrapper layers implement it over
//! whatever value type the layer below them produces, so the whole stack
//! composes through `Arc<dyn Store<V>>`.
//!
//! Read failures at the raw layer degrade to absence (`Ok(None)`) and are
//! logged; write failures propagate. One corrupt or unreadable entry must
//! never block access to the rest of a collection.

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate that a key is safe for every backend.
///
/// Keys become file names on the filesystem backend and composite-key
/// segments on the database backend, so they must be non-empty, free of
/// null bytes and path separators, and not a dot entry.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key must not be empty".into()));
    }
    if key.contains('\0') {
        return Err(StorageError::InvalidKey(
            "key must not contain null bytes".into(),
        ));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "key must not contain path separators".into(),
        ));
    }
    if key == "." || key == ".." {
        return Err(StorageError::InvalidKey(
            "key must not be a dot entry".into(),
        ));
    }
    Ok(())
}

/// Validate a collection name. Same rules as keys; collection names become
/// directory names or key-prefix namespaces.
pub(crate) fn validate_collection_name(name: &str) -> StorageResult<()> {
    validate_key(name).map_err(|_| {
        StorageError::InvalidKey(format!("invalid collection name: {name:?}"))
    })
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Size and modification metadata for a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    /// Payload size in bytes.
    pub size: u64,
    /// Last modification time, milliseconds since the Unix epoch.
    pub last_modified: u64,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Asynchronous storage of values under string keys.
///
/// Every layer of the stack implements this for the value type it exposes:
/// backends for `Vec<u8>`, the codec layer for the record type, the
/// buffering and instrumentation layers for whatever they wrap.
#[async_trait]
pub trait Store<V: Send + Sync + 'static>: Send + Sync {
    /// Get the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> StorageResult<Option<V>>;

    /// Store `value` under `key`, replacing any existing value.
    async fn set(&self, key: &str, value: V) -> StorageResult<()>;

    /// Remove `key`. Succeeds even if the key does not exist.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// Enumerate every key currently stored.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Get size and last-modified metadata for `key`, or `None` if absent.
    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>>;

    /// Destroy every entry in this store.
    async fn reset(&self) -> StorageResult<()>;
}

/// Byte-level storage as provided by a host backend.
///
/// Extends [`Store`] with `append`, which the host contract offers at the
/// raw layer only; the wrapper layers above do not re-export it.
#[async_trait]
pub trait RawStore: Store<Vec<u8>> {
    /// Append `bytes` to the value stored under `key`, creating the entry
    /// if it does not exist.
    async fn append(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()>;
}

// ---------------------------------------------------------------------------
// In-memory implementation (always available)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryEntry {
    bytes: Vec<u8>,
    last_modified: u64,
}

impl MemoryEntry {
    fn info(&self) -> EntryInfo {
        EntryInfo {
            size: u64::try_from(self.bytes.len()).unwrap_or(u64::MAX),
            last_modified: self.last_modified,
        }
    }
}

/// In-memory byte store for tests and ephemeral collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: std::sync::RwLock<std::collections::HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store<Vec<u8>> for MemoryStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.get(key).map(|entry| entry.bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        data.insert(
            key.to_owned(),
            MemoryEntry {
                bytes: value,
                last_modified: now_millis(),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        data.remove(key);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.keys().cloned().collect())
    }

    async fn info(&self, key: &str) -> StorageResult<Option<EntryInfo>> {
        validate_key(key)?;
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(data.get(key).map(MemoryEntry::info))
    }

    async fn reset(&self) -> StorageResult<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        data.clear();
        Ok(())
    }
}

#[async_trait]
impl RawStore for MemoryStore {
    async fn append(&self, key: &str, bytes: Vec<u8>) -> StorageResult<()> {
        validate_key(key)?;
        let mut data = self
            .data
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let entry = data.entry(key.to_owned()).or_insert_with(|| MemoryEntry {
            bytes: Vec::new(),
            last_modified: 0,
        });
        entry.bytes.extend_from_slice(&bytes);
        entry.last_modified = now_millis();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set() {
        let store = MemoryStore::new();
        store.set("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_get_missing() {
        let store = MemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_overwrite() {
        let store = MemoryStore::new();
        store.set("k", b"v1".to_vec()).await.unwrap();
        store.set("k", b"v2".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v2".to_vec()));
    }

    #[tokio::test]
    async fn test_memory_remove_is_idempotent() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        store.remove("k").await.unwrap();
        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_keys() {
        let store = MemoryStore::new();
        store.set("a", b"1".to_vec()).await.unwrap();
        store.set("b", b"2".to_vec()).await.unwrap();
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_memory_info() {
        let store = MemoryStore::new();
        assert!(store.info("k").await.unwrap().is_none());
        store.set("k", b"hello".to_vec()).await.unwrap();
        let info = store.info("k").await.unwrap().unwrap();
        assert_eq!(info.size, 5);
        assert!(info.last_modified > 0);
    }

    #[tokio::test]
    async fn test_memory_reset() {
        let store = MemoryStore::new();
        store.set("a", b"1".to_vec()).await.unwrap();
        store.set("b", b"2".to_vec()).await.unwrap();
        store.reset().await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_append() {
        let store = MemoryStore::new();
        store.append("log", b"one ".to_vec()).await.unwrap();
        store.append("log", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get("log").await.unwrap(), Some(b"one two".to_vec()));
    }

    #[test]
    fn test_validate_key_rejects_empty() {
        assert!(validate_key("").is_err());
    }

    #[test]
    fn test_validate_key_rejects_null_byte() {
        assert!(validate_key("k\0bad").is_err());
    }

    #[test]
    fn test_validate_key_rejects_path_separators() {
        assert!(validate_key("a/b").is_err());
        assert!(validate_key("a\\b").is_err());
    }

    #[test]
    fn test_validate_key_rejects_dot_entries() {
        assert!(validate_key(".").is_err());
        assert!(validate_key("..").is_err());
        assert!(validate_key(".hidden").is_ok());
    }

    #[test]
    fn test_validate_collection_name() {
        assert!(validate_collection_name("Session").is_ok());
        assert!(validate_collection_name("").is_err());
        assert!(validate_collection_name("a/b").is_err());
    }
}
