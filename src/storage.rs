//! Cell Protocol - Storage Interface
//!
//! The `KvStore` trait is the storage collaborator every engine is built
//! against: a key/value store offering `get`/`put`/`remove` plus indexed
//! range queries over typed documents, each carrying a revision token for
//! optimistic concurrency. Implementing a production backend is out of
//! scope; `MemoryStore` below is the in-process
//! reference implementation used by every engine's tests.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

use crate::errors::StorageError;
use crate::types::DocKey;

/// Optimistic-concurrency revision token, paired with a document's version.
pub type Revision = u64;

/// Durable key/value store consumed by every engine.
///
/// Implementations must guarantee that a successful `put` is visible to a
/// subsequent `get`/`scan` from any caller: writers never observe a
/// partially applied batch, readers see a consistent snapshot.
pub trait KvStore: Send + Sync {
    fn get_raw(&self, key: &DocKey) -> Option<(Revision, Vec<u8>)>;
    fn put_raw(
        &self,
        key: DocKey,
        value: Vec<u8>,
        expected_revision: Option<Revision>,
    ) -> Result<Revision, StorageError>;
    fn remove_raw(&self, key: &DocKey) -> Result<(), StorageError>;
    fn scan_raw(&self, predicate: &dyn Fn(&DocKey) -> bool) -> Vec<(DocKey, Revision, Vec<u8>)>;
}

/// Typed convenience helpers layered over the raw byte interface.
pub trait KvStoreExt: KvStore {
    fn get<T: DeserializeOwned>(&self, key: &DocKey) -> Option<T> {
        let (_, bytes) = self.get_raw(key)?;
        serde_json::from_slice(&bytes).ok()
    }

    fn get_with_revision<T: DeserializeOwned>(&self, key: &DocKey) -> Option<(Revision, T)> {
        let (rev, bytes) = self.get_raw(key)?;
        serde_json::from_slice(&bytes).ok().map(|v| (rev, v))
    }

    fn put<T: Serialize>(
        &self,
        key: DocKey,
        value: &T,
        expected_revision: Option<Revision>,
    ) -> Result<Revision, StorageError> {
        let bytes = serde_json::to_vec(value).expect("document must serialize");
        self.put_raw(key, bytes, expected_revision)
    }

    fn scan<T: DeserializeOwned>(&self, predicate: impl Fn(&DocKey) -> bool) -> Vec<(DocKey, T)> {
        self.scan_raw(&predicate)
            .into_iter()
            .filter_map(|(k, _, bytes)| serde_json::from_slice(&bytes).ok().map(|v| (k, v)))
            .collect()
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

/// In-memory `KvStore` reference implementation, grounded in the
/// lock-guarded `HashMap` index pattern used by accountability-ledger-style
/// engines in the wider corpus.
#[derive(Default)]
pub struct MemoryStore {
    documents: Mutex<BTreeMap<DocKey, (Revision, Vec<u8>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get_raw(&self, key: &DocKey) -> Option<(Revision, Vec<u8>)> {
        self.documents.lock().unwrap().get(key).cloned()
    }

    fn put_raw(
        &self,
        key: DocKey,
        value: Vec<u8>,
        expected_revision: Option<Revision>,
    ) -> Result<Revision, StorageError> {
        let mut documents = self.documents.lock().unwrap();
        let next_revision = match (documents.get(&key), expected_revision) {
            (None, None) => 1,
            (None, Some(_)) => return Err(StorageError::RevisionConflict),
            (Some((current, _)), Some(expected)) if *current == expected => current + 1,
            (Some(_), Some(_)) => return Err(StorageError::RevisionConflict),
            (Some((current, _)), None) => current + 1,
        };
        documents.insert(key, (next_revision, value));
        Ok(next_revision)
    }

    fn remove_raw(&self, key: &DocKey) -> Result<(), StorageError> {
        let mut documents = self.documents.lock().unwrap();
        documents.remove(key).ok_or(StorageError::NotFound)?;
        Ok(())
    }

    fn scan_raw(&self, predicate: &dyn Fn(&DocKey) -> bool) -> Vec<(DocKey, Revision, Vec<u8>)> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| predicate(k))
            .map(|(k, (rev, bytes))| (k.clone(), *rev, bytes.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellId;

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        let key = DocKey::Ledger("cell-1".to_string() as CellId);
        let rev = store.put(key.clone(), &42u64, None).unwrap();
        assert_eq!(rev, 1);
        let value: u64 = store.get(&key).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn put_with_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let key = DocKey::Ledger("cell-1".to_string() as CellId);
        store.put(key.clone(), &1u64, None).unwrap();
        let err = store.put(key.clone(), &2u64, Some(99)).unwrap_err();
        assert_eq!(err, StorageError::RevisionConflict);
    }

    #[test]
    fn remove_missing_key_errors() {
        let store = MemoryStore::new();
        let key = DocKey::Ledger("missing".to_string() as CellId);
        assert_eq!(store.remove_raw(&key).unwrap_err(), StorageError::NotFound);
    }
}
