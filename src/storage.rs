//! The vector store abstraction: a trait any backing store
//! implements, plus an in-process reference implementation.
//!
//! Records are keyed by caller-supplied string id; besides plain
//! put/get/delete, the trait carries scan, chunked batch insert, and an
//! in-place update-with-mutator operation so access metadata (last access
//! time, access count) can be bumped under a single per-id lock.

use crate::error::{Error, Result};
use crate::record::VectorRecord;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Abstraction over a backing key-value store for vector records. A
/// namespace owns exactly one `VectorStore`, so implementations need not be internally lock-free, only
/// internally consistent under concurrent readers.
pub trait VectorStore: Send + Sync {
    /// Inserts or overwrites the record for `record.id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store rejects the write (e.g. an
    /// I/O failure for a disk-backed implementation).
    fn put(&self, record: VectorRecord) -> Result<()>;

    /// Inserts or overwrites a batch of records. Implementations should
    /// make this more efficient than repeated `put` calls where possible.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BatchPartialFailure`] if only some records could be
    /// written; other errors indicate the whole batch failed.
    fn put_batch(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut errors = HashMap::new();
        let total = records.len();
        let mut succeeded = 0;
        for record in records {
            let id = record.id.clone();
            match self.put(record) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    errors.insert(id, e.to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::BatchPartialFailure {
                succeeded,
                failed: total - succeeded,
                errors,
            })
        }
    }

    /// Fetches the record for `id`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store could not be read.
    fn get(&self, id: &str) -> Result<Option<VectorRecord>>;

    /// Fetches records for every id in `ids`, in the given order, with
    /// `None` for ids that don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store could not be read.
    fn get_many(&self, ids: &[String]) -> Result<Vec<Option<VectorRecord>>> {
        ids.iter().map(|id| self.get(id)).collect()
    }

    /// Applies `mutate` to the stored record for `id` and writes it back,
    /// used for access-metadata bumps (`record_access`) and metadata
    /// patches without a full read-modify-write race at the caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` does not exist.
    fn update_in_place(&self, id: &str, mutate: &mut dyn FnMut(&mut VectorRecord)) -> Result<()>;

    /// Deletes the record for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::VectorNotFound`] if `id` does not exist.
    fn delete(&self, id: &str) -> Result<()>;

    /// Deletes every record in `ids`, returning how many were actually
    /// present and removed.
    ///
    /// # Errors
    ///
    /// Returns an error only for underlying store failures; missing ids are
    /// silently skipped (not counted as failures) since batched deletes are
    /// idempotent by design.
    fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in ids {
            if self.delete(id).is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Returns true if `id` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store could not be read.
    fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Returns the total number of stored records.
    fn count(&self) -> usize;

    /// Calls `visit` for every stored record. Used by the search engine's
    /// brute-force/filtered scan path.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store could not be read.
    fn scan(&self, visit: &mut dyn FnMut(&VectorRecord)) -> Result<()>;

    /// Removes every record from the store.
    fn clear(&self);

    /// Total approximate size in bytes of all stored records.
    fn approx_size_bytes(&self) -> usize;
}

/// An in-memory [`VectorStore`] reference implementation,
/// backing the default/embedded deployment mode.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, VectorRecord>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryStore {
    fn put(&self, record: VectorRecord) -> Result<()> {
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<VectorRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    fn update_in_place(&self, id: &str, mutate: &mut dyn FnMut(&mut VectorRecord)) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))?;
        mutate(record);
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Error::VectorNotFound(id.to_string()))
    }

    fn count(&self) -> usize {
        self.records.read().len()
    }

    fn scan(&self, visit: &mut dyn FnMut(&VectorRecord)) -> Result<()> {
        for record in self.records.read().values() {
            visit(record);
        }
        Ok(())
    }

    fn clear(&self) {
        self.records.write().clear();
    }

    fn approx_size_bytes(&self) -> usize {
        self.records.read().values().map(VectorRecord::approx_size_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> VectorRecord {
        VectorRecord::new(id.to_string(), vec![1.0, 2.0], None, 0)
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = MemoryStore::new();
        store.put(record("a")).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap().id, "a");
    }

    #[test]
    fn get_missing_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get("missing").unwrap().is_none());
    }

    #[test]
    fn delete_missing_errors() {
        let store = MemoryStore::new();
        assert!(matches!(store.delete("missing"), Err(Error::VectorNotFound(_))));
    }

    #[test]
    fn update_in_place_bumps_access() {
        let store = MemoryStore::new();
        store.put(record("a")).unwrap();
        store.update_in_place("a", &mut |r| r.record_access(100)).unwrap();
        let got = store.get("a").unwrap().unwrap();
        assert_eq!(got.access_count, 1);
        assert_eq!(got.last_accessed_at, 100);
    }

    #[test]
    fn put_batch_reports_partial_failure() {
        let store = MemoryStore::new();
        store.put(record("dup")).unwrap();
        // Two puts of distinct ids always succeed for MemoryStore; exercise
        // the trait-default batching path with a mix of valid records.
        let result = store.put_batch(vec![record("a"), record("b")]);
        assert!(result.is_ok());
        assert_eq!(store.count(), 3);
    }

    #[test]
    fn scan_visits_every_record() {
        let store = MemoryStore::new();
        store.put(record("a")).unwrap();
        store.put(record("b")).unwrap();
        let mut seen = Vec::new();
        store.scan(&mut |r| seen.push(r.id.clone())).unwrap();
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn delete_many_counts_only_present_ids() {
        let store = MemoryStore::new();
        store.put(record("a")).unwrap();
        let removed = store
            .delete_many(&["a".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[test]
    fn approx_size_grows_with_metadata() {
        let store = MemoryStore::new();
        let mut r = record("a");
        r.metadata = Some(json!({"k": "v".repeat(100)}));
        let with_meta = r.approx_size_bytes();
        store.put(r).unwrap();
        assert!(store.approx_size_bytes() >= with_meta);
    }
}
