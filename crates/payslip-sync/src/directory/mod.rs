//! In-memory employee directory backed by a durable store.
//!
//! The directory is the only component that owns [`EmployeeRecord`]s. It is
//! shared between the ingestion worker (writer) and request handlers
//! (readers) behind an `RwLock`; readers always receive clones.

pub mod record;
pub mod store;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info, warn};

use crate::error::DirectoryError;

pub use record::EmployeeRecord;
pub use store::{EmployeeStore, MemoryStore, RetryPolicy, UpsertReport};

/// Summary of a successful [`EmployeeDirectory::flush_to_store`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub flushed: usize,
    pub attempts: u32,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, EmployeeRecord>,
    /// employee_id -> generation of the write that made it dirty.
    dirty: HashMap<String, u64>,
    generation: u64,
}

pub struct EmployeeDirectory {
    store: Arc<dyn EmployeeStore>,
    retry: RetryPolicy,
    inner: RwLock<Inner>,
}

impl EmployeeDirectory {
    pub fn new(store: Arc<dyn EmployeeStore>) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Arc<dyn EmployeeStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            inner: RwLock::new(Inner::default()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, employee_id: &str) -> Option<EmployeeRecord> {
        self.read().records.get(employee_id).cloned()
    }

    pub fn contains(&self, employee_id: &str) -> bool {
        self.read().records.contains_key(employee_id)
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dirty_count(&self) -> usize {
        self.read().dirty.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_count() > 0
    }

    /// Inserts or replaces the record with the same `employee_id` and marks
    /// it for the next flush.
    pub fn upsert(&self, record: EmployeeRecord) {
        let mut inner = self.write();
        inner.generation += 1;
        let generation = inner.generation;
        inner.dirty.insert(record.employee_id.clone(), generation);
        inner.records.insert(record.employee_id.clone(), record);
    }

    /// Point-in-time copy of every record, ordered by `employee_id`.
    pub fn snapshot(&self) -> Vec<EmployeeRecord> {
        let mut records: Vec<EmployeeRecord> = {
            let inner = self.read();
            inner.records.values().cloned().collect()
        };
        records.sort_by(|a, b| a.employee_id.cmp(&b.employee_id));
        records
    }

    /// Replaces the in-memory content with the store's content.
    ///
    /// Records that are still dirty are laid back over the loaded data so an
    /// unflushed write is never lost by a resync. Returns the number of
    /// records loaded from the store.
    pub fn hydrate_from_store(&self) -> Result<usize, DirectoryError> {
        let loaded = self
            .store
            .load_all()
            .map_err(DirectoryError::StoreReadFailed)?;
        let loaded_count = loaded.len();

        let mut inner = self.write();
        let mut records: HashMap<String, EmployeeRecord> = loaded
            .into_iter()
            .map(|r| (r.employee_id.clone(), r))
            .collect();

        for id in inner.dirty.keys() {
            if let Some(record) = inner.records.get(id) {
                records.insert(id.clone(), record.clone());
            }
        }
        if !inner.dirty.is_empty() {
            warn!(
                "Hydrated directory kept {} unflushed records over store content",
                inner.dirty.len()
            );
        }

        inner.records = records;
        info!("Employee directory hydrated with {} records", loaded_count);
        Ok(loaded_count)
    }

    /// Persists every dirty record, retrying with the configured backoff.
    ///
    /// Calling this with nothing dirty performs no store call. On exhaustion
    /// the records that could not be written stay dirty and the error is a
    /// durability warning for the caller to surface.
    pub fn flush_to_store(&self) -> Result<FlushReport, DirectoryError> {
        let mut pending: Vec<(EmployeeRecord, u64)> = {
            let inner = self.read();
            inner
                .dirty
                .iter()
                .filter_map(|(id, gen)| inner.records.get(id).map(|r| (r.clone(), *gen)))
                .collect()
        };

        if pending.is_empty() {
            return Ok(FlushReport::default());
        }

        let total = pending.len();
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            let delay = self.retry.delay_for(attempt);
            if !delay.is_zero() {
                debug!("Retrying store flush in {:?} (attempt {})", delay, attempt);
                std::thread::sleep(delay);
            }

            let batch: Vec<EmployeeRecord> = pending.iter().map(|(r, _)| r.clone()).collect();
            match self.store.upsert_many(&batch) {
                Ok(report) => {
                    let failed: HashSet<&str> =
                        report.failed.iter().map(|(id, _)| id.as_str()).collect();
                    let (written, remaining): (Vec<_>, Vec<_>) = pending
                        .into_iter()
                        .partition(|(r, _)| !failed.contains(r.employee_id.as_str()));
                    self.clear_dirty(&written);
                    pending = remaining;

                    if pending.is_empty() {
                        debug!("Flushed {} employee records", total);
                        return Ok(FlushReport {
                            flushed: total,
                            attempts: attempt,
                        });
                    }

                    if let Some((id, reason)) = report.failed.first() {
                        last_reason = format!("record '{}': {}", id, reason);
                    }
                    warn!(
                        "Store rejected {} of {} records on attempt {}/{}",
                        pending.len(),
                        batch.len(),
                        attempt,
                        max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Store write failed on attempt {}/{}: {}",
                        attempt, max_attempts, e
                    );
                    last_reason = e.to_string();
                }
            }
        }

        Err(DirectoryError::StoreWriteFailed {
            attempts: max_attempts,
            pending: pending.len(),
            reason: last_reason,
        })
    }

    fn clear_dirty(&self, written: &[(EmployeeRecord, u64)]) {
        let mut inner = self.write();
        for (record, generation) in written {
            // A newer upsert during the flush keeps the entry dirty.
            if inner.dirty.get(&record.employee_id) == Some(generation) {
                inner.dirty.remove(&record.employee_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then delegates to a memory store.
    struct FlakyStore {
        inner: MemoryStore,
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryStore::new(),
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl EmployeeStore for FlakyStore {
        fn load_all(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
            self.inner.load_all()
        }

        fn upsert_many(&self, records: &[EmployeeRecord]) -> Result<UpsertReport, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(StoreError::Unavailable("disk full".to_string()));
            }
            self.inner.upsert_many(records)
        }
    }

    /// Rejects one specific employee id on every call.
    struct RejectingStore {
        inner: MemoryStore,
        reject: &'static str,
    }

    impl EmployeeStore for RejectingStore {
        fn load_all(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
            self.inner.load_all()
        }

        fn upsert_many(&self, records: &[EmployeeRecord]) -> Result<UpsertReport, StoreError> {
            let (bad, good): (Vec<_>, Vec<_>) = records
                .iter()
                .cloned()
                .partition(|r| r.employee_id == self.reject);
            let mut report = self.inner.upsert_many(&good)?;
            report.failed = bad
                .into_iter()
                .map(|r| (r.employee_id, "constraint violation".to_string()))
                .collect();
            Ok(report)
        }
    }

    fn directory(store: Arc<dyn EmployeeStore>) -> EmployeeDirectory {
        EmployeeDirectory::with_retry_policy(store, RetryPolicy::immediate(3))
    }

    #[test]
    fn test_upsert_and_get() {
        let dir = directory(Arc::new(MemoryStore::new()));
        dir.upsert(EmployeeRecord::new("E100", "N900", "Jane Doe"));

        let found = dir.get("E100").unwrap();
        assert_eq!(found.name, "Jane Doe");
        assert!(dir.get("E999").is_none());
        assert!(dir.is_dirty());
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let dir = directory(Arc::new(MemoryStore::new()));
        dir.upsert(EmployeeRecord::new("E1", "N1", "Old Name"));
        dir.upsert(EmployeeRecord::new("E1", "N2", "New Name"));

        assert_eq!(dir.len(), 1);
        let record = dir.get("E1").unwrap();
        assert_eq!(record.national_id, "N2");
        assert_eq!(record.name, "New Name");
    }

    #[test]
    fn test_snapshot_is_sorted_copy() {
        let dir = directory(Arc::new(MemoryStore::new()));
        dir.upsert(EmployeeRecord::new("E3", "N3", "C"));
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));
        dir.upsert(EmployeeRecord::new("E2", "N2", "B"));

        let mut snapshot = dir.snapshot();
        let ids: Vec<&str> = snapshot.iter().map(|r| r.employee_id.as_str()).collect();
        assert_eq!(ids, vec!["E1", "E2", "E3"]);

        snapshot[0].name = "Changed".to_string();
        assert_eq!(dir.get("E1").unwrap().name, "A");
    }

    #[test]
    fn test_flush_with_nothing_dirty_is_noop() {
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let dir = directory(store.clone());

        let report = dir.flush_to_store().unwrap();
        assert_eq!(report, FlushReport::default());
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_flush_clears_dirty_and_second_flush_is_noop() {
        let store = Arc::new(MemoryStore::new());
        let dir = directory(store.clone());
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));

        let report = dir.flush_to_store().unwrap();
        assert_eq!(report.flushed, 1);
        assert_eq!(report.attempts, 1);
        assert!(!dir.is_dirty());
        assert_eq!(store.len(), 1);

        assert_eq!(dir.flush_to_store().unwrap().flushed, 0);
    }

    #[test]
    fn test_flush_retries_transient_failures() {
        let store = Arc::new(FlakyStore::new(2));
        let dir = directory(store.clone());
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));

        let report = dir.flush_to_store().unwrap();
        assert_eq!(report.attempts, 3);
        assert!(!dir.is_dirty());
    }

    #[test]
    fn test_flush_exhaustion_keeps_records_dirty_and_readable() {
        let store = Arc::new(FlakyStore::new(u32::MAX));
        let dir = directory(store.clone());
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));

        let err = dir.flush_to_store().unwrap_err();
        match err {
            DirectoryError::StoreWriteFailed {
                attempts, pending, ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(pending, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(dir.is_dirty());
        assert_eq!(dir.get("E1").unwrap().name, "A");
    }

    #[test]
    fn test_flush_partial_failure_keeps_only_failed_dirty() {
        let store = Arc::new(RejectingStore {
            inner: MemoryStore::new(),
            reject: "E2",
        });
        let dir = directory(store.clone());
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));
        dir.upsert(EmployeeRecord::new("E2", "N2", "B"));

        let err = dir.flush_to_store().unwrap_err();
        assert!(err.to_string().contains("E2"));
        assert_eq!(dir.dirty_count(), 1);
        assert_eq!(store.inner.len(), 1);
    }

    #[test]
    fn test_flush_then_hydrate_round_trip() {
        let store: Arc<dyn EmployeeStore> = Arc::new(MemoryStore::new());
        let dir = directory(Arc::clone(&store));
        dir.upsert(EmployeeRecord::new("E1", "N1", "A").with_attribute("Department", "HR"));
        dir.upsert(EmployeeRecord::new("E2", "N2", "B"));
        dir.flush_to_store().unwrap();

        let fresh = directory(store);
        assert_eq!(fresh.hydrate_from_store().unwrap(), 2);
        assert_eq!(fresh.snapshot(), dir.snapshot());
        assert!(!fresh.is_dirty());
    }

    #[test]
    fn test_hydrate_keeps_unflushed_writes() {
        let store = Arc::new(MemoryStore::with_records([EmployeeRecord::new(
            "E1", "N1", "Stored",
        )]));
        let dir = directory(store);
        dir.upsert(EmployeeRecord::new("E1", "N1", "Unflushed"));
        dir.upsert(EmployeeRecord::new("E9", "N9", "Local only"));

        dir.hydrate_from_store().unwrap();

        assert_eq!(dir.get("E1").unwrap().name, "Unflushed");
        assert!(dir.contains("E9"));
        assert_eq!(dir.dirty_count(), 2);
    }

    #[test]
    fn test_hydrate_replaces_clean_content() {
        let store = Arc::new(MemoryStore::with_records([EmployeeRecord::new(
            "E2", "N2", "B",
        )]));
        let dir = directory(store.clone());
        dir.upsert(EmployeeRecord::new("E1", "N1", "A"));
        dir.flush_to_store().unwrap();

        // Flushed E1 is now in the store alongside E2.
        dir.hydrate_from_store().unwrap();
        assert_eq!(dir.len(), 2);
    }
}
