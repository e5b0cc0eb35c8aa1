//! Durable store contract consumed by the employee directory.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::StoreError;

use super::record::EmployeeRecord;

/// Result of an `upsert_many` call. Records not listed in `failed` were
/// written successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    pub written: usize,
    /// `(employee_id, reason)` for every record the store rejected.
    pub failed: Vec<(String, String)>,
}

impl UpsertReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Persistent backing for the [`EmployeeDirectory`](super::EmployeeDirectory).
///
/// `upsert_many` returns `Err` only when the whole call failed; per-record
/// failures are reported through [`UpsertReport::failed`].
pub trait EmployeeStore: Send + Sync {
    fn load_all(&self) -> Result<Vec<EmployeeRecord>, StoreError>;
    fn upsert_many(&self, records: &[EmployeeRecord]) -> Result<UpsertReport, StoreError>;
}

/// Bounded retry with capped exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// No delay between attempts.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before attempt number `attempt` (1-based). The first attempt
    /// never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 2).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(200), Duration::from_secs(5))
    }
}

/// Store kept entirely in memory. Used when no database is configured and
/// in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, EmployeeRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = EmployeeRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut map) = store.records.lock() {
            for record in records {
                map.insert(record.employee_id.clone(), record);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EmployeeStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
        let map = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        Ok(map.values().cloned().collect())
    }

    fn upsert_many(&self, records: &[EmployeeRecord]) -> Result<UpsertReport, StoreError> {
        let mut map = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))?;
        for record in records {
            map.insert(record.employee_id.clone(), record.clone());
        }
        Ok(UpsertReport {
            written: records.len(),
            failed: Vec::new(),
        })
    }
}
