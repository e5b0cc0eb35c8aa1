//! Read-only view of the ingestion service.
//!
//! The worker publishes into a [`SharedStatus`] after every state change and
//! cycle; [`StatusReporter::status`] only copies that cached state, so it
//! never touches the filesystem or the store.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Idle,
    Scanning,
    Processing,
    Flushing,
    Sleeping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub total_employees: usize,
    pub processed_files: u64,
    pub invalid_files: u64,
    pub pending_files: usize,
    pub quarantined_files: usize,
    /// Last time a counter changed.
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub enabled: bool,
    pub is_running: bool,
    pub state: ServiceState,
    pub stats: ServiceStats,
    pub pending_files: usize,
    /// Completed polling cycles since start.
    pub cycles: u64,
    pub last_error: Option<String>,
    pub durability_warning: Option<String>,
}

/// Mutable status cell written by the worker.
#[derive(Debug)]
pub struct SharedStatus {
    inner: RwLock<ServiceStatus>,
}

impl SharedStatus {
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: RwLock::new(ServiceStatus {
                enabled,
                is_running: false,
                state: ServiceState::Idle,
                stats: ServiceStats::default(),
                pending_files: 0,
                cycles: 0,
                last_error: None,
                durability_warning: None,
            }),
        }
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ServiceStatus),
    {
        let mut status = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
        status.pending_files = status.stats.pending_files;
    }

    pub fn set_state(&self, state: ServiceState) {
        self.update(|s| s.state = state);
    }

    pub fn snapshot(&self) -> ServiceStatus {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Cloneable handle for request handlers.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    shared: Arc<SharedStatus>,
}

impl StatusReporter {
    pub fn new(shared: Arc<SharedStatus>) -> Self {
        Self { shared }
    }

    pub fn status(&self) -> ServiceStatus {
        self.shared.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_status() {
        let reporter = StatusReporter::new(Arc::new(SharedStatus::new(true)));
        let status = reporter.status();
        assert!(status.enabled);
        assert!(!status.is_running);
        assert_eq!(status.state, ServiceState::Idle);
        assert_eq!(status.stats, ServiceStats::default());
    }

    #[test]
    fn test_update_mirrors_pending_files() {
        let shared = Arc::new(SharedStatus::new(true));
        let reporter = StatusReporter::new(Arc::clone(&shared));

        shared.update(|s| {
            s.stats.pending_files = 4;
            s.stats.processed_files = 2;
        });

        let status = reporter.status();
        assert_eq!(status.pending_files, 4);
        assert_eq!(status.stats.processed_files, 2);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let shared = SharedStatus::new(false);
        shared.update(|s| {
            s.state = ServiceState::Failed;
            s.last_error = Some("watched directory gone".into());
        });

        let json = serde_json::to_value(shared.snapshot()).unwrap();
        assert_eq!(json["isRunning"], false);
        assert_eq!(json["state"], "failed");
        assert_eq!(json["lastError"], "watched directory gone");
        assert_eq!(json["stats"]["totalEmployees"], 0);
        assert!(json["durabilityWarning"].is_null());
    }
}
