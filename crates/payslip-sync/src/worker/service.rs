//! The polling ingestion loop.
//!
//! One dedicated thread lists the watched directory every poll interval,
//! processes a bounded batch and flushes the employee directory when the
//! batch left it dirty. A crossbeam channel interrupts the sleep on
//! shutdown.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use chrono::Utc;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use tracing::info_span;

use crate::config::ServiceConfig;
use crate::directory::EmployeeDirectory;
use crate::error::WorkerError;
use crate::processor::{OutcomeLog, OutcomeStatus, ProcessAttempt, Processor};
use crate::status::{ServiceState, ServiceStats, SharedStatus, StatusReporter};
use crate::storage::FileStorage;

use super::scanner::{DirectoryScanner, FileIdentity};

/// Summary of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub discovered: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub retrying: usize,
    pub quarantined: usize,
    /// Files still waiting after this cycle.
    pub pending: usize,
    pub flushed: usize,
}

impl CycleReport {
    pub fn terminal(&self) -> usize {
        self.accepted + self.rejected
    }
}

/// State only the cycle touches.
struct CycleState {
    processor: Processor,
    /// Paths with a recorded outcome that are still visible in the listing,
    /// keyed to the file they had when processed.
    in_flight: HashMap<PathBuf, FileIdentity>,
}

/// Text of a caught panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct Worker {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct IngestionService {
    config: ServiceConfig,
    directory: Arc<EmployeeDirectory>,
    outcomes: Arc<OutcomeLog>,
    scanner: DirectoryScanner,
    cycle: Mutex<CycleState>,
    status: Arc<SharedStatus>,
    worker: Mutex<Option<Worker>>,
}

impl IngestionService {
    pub fn new(
        config: ServiceConfig,
        directory: Arc<EmployeeDirectory>,
        outcomes: Arc<OutcomeLog>,
    ) -> Self {
        let processed = config.processed_directory();
        let invalid = config.invalid_directory();
        let scanner = DirectoryScanner::new(
            &config.watch_directory,
            vec![processed.clone(), invalid.clone()],
        );
        let processor = Processor::new(
            Arc::clone(&directory),
            FileStorage::new(processed, invalid),
            Arc::clone(&outcomes),
            config.max_relocation_attempts,
        );

        let status = Arc::new(SharedStatus::new(config.enabled));
        let total_employees = directory.len();
        let processed_files = outcomes.count(OutcomeStatus::Accepted);
        let invalid_files = outcomes.count(OutcomeStatus::Rejected);
        status.update(|s| {
            s.stats.total_employees = total_employees;
            s.stats.processed_files = processed_files;
            s.stats.invalid_files = invalid_files;
        });

        Self {
            config,
            directory,
            outcomes,
            scanner,
            cycle: Mutex::new(CycleState {
                processor,
                in_flight: HashMap::new(),
            }),
            status,
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn directory(&self) -> &Arc<EmployeeDirectory> {
        &self.directory
    }

    pub fn outcomes(&self) -> &Arc<OutcomeLog> {
        &self.outcomes
    }

    pub fn reporter(&self) -> StatusReporter {
        StatusReporter::new(Arc::clone(&self.status))
    }

    pub fn is_running(&self) -> bool {
        self.status.snapshot().is_running
    }

    /// Creates the watched tree and starts the loop on its own thread.
    pub fn start(self: &Arc<Self>) -> Result<(), WorkerError> {
        if !self.config.enabled {
            return Err(WorkerError::Disabled);
        }

        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = worker.as_ref() {
            if !existing.handle.is_finished() {
                return Err(WorkerError::AlreadyRunning);
            }
        }
        if let Some(finished) = worker.take() {
            let _ = finished.handle.join();
        }

        self.prepare_layout()?;

        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let service = Arc::clone(self);
        let interval = self.config.poll_interval();

        self.status.update(|s| {
            s.is_running = true;
            s.state = ServiceState::Idle;
            s.last_error = None;
        });

        let handle = std::thread::Builder::new()
            .name("payslip-sync-worker".to_string())
            .spawn(move || {
                info!(
                    "Watching {} every {}s",
                    service.config.watch_directory.display(),
                    interval.as_secs()
                );

                loop {
                    match panic::catch_unwind(AssertUnwindSafe(|| service.run_cycle())) {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => {
                            error!("Ingestion loop halted: {}", e);
                            service.flush_directory();
                            service.status.update(|s| {
                                s.is_running = false;
                                s.state = ServiceState::Failed;
                                s.last_error = Some(e.to_string());
                            });
                            return;
                        }
                        Err(payload) => {
                            let message = format!(
                                "ingestion cycle panicked: {}",
                                panic_message(payload.as_ref())
                            );
                            error!("{}", message);
                            service.status.update(|s| {
                                s.is_running = false;
                                s.state = ServiceState::Failed;
                                s.last_error = Some(message);
                            });
                            return;
                        }
                    }

                    service.status.set_state(ServiceState::Sleeping);
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                service.flush_directory();
                service.status.update(|s| {
                    s.is_running = false;
                    s.state = ServiceState::Stopped;
                });
                info!("Ingestion service stopped");
            })
            .map_err(|e| {
                self.status.update(|s| s.is_running = false);
                WorkerError::SpawnFailed(e.to_string())
            })?;

        *worker = Some(Worker {
            shutdown: shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Signals the loop, waits for the current cycle to finish and flushes.
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match worker {
            Some(worker) => {
                info!("Stopping ingestion service...");
                let _ = worker.shutdown.try_send(());
                if worker.handle.join().is_err() {
                    error!("Ingestion worker panicked");
                    self.status.update(|s| {
                        s.is_running = false;
                        s.state = ServiceState::Failed;
                        s.last_error = Some("ingestion worker panicked".to_string());
                    });
                }
            }
            None => {
                self.flush_directory();
            }
        }
    }

    /// Runs one full cycle synchronously. An error means the watched
    /// directory could not be listed; per-file problems never abort it.
    pub fn run_cycle(&self) -> Result<CycleReport, WorkerError> {
        let mut cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        let _span = info_span!("scan_cycle").entered();

        self.status.set_state(ServiceState::Scanning);
        let listing = match self.scanner.scan() {
            Ok(listing) => listing,
            Err(e) => {
                self.status.update(|s| s.last_error = Some(e.to_string()));
                return Err(e);
            }
        };

        // A path that is visible again with different content is a new upload.
        let visible: HashSet<&PathBuf> = listing.iter().collect();
        cycle.in_flight.retain(|p, identity| {
            visible.contains(p) && FileIdentity::of(p).as_ref() == Some(identity)
        });

        let candidates: Vec<PathBuf> = listing
            .iter()
            .filter(|p| !cycle.in_flight.contains_key(*p) && !cycle.processor.is_quarantined(p))
            .cloned()
            .collect();

        let mut report = CycleReport {
            discovered: candidates.len(),
            ..Default::default()
        };
        let mut last_error = None;

        if !candidates.is_empty() {
            self.status.set_state(ServiceState::Processing);
            debug!(
                "Processing {} of {} pending files",
                candidates.len().min(self.config.batch_size),
                candidates.len()
            );
        }

        for path in candidates.iter().take(self.config.batch_size) {
            let identity = FileIdentity::of(path);
            let attempt =
                match panic::catch_unwind(AssertUnwindSafe(|| cycle.processor.process(path))) {
                    Ok(attempt) => attempt,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!("Processing {} panicked: {}", path.display(), message);
                        last_error = Some(format!(
                            "processing {} panicked: {}",
                            path.display(),
                            message
                        ));
                        cycle.processor.abandon(path, &message)
                    }
                };

            match attempt {
                ProcessAttempt::Terminal(outcome) => {
                    if outcome.is_accepted() {
                        report.accepted += 1;
                    } else {
                        report.rejected += 1;
                    }
                    if let Some(identity) = identity {
                        cycle.in_flight.insert(path.clone(), identity);
                    }
                }
                ProcessAttempt::RelocationPending { error, .. } => {
                    report.retrying += 1;
                    last_error = Some(format!(
                        "relocation failed for {}: {}",
                        path.display(),
                        error
                    ));
                }
                ProcessAttempt::Quarantined { error } => {
                    report.quarantined += 1;
                    last_error = Some(error);
                }
            }
        }
        report.pending = report.discovered - report.terminal() - report.quarantined;

        let flush_warning = if self.directory.is_dirty() {
            self.status.set_state(ServiceState::Flushing);
            match self.directory.flush_to_store() {
                Ok(flush) => {
                    report.flushed = flush.flushed;
                    None
                }
                Err(e) => {
                    warn!("{}", e);
                    Some(e.to_string())
                }
            }
        } else {
            None
        };
        let durability_warning = flush_warning.or_else(|| self.outcomes.mirror_error());

        let total_employees = self.directory.len();
        let quarantined_files = cycle.processor.quarantined_count();
        let processed_files = self.outcomes.count(OutcomeStatus::Accepted);
        let invalid_files = self.outcomes.count(OutcomeStatus::Rejected);
        self.status.update(|s| {
            let stats = ServiceStats {
                total_employees,
                processed_files,
                invalid_files,
                pending_files: report.pending,
                quarantined_files,
                last_updated: s.stats.last_updated,
            };
            if stats != s.stats {
                s.stats = ServiceStats {
                    last_updated: Some(Utc::now()),
                    ..stats
                };
            }
            s.cycles += 1;
            s.durability_warning = durability_warning;
            if last_error.is_some() {
                s.last_error = last_error;
            }
        });

        if report.terminal() > 0 {
            info!(
                "Cycle done: {} accepted, {} rejected, {} pending",
                report.accepted, report.rejected, report.pending
            );
        }
        Ok(report)
    }

    fn prepare_layout(&self) -> Result<(), WorkerError> {
        let watch = &self.config.watch_directory;
        if let Err(e) = std::fs::create_dir_all(watch) {
            error!("Cannot create watched directory {}: {}", watch.display(), e);
            return Err(WorkerError::WatchedDirectoryUnavailable(watch.clone()));
        }

        let cycle = self.cycle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = cycle.processor.storage().ensure_layout() {
            error!("Cannot prepare output areas: {}", e);
            return Err(WorkerError::WatchedDirectoryUnavailable(watch.clone()));
        }
        Ok(())
    }

    fn flush_directory(&self) {
        if !self.directory.is_dirty() {
            return;
        }
        match self.directory.flush_to_store() {
            Ok(report) => {
                info!("Flushed {} employee records", report.flushed);
                self.status.update(|s| s.durability_warning = None);
            }
            Err(e) => {
                error!("Final flush failed: {}", e);
                self.status
                    .update(|s| s.durability_warning = Some(e.to_string()));
            }
        }
    }
}
