//! Per-file state machine: classify, validate, apply, relocate, record.

pub mod outcome;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tracing::info_span;

use crate::classifier::{classify, Classification};
use crate::directory::EmployeeDirectory;
use crate::error::{FailureKind, StorageError};
use crate::storage::FileStorage;
use crate::validator::{Accepted, Rejection, RowDiagnostic, Validator, Verdict};

pub use outcome::{
    FileState, OutcomeLog, OutcomeStatus, ProcessingOutcome, RejectionRecord,
};

/// Result of one attempt at a file.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessAttempt {
    /// The file left the watched directory and its outcome was recorded.
    Terminal(ProcessingOutcome),
    /// The move failed; the file stays in place and is retried next cycle.
    RelocationPending { attempts: u32, error: String },
    /// Even the forced move into the invalid area failed. The path is
    /// skipped for the life of the processor.
    Quarantined { error: String },
}

/// Where a file goes once classification and validation are done.
enum Disposition {
    Spreadsheet {
        applied: usize,
        diagnostics: Vec<RowDiagnostic>,
    },
    Payslip {
        employee_id: String,
        period: String,
    },
    Rejected {
        rejection: Rejection,
        stage: FileState,
    },
}

impl Disposition {
    fn stage(&self) -> FileState {
        match self {
            Self::Spreadsheet { .. } => FileState::Applied,
            Self::Payslip { .. } => FileState::Validated,
            Self::Rejected { stage, .. } => *stage,
        }
    }

    fn applied_rows(&self) -> usize {
        match self {
            Self::Spreadsheet { applied, .. } => *applied,
            _ => 0,
        }
    }
}

pub struct Processor {
    directory: Arc<EmployeeDirectory>,
    validator: Validator,
    storage: FileStorage,
    outcomes: Arc<OutcomeLog>,
    max_relocation_attempts: u32,
    relocation_failures: HashMap<PathBuf, u32>,
    quarantined: HashSet<PathBuf>,
}

impl Processor {
    pub fn new(
        directory: Arc<EmployeeDirectory>,
        storage: FileStorage,
        outcomes: Arc<OutcomeLog>,
        max_relocation_attempts: u32,
    ) -> Self {
        Self {
            validator: Validator::new(Arc::clone(&directory)),
            directory,
            storage,
            outcomes,
            max_relocation_attempts: max_relocation_attempts.max(1),
            relocation_failures: HashMap::new(),
            quarantined: HashSet::new(),
        }
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn is_quarantined(&self, path: &Path) -> bool {
        self.quarantined.contains(path)
    }

    pub fn quarantined_count(&self) -> usize {
        self.quarantined.len()
    }

    /// Failed relocation attempts so far for `path`.
    pub fn relocation_attempts(&self, path: &Path) -> u32 {
        self.relocation_failures.get(path).copied().unwrap_or(0)
    }

    pub fn process(&mut self, path: &Path) -> ProcessAttempt {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let _span = info_span!("process_file", file = %file_name).entered();

        let candidate = {
            let _step = info_span!("classify").entered();
            classify(path)
        };
        let classification = candidate.kind();
        debug!("Classified {} as {}", file_name, classification);

        let verdict = {
            let _step = info_span!("validate").entered();
            self.validator.validate(path, &candidate)
        };

        let disposition = match verdict {
            Verdict::Accepted(Accepted::Spreadsheet {
                records,
                diagnostics,
            }) => {
                let _step = info_span!("apply", rows = records.len()).entered();
                let applied = records.len();
                for record in records {
                    self.directory.upsert(record);
                }
                for diagnostic in &diagnostics {
                    let what = if diagnostic.row_skipped() {
                        "skipped row"
                    } else {
                        "row"
                    };
                    warn!(
                        "{}: {} {}: {}",
                        file_name, what, diagnostic.row, diagnostic.reason
                    );
                }
                Disposition::Spreadsheet {
                    applied,
                    diagnostics,
                }
            }
            Verdict::Accepted(Accepted::Payslip {
                employee_id,
                period,
            }) => Disposition::Payslip {
                employee_id,
                period,
            },
            Verdict::Rejected(rejection) => {
                let stage = if classification == Classification::Unrecognized {
                    FileState::Discovered
                } else {
                    FileState::Classified
                };
                Disposition::Rejected { rejection, stage }
            }
        };

        let relocated = {
            let _step = info_span!("relocate").entered();
            self.relocate(path, classification, &disposition)
        };

        match relocated {
            Ok(outcome) => {
                self.relocation_failures.remove(path);
                self.record(outcome)
            }
            Err(e) => self.relocation_failed(path, classification, &disposition, e),
        }
    }

    fn relocate(
        &self,
        path: &Path,
        classification: Classification,
        disposition: &Disposition,
    ) -> Result<ProcessingOutcome, StorageError> {
        match disposition {
            Disposition::Spreadsheet {
                applied,
                diagnostics,
            } => {
                let stored = self.storage.store_spreadsheet(path)?;
                Ok(
                    ProcessingOutcome::accepted(path.to_path_buf(), classification, stored)
                        .with_rows(*applied, diagnostics.clone()),
                )
            }
            Disposition::Payslip {
                employee_id,
                period,
            } => {
                let stored = self.storage.store_payslip(path, employee_id, period)?;
                Ok(ProcessingOutcome::accepted(
                    path.to_path_buf(),
                    classification,
                    stored,
                ))
            }
            Disposition::Rejected { rejection, stage } => {
                let record = RejectionRecord {
                    original_path: path,
                    classification,
                    failure_kind: rejection.kind,
                    reason: &rejection.reason,
                    stage: *stage,
                    row_diagnostics: &rejection.diagnostics,
                    rejected_at: Utc::now(),
                };
                let (stored, _) = self.storage.reject(path, &record)?;
                Ok(ProcessingOutcome::rejected(
                    path.to_path_buf(),
                    classification,
                    rejection.kind,
                    rejection.reason.clone(),
                    *stage,
                    stored,
                )
                .with_rows(0, rejection.diagnostics.clone()))
            }
        }
    }

    fn relocation_failed(
        &mut self,
        path: &Path,
        classification: Classification,
        disposition: &Disposition,
        error: StorageError,
    ) -> ProcessAttempt {
        let attempts = {
            let count = self.relocation_failures.entry(path.to_path_buf()).or_insert(0);
            *count += 1;
            *count
        };

        if attempts < self.max_relocation_attempts {
            warn!(
                "Relocation of {} failed (attempt {}/{}): {}",
                path.display(),
                attempts,
                self.max_relocation_attempts,
                error
            );
            return ProcessAttempt::RelocationPending {
                attempts,
                error: error.to_string(),
            };
        }

        self.relocation_failures.remove(path);
        let reason = format!(
            "could not relocate after {} attempts: {}",
            attempts, error
        );
        self.force_invalid(
            path,
            classification,
            FailureKind::RelocationFailed,
            reason,
            disposition.stage(),
            disposition.applied_rows(),
        )
    }

    /// Records a file whose processing panicked. The file is moved into
    /// the invalid area so the next cycle does not pick it up again.
    pub fn abandon(&mut self, path: &Path, message: &str) -> ProcessAttempt {
        self.relocation_failures.remove(path);
        let classification = classify(path).kind();
        self.force_invalid(
            path,
            classification,
            FailureKind::ValidationFailed,
            format!("processing aborted: {}", message),
            FileState::Discovered,
            0,
        )
    }

    /// Moves `path` into the invalid area without retry. A failed move
    /// quarantines the path.
    fn force_invalid(
        &mut self,
        path: &Path,
        classification: Classification,
        kind: FailureKind,
        reason: String,
        stage: FileState,
        applied_rows: usize,
    ) -> ProcessAttempt {
        let record = RejectionRecord {
            original_path: path,
            classification,
            failure_kind: kind,
            reason: &reason,
            stage,
            row_diagnostics: &[],
            rejected_at: Utc::now(),
        };

        match self.storage.reject(path, &record) {
            Ok((stored, _)) => {
                warn!("Forced {} into the invalid area: {}", path.display(), reason);
                let outcome = ProcessingOutcome::rejected(
                    path.to_path_buf(),
                    classification,
                    kind,
                    reason,
                    stage,
                    stored,
                )
                .with_rows(applied_rows, Vec::new());
                self.record(outcome)
            }
            Err(e) => {
                self.quarantined.insert(path.to_path_buf());
                let error = format!(
                    "{} quarantined, {}; forced move also failed: {}",
                    path.display(),
                    reason,
                    e
                );
                error!("{}", error);
                ProcessAttempt::Quarantined { error }
            }
        }
    }

    fn record(&self, outcome: ProcessingOutcome) -> ProcessAttempt {
        match &outcome.error_detail {
            Some(detail) => info!(
                "Rejected {} ({}): {}",
                outcome.file_path.display(),
                outcome.classification,
                detail
            ),
            None => info!(
                "Accepted {} ({}), {} rows applied, {} skipped",
                outcome.file_path.display(),
                outcome.classification,
                outcome.applied_rows,
                outcome.skipped_rows
            ),
        }
        self.outcomes.append(outcome.clone());
        ProcessAttempt::Terminal(outcome)
    }
}
