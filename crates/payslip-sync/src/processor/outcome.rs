use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::classifier::Classification;
use crate::db::outcome_repo::{self, OutcomeRow};
use crate::db::Database;
use crate::error::FailureKind;
use crate::validator::RowDiagnostic;

/// Per-file processing stages, in order. An outcome records the last one
/// the file completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileState {
    Discovered,
    Classified,
    Validated,
    Applied,
    Relocated,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Classified => "classified",
            Self::Validated => "validated",
            Self::Applied => "applied",
            Self::Relocated => "relocated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Accepted,
    Rejected,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Terminal record for one file. Created once the file has left the
/// watched directory and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOutcome {
    pub id: String,
    pub file_path: PathBuf,
    pub classification: Classification,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub stage: FileState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<PathBuf>,
    pub applied_rows: usize,
    pub skipped_rows: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<RowDiagnostic>,
    pub timestamp: DateTime<Utc>,
}

impl ProcessingOutcome {
    pub fn accepted(file_path: PathBuf, classification: Classification, stored_path: PathBuf) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path,
            classification,
            status: OutcomeStatus::Accepted,
            failure_kind: None,
            error_detail: None,
            stage: FileState::Relocated,
            stored_path: Some(stored_path),
            applied_rows: 0,
            skipped_rows: 0,
            diagnostics: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn rejected(
        file_path: PathBuf,
        classification: Classification,
        kind: FailureKind,
        detail: impl Into<String>,
        stage: FileState,
        stored_path: PathBuf,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_path,
            classification,
            status: OutcomeStatus::Rejected,
            failure_kind: Some(kind),
            error_detail: Some(detail.into()),
            stage,
            stored_path: Some(stored_path),
            applied_rows: 0,
            skipped_rows: 0,
            diagnostics: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_rows(mut self, applied: usize, diagnostics: Vec<RowDiagnostic>) -> Self {
        self.applied_rows = applied;
        self.skipped_rows = diagnostics.iter().filter(|d| d.row_skipped()).count();
        if self.status == OutcomeStatus::Accepted && !diagnostics.is_empty() {
            self.failure_kind = Some(FailureKind::PartialRowFailure);
        }
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_accepted(&self) -> bool {
        self.status == OutcomeStatus::Accepted
    }

    pub fn to_row(&self) -> OutcomeRow {
        OutcomeRow {
            id: self.id.clone(),
            file_path: self.file_path.to_string_lossy().to_string(),
            classification: self.classification.as_str().to_string(),
            status: self.status.as_str().to_string(),
            failure_kind: self.failure_kind.map(|k| format!("{:?}", k)),
            error_detail: self.error_detail.clone(),
            stage: self.stage.as_str().to_string(),
            stored_path: self
                .stored_path
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            applied_rows: self.applied_rows as i64,
            skipped_rows: self.skipped_rows as i64,
            recorded_at: self.timestamp.to_rfc3339(),
        }
    }
}

/// The diagnostic record written next to a rejected file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionRecord<'a> {
    pub original_path: &'a std::path::Path,
    pub classification: Classification,
    pub failure_kind: FailureKind,
    pub reason: &'a str,
    pub stage: FileState,
    #[serde(skip_serializing_if = "no_rows")]
    pub row_diagnostics: &'a [RowDiagnostic],
    pub rejected_at: DateTime<Utc>,
}

fn no_rows(rows: &&[RowDiagnostic]) -> bool {
    rows.is_empty()
}

/// Outcomes kept in memory once a database mirror holds the full history.
pub const DEFAULT_RETAINED_OUTCOMES: usize = 256;

#[derive(Default)]
struct Retained {
    entries: VecDeque<ProcessingOutcome>,
    accepted: u64,
    rejected: u64,
}

/// Append-only log of terminal outcomes.
///
/// Without a database every outcome stays in memory. With one, each outcome
/// is mirrored into `processing_outcomes`, only the newest
/// [`DEFAULT_RETAINED_OUTCOMES`] stay in memory, and the totals start from
/// what the table already holds.
#[derive(Default)]
pub struct OutcomeLog {
    retained: RwLock<Retained>,
    capacity: Option<usize>,
    db: Option<Database>,
    mirror_error: Mutex<Option<String>>,
}

impl OutcomeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_database(db: Database) -> Self {
        Self::with_database_and_capacity(db, DEFAULT_RETAINED_OUTCOMES)
    }

    pub fn with_database_and_capacity(db: Database, capacity: usize) -> Self {
        let mut retained = Retained::default();
        let mut mirror_error = None;
        let totals = outcome_repo::count_by_status(&db, OutcomeStatus::Accepted.as_str()).and_then(
            |accepted| {
                outcome_repo::count_by_status(&db, OutcomeStatus::Rejected.as_str())
                    .map(|rejected| (accepted, rejected))
            },
        );
        match totals {
            Ok((accepted, rejected)) => {
                retained.accepted = accepted;
                retained.rejected = rejected;
            }
            Err(e) => {
                log::warn!("Failed to read outcome totals: {}", e);
                mirror_error = Some(format!("outcome totals unavailable: {}", e));
            }
        }

        Self {
            retained: RwLock::new(retained),
            capacity: Some(capacity.max(1)),
            db: Some(db),
            mirror_error: Mutex::new(mirror_error),
        }
    }

    /// Appends `outcome`. A failed database mirror is logged and kept as
    /// [`mirror_error`](Self::mirror_error); the in-memory entry stays.
    pub fn append(&self, outcome: ProcessingOutcome) {
        if let Some(db) = &self.db {
            let mut mirror_error = self
                .mirror_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match outcome_repo::insert(db, &outcome.to_row()) {
                Ok(()) => *mirror_error = None,
                Err(e) => {
                    log::warn!(
                        "Failed to record outcome for {}: {}",
                        outcome.file_path.display(),
                        e
                    );
                    *mirror_error = Some(format!("outcome log not persisted: {}", e));
                }
            }
        }

        let mut retained = self.retained.write().unwrap_or_else(PoisonError::into_inner);
        match outcome.status {
            OutcomeStatus::Accepted => retained.accepted += 1,
            OutcomeStatus::Rejected => retained.rejected += 1,
        }
        retained.entries.push_back(outcome);
        if let Some(capacity) = self.capacity {
            while retained.entries.len() > capacity {
                retained.entries.pop_front();
            }
        }
    }

    /// Outcomes currently held in memory.
    pub fn len(&self) -> usize {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// In-memory outcomes, oldest first.
    pub fn entries(&self) -> Vec<ProcessingOutcome> {
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .cloned()
            .collect()
    }

    /// Up to `limit` outcomes, newest first. Read from the database when one
    /// is attached, so entries beyond the in-memory window are included.
    pub fn history(&self, limit: usize) -> Vec<OutcomeRow> {
        if let Some(db) = &self.db {
            match outcome_repo::recent(db, limit as u64) {
                Ok(rows) => return rows,
                Err(e) => log::warn!("Failed to read outcome history: {}", e),
            }
        }
        self.retained
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .rev()
            .take(limit)
            .map(ProcessingOutcome::to_row)
            .collect()
    }

    /// Outcomes recorded with `status`, including those already persisted
    /// before this log was opened.
    pub fn count(&self, status: OutcomeStatus) -> u64 {
        let retained = self.retained.read().unwrap_or_else(PoisonError::into_inner);
        match status {
            OutcomeStatus::Accepted => retained.accepted,
            OutcomeStatus::Rejected => retained.rejected,
        }
    }

    pub fn mirror_error(&self) -> Option<String> {
        self.mirror_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(name: &str) -> ProcessingOutcome {
        ProcessingOutcome::accepted(
            PathBuf::from(format!("/watch/{name}")),
            Classification::Payslip,
            PathBuf::from(format!("/watch/processed/{name}")),
        )
    }

    #[test]
    fn test_partial_rows_mark_accepted_outcome() {
        let outcome = ProcessingOutcome::accepted(
            PathBuf::from("/watch/staff.xlsx"),
            Classification::Spreadsheet,
            PathBuf::from("/watch/processed/spreadsheets/staff.xlsx"),
        )
        .with_rows(
            2,
            vec![
                RowDiagnostic::skipped_row(4, "missing Name"),
                RowDiagnostic::dropped_attribute(5, "Grade", "Grade: error value #REF!"),
            ],
        );

        assert!(outcome.is_accepted());
        assert_eq!(outcome.failure_kind, Some(FailureKind::PartialRowFailure));
        assert_eq!(outcome.skipped_rows, 1);
        assert_eq!(outcome.diagnostics.len(), 2);
        assert!(outcome.error_detail.is_none());
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let json = serde_json::to_value(accepted("Payslip_E1_01.pdf")).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["classification"], "payslip");
        assert_eq!(json["stage"], "relocated");
        assert!(json.get("appliedRows").is_some());
        assert!(json.get("errorDetail").is_none());
    }

    #[test]
    fn test_log_counts_and_recent_order() {
        let log = OutcomeLog::new();
        log.append(accepted("a.pdf"));
        log.append(ProcessingOutcome::rejected(
            PathBuf::from("/watch/b.txt"),
            Classification::Unrecognized,
            FailureKind::ClassificationAmbiguous,
            "unsupported file type",
            FileState::Discovered,
            PathBuf::from("/watch/invalid/b.txt"),
        ));

        assert_eq!(log.len(), 2);
        assert_eq!(log.count(OutcomeStatus::Accepted), 1);
        assert_eq!(log.count(OutcomeStatus::Rejected), 1);
        assert_eq!(log.history(1)[0].file_path, "/watch/b.txt");
    }

    #[test]
    fn test_memory_window_is_bounded_with_database() {
        let db = Database::open_in_memory().unwrap();
        let log = OutcomeLog::with_database_and_capacity(db, 3);
        for i in 0..10 {
            log.append(accepted(&format!("Payslip_E{i}_01.pdf")));
        }

        assert_eq!(log.len(), 3);
        assert_eq!(
            log.entries()[0].file_path,
            PathBuf::from("/watch/Payslip_E7_01.pdf")
        );
        assert_eq!(log.count(OutcomeStatus::Accepted), 10);

        let history = log.history(20);
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].file_path, "/watch/Payslip_E9_01.pdf");
    }

    #[test]
    fn test_totals_resume_from_database() {
        let db = Database::open_in_memory().unwrap();
        {
            let log = OutcomeLog::with_database(db.clone());
            log.append(accepted("Payslip_E1_01.pdf"));
            log.append(accepted("Payslip_E2_01.pdf"));
        }

        let reopened = OutcomeLog::with_database(db);
        assert!(reopened.is_empty());
        assert_eq!(reopened.count(OutcomeStatus::Accepted), 2);
        assert_eq!(reopened.count(OutcomeStatus::Rejected), 0);
    }

    #[test]
    fn test_log_mirrors_into_database() {
        let db = Database::open_in_memory().unwrap();
        let log = OutcomeLog::with_database(db.clone());
        let outcome = accepted("Payslip_E1_01.pdf");
        let id = outcome.id.clone();
        log.append(outcome);

        let rows = outcome_repo::recent(&db, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].status, "accepted");
        assert!(log.mirror_error().is_none());
    }
}
