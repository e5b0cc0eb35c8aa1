//! Structural validation of classified candidates.

pub mod columns;
pub mod workbook;

use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::classifier::Candidate;
use crate::directory::{EmployeeDirectory, EmployeeRecord};
use crate::error::FailureKind;

pub use columns::{ColumnMap, RequiredColumn};
pub use workbook::{Cell, WorkbookRow};

/// A row-level problem found while extracting an otherwise valid
/// spreadsheet. Without `attribute` the whole row was skipped; with it only
/// that pass-through column was dropped and the row was still applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowDiagnostic {
    pub row: u32,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl RowDiagnostic {
    pub fn skipped_row(row: u32, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
            attribute: None,
        }
    }

    pub fn dropped_attribute(row: u32, attribute: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
            attribute: Some(attribute.into()),
        }
    }

    pub fn row_skipped(&self) -> bool {
        self.attribute.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accepted {
    Spreadsheet {
        records: Vec<EmployeeRecord>,
        diagnostics: Vec<RowDiagnostic>,
    },
    Payslip {
        employee_id: String,
        period: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub kind: FailureKind,
    pub reason: String,
    pub diagnostics: Vec<RowDiagnostic>,
}

impl Rejection {
    fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
            diagnostics: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(Accepted),
    Rejected(Rejection),
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

pub struct Validator {
    directory: Arc<EmployeeDirectory>,
}

impl Validator {
    pub fn new(directory: Arc<EmployeeDirectory>) -> Self {
        Self { directory }
    }

    pub fn validate(&self, path: &Path, candidate: &Candidate) -> Verdict {
        match candidate {
            Candidate::Spreadsheet { .. } => validate_spreadsheet(path),
            Candidate::Payslip {
                employee_id,
                period,
            } => self.validate_payslip(employee_id, period),
            Candidate::Unrecognized { reason } => Verdict::Rejected(Rejection::new(
                FailureKind::ClassificationAmbiguous,
                reason.clone(),
            )),
        }
    }

    fn validate_payslip(&self, employee_id: &str, period: &str) -> Verdict {
        if !self.directory.contains(employee_id) {
            return Verdict::Rejected(Rejection::new(
                FailureKind::ValidationFailed,
                format!("employee id '{}' not found in directory", employee_id),
            ));
        }
        Verdict::Accepted(Accepted::Payslip {
            employee_id: employee_id.to_string(),
            period: period.to_string(),
        })
    }
}

/// Opens the workbook, resolves the header once and extracts every data row
/// through the cached [`ColumnMap`].
pub fn validate_spreadsheet(path: &Path) -> Verdict {
    let rows = match workbook::read_first_sheet(path) {
        Ok(rows) => rows,
        Err(e) => {
            return Verdict::Rejected(Rejection::new(FailureKind::ValidationFailed, e.to_string()))
        }
    };

    let Some(header_pos) = rows.iter().position(|r| !r.is_blank()) else {
        return Verdict::Rejected(Rejection::new(
            FailureKind::ValidationFailed,
            "workbook has no header row",
        ));
    };

    let map = match ColumnMap::resolve(&rows[header_pos]) {
        Ok(map) => map,
        Err(missing) => {
            let names: Vec<&str> = missing.iter().map(|c| c.display_name()).collect();
            return Verdict::Rejected(Rejection::new(
                FailureKind::ValidationFailed,
                format!("missing required column(s): {}", names.join(", ")),
            ));
        }
    };
    debug!("Resolved columns for {}: {:?}", path.display(), map);

    let mut records = Vec::new();
    let mut diagnostics = Vec::new();
    for row in rows.iter().skip(header_pos + 1).filter(|r| !r.is_blank()) {
        match map.extract(row) {
            Ok((record, dropped)) => {
                records.push(record);
                diagnostics.extend(dropped);
            }
            Err(reason) => diagnostics.push(RowDiagnostic::skipped_row(row.number, reason)),
        }
    }

    if records.is_empty() {
        return Verdict::Rejected(Rejection {
            kind: FailureKind::ValidationFailed,
            reason: "no valid employee rows".to_string(),
            diagnostics,
        });
    }

    info!(
        "Validated {}: {} rows applicable, {} diagnostics",
        path.display(),
        records.len(),
        diagnostics.len()
    );
    Verdict::Accepted(Accepted::Spreadsheet {
        records,
        diagnostics,
    })
}
