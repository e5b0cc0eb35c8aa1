//! Tolerant header matching for the required employee columns.

use std::fmt;

use crate::directory::EmployeeRecord;

use super::workbook::WorkbookRow;
use super::RowDiagnostic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredColumn {
    EmployeeId,
    NationalId,
    Name,
}

impl RequiredColumn {
    pub const ALL: [RequiredColumn; 3] = [Self::EmployeeId, Self::NationalId, Self::Name];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::EmployeeId => "Emp ID",
            Self::NationalId => "National ID",
            Self::Name => "Name",
        }
    }

    fn synonyms(&self) -> &'static [&'static str] {
        match self {
            Self::EmployeeId => &[
                "emp id",
                "employee id",
                "hrid",
                "hr id",
                "employee_id",
                "emp_id",
                "emp no",
                "employee number",
            ],
            Self::NationalId => &[
                "national id",
                "nid",
                "national_id",
                "id number",
                "national number",
            ],
            Self::Name => &["name", "employee name", "full name"],
        }
    }

    fn matches(&self, normalized_header: &str) -> bool {
        self.synonyms()
            .iter()
            .any(|s| normalize_header(s) == normalized_header)
    }
}

impl fmt::Display for RequiredColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Lowercases and drops whitespace, `_`, `-` and `.`.
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '_' | '-' | '.'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Column positions resolved from a header row, reused for every data row of
/// the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    employee_id: usize,
    national_id: usize,
    name: usize,
    /// Pass-through columns as `(index, header text)`.
    extras: Vec<(usize, String)>,
}

impl ColumnMap {
    /// Resolves the required columns from `header`. The first header that
    /// matches a column wins. Returns the missing columns on failure.
    pub fn resolve(header: &WorkbookRow) -> Result<Self, Vec<RequiredColumn>> {
        let mut found: [Option<usize>; 3] = [None; 3];
        let mut extras = Vec::new();

        for (index, cell) in header.cells.iter().enumerate() {
            let Ok(Some(text)) = cell.to_text() else {
                continue;
            };
            let normalized = normalize_header(&text);

            let slot = RequiredColumn::ALL
                .iter()
                .position(|col| col.matches(&normalized));

            match slot {
                Some(i) if found[i].is_none() => found[i] = Some(index),
                Some(i) => {
                    log::debug!(
                        "Ignoring duplicate '{}' column at index {}",
                        RequiredColumn::ALL[i],
                        index
                    );
                }
                None => extras.push((index, text)),
            }
        }

        match found {
            [Some(employee_id), Some(national_id), Some(name)] => Ok(Self {
                employee_id,
                national_id,
                name,
                extras,
            }),
            _ => Err(RequiredColumn::ALL
                .iter()
                .zip(found.iter())
                .filter(|(_, slot)| slot.is_none())
                .map(|(col, _)| *col)
                .collect()),
        }
    }

    pub fn index_of(&self, column: RequiredColumn) -> usize {
        match column {
            RequiredColumn::EmployeeId => self.employee_id,
            RequiredColumn::NationalId => self.national_id,
            RequiredColumn::Name => self.name,
        }
    }

    /// Builds a record from one data row, along with a diagnostic for every
    /// pass-through column whose value could not be read. The error names
    /// the required column whose value was unusable.
    pub fn extract(&self, row: &WorkbookRow) -> Result<(EmployeeRecord, Vec<RowDiagnostic>), String> {
        let required = |column: RequiredColumn| -> Result<String, String> {
            match row.cell(self.index_of(column)).to_text() {
                Ok(Some(value)) => Ok(value),
                Ok(None) => Err(format!("missing {}", column)),
                Err(e) => Err(format!("{}: {}", column, e)),
            }
        };

        let mut record = EmployeeRecord::new(
            required(RequiredColumn::EmployeeId)?,
            required(RequiredColumn::NationalId)?,
            required(RequiredColumn::Name)?,
        );

        let mut dropped = Vec::new();
        for (index, header) in &self.extras {
            match row.cell(*index).to_text() {
                Ok(Some(value)) => {
                    record.attributes.insert(header.clone(), value);
                }
                Ok(None) => {}
                Err(e) => dropped.push(RowDiagnostic::dropped_attribute(
                    row.number,
                    header.clone(),
                    format!("{}: {}", header, e),
                )),
            }
        }

        Ok((record, dropped))
    }
}
