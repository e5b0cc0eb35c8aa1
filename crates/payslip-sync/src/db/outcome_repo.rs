//! Append-only access to the `processing_outcomes` table.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

/// A raw outcome row from the database.
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRow {
    pub id: String,
    pub file_path: String,
    pub classification: String,
    pub status: String,
    pub failure_kind: Option<String>,
    pub error_detail: Option<String>,
    pub stage: String,
    pub stored_path: Option<String>,
    pub applied_rows: i64,
    pub skipped_rows: i64,
    pub recorded_at: String,
}

impl OutcomeRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_path: row.get("file_path")?,
            classification: row.get("classification")?,
            status: row.get("status")?,
            failure_kind: row.get("failure_kind")?,
            error_detail: row.get("error_detail")?,
            stage: row.get("stage")?,
            stored_path: row.get("stored_path")?,
            applied_rows: row.get("applied_rows")?,
            skipped_rows: row.get("skipped_rows")?,
            recorded_at: row.get("recorded_at")?,
        })
    }
}

pub fn insert(db: &Database, outcome: &OutcomeRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO processing_outcomes (id, file_path, classification, status, failure_kind,
             error_detail, stage, stored_path, applied_rows, skipped_rows, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                outcome.id,
                outcome.file_path,
                outcome.classification,
                outcome.status,
                outcome.failure_kind,
                outcome.error_detail,
                outcome.stage,
                outcome.stored_path,
                outcome.applied_rows,
                outcome.skipped_rows,
                outcome.recorded_at,
            ],
        )?;
        Ok(())
    })
}

/// Most recent outcomes first.
pub fn recent(db: &Database, limit: u64) -> Result<Vec<OutcomeRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM processing_outcomes ORDER BY recorded_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], OutcomeRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM processing_outcomes WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
