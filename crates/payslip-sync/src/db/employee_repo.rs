//! SQLite-backed [`EmployeeStore`] over the `employees` table.

use std::collections::BTreeMap;

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::{Database, DatabaseError};
use crate::directory::{EmployeeRecord, EmployeeStore, UpsertReport};
use crate::error::StoreError;

pub struct SqliteEmployeeStore {
    db: Database,
}

impl SqliteEmployeeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

fn record_from_row(row: &Row<'_>) -> Result<(EmployeeRecord, String), rusqlite::Error> {
    let record = EmployeeRecord::new(
        row.get::<_, String>("employee_id")?,
        row.get::<_, String>("national_id")?,
        row.get::<_, String>("name")?,
    );
    Ok((record, row.get("attributes")?))
}

fn upsert_one(conn: &Connection, record: &EmployeeRecord, now: &str) -> Result<(), DatabaseError> {
    let attributes = serde_json::to_string(&record.attributes).map_err(|e| {
        DatabaseError::CorruptRow {
            employee_id: record.employee_id.clone(),
            reason: e.to_string(),
        }
    })?;

    conn.execute(
        "INSERT INTO employees (employee_id, national_id, name, attributes, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(employee_id) DO UPDATE SET
           national_id = excluded.national_id,
           name = excluded.name,
           attributes = excluded.attributes,
           updated_at = excluded.updated_at",
        params![
            record.employee_id,
            record.national_id,
            record.name,
            attributes,
            now
        ],
    )?;
    Ok(())
}

impl EmployeeStore for SqliteEmployeeStore {
    fn load_all(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT employee_id, national_id, name, attributes FROM employees
                 ORDER BY employee_id",
            )?;
            let rows = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(mut record, attributes)| {
                    record.attributes = serde_json::from_str::<BTreeMap<String, String>>(
                        &attributes,
                    )
                    .map_err(|e| DatabaseError::CorruptRow {
                        employee_id: record.employee_id.clone(),
                        reason: e.to_string(),
                    })?;
                    Ok(record)
                })
                .collect::<Result<Vec<_>, DatabaseError>>()
        })?;
        Ok(records)
    }

    /// Writes the batch in one transaction. Each record runs inside its own
    /// savepoint; a failing record is rolled back alone and reported.
    fn upsert_many(&self, records: &[EmployeeRecord]) -> Result<UpsertReport, StoreError> {
        let report = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let now = Utc::now().to_rfc3339();
            let mut report = UpsertReport::default();

            for record in records {
                tx.execute_batch("SAVEPOINT employee_row")?;
                match upsert_one(&tx, record, &now) {
                    Ok(()) => {
                        tx.execute_batch("RELEASE employee_row")?;
                        report.written += 1;
                    }
                    Err(e) => {
                        tx.execute_batch("ROLLBACK TO employee_row; RELEASE employee_row")?;
                        log::warn!("Failed to write employee {}: {}", record.employee_id, e);
                        report.failed.push((record.employee_id.clone(), e.to_string()));
                    }
                }
            }

            tx.commit()?;
            Ok(report)
        })?;
        Ok(report)
    }
}
