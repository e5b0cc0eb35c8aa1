//! Test harness for end-to-end ingestion tests.
//!
//! Each harness owns a temporary watched directory and a file-backed
//! SQLite database, so a second service can be opened over the same store.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use payslip_sync::{
    CycleReport, Database, EmployeeDirectory, EmployeeRecord, IngestionService, OutcomeLog,
    ServiceConfig, ServiceStatus, SqliteEmployeeStore,
};

use super::builders::WorkbookBuilder;

pub struct TestHarness {
    pub temp: TempDir,
    pub watch_dir: PathBuf,
    pub db_path: PathBuf,
    pub directory: Arc<EmployeeDirectory>,
    pub outcomes: Arc<OutcomeLog>,
    pub service: Arc<IngestionService>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Builds a harness after letting the caller adjust the config.
    pub fn with_config<F>(adjust: F) -> Self
    where
        F: FnOnce(&mut ServiceConfig),
    {
        let temp = TempDir::new().expect("create temp dir");
        let watch_dir = temp.path().join("uploaded_payslips");
        fs::create_dir_all(&watch_dir).expect("create watch dir");
        let db_path = temp.path().join("data").join("payslip-sync.db");

        let mut config = ServiceConfig::for_directory(&watch_dir);
        config.poll_interval_secs = 1;
        config.database_path = Some(db_path.clone());
        adjust(&mut config);

        let (directory, outcomes, service) = open_service(config, &db_path);
        Self {
            temp,
            watch_dir,
            db_path,
            directory,
            outcomes,
            service,
        }
    }

    /// A harness whose directory already knows the given employees.
    pub fn with_employees(records: &[EmployeeRecord]) -> Self {
        let harness = Self::new();
        for record in records {
            harness.directory.upsert(record.clone());
        }
        harness
            .directory
            .flush_to_store()
            .expect("seed employees");
        harness
    }

    pub fn config(&self) -> &ServiceConfig {
        self.service.config()
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.config().processed_directory()
    }

    pub fn invalid_dir(&self) -> PathBuf {
        self.config().invalid_directory()
    }

    pub fn drop_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.watch_dir.join(name);
        fs::write(&path, content).expect("write dropped file");
        path
    }

    pub fn drop_workbook(&self, name: &str, workbook: WorkbookBuilder) -> PathBuf {
        self.drop_file(name, &workbook.build())
    }

    pub fn drop_payslip(&self, employee_id: &str, period: &str) -> PathBuf {
        self.drop_file(
            &format!("Payslip_{}_{}.pdf", employee_id, period),
            b"%PDF-1.4\n%test payslip\n",
        )
    }

    pub fn run_cycle(&self) -> CycleReport {
        self.service.run_cycle().expect("run cycle")
    }

    pub fn status(&self) -> ServiceStatus {
        self.service.reporter().status()
    }

    /// Files still sitting directly in the watched directory.
    pub fn pending_files(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.watch_dir)
            .expect("read watch dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Opens a fresh service over the same database, as a restart would.
    pub fn reopen(&self) -> (Arc<EmployeeDirectory>, Arc<IngestionService>) {
        let (directory, _outcomes, service) = open_service(self.config().clone(), &self.db_path);
        (directory, service)
    }
}

fn open_service(
    config: ServiceConfig,
    db_path: &Path,
) -> (Arc<EmployeeDirectory>, Arc<OutcomeLog>, Arc<IngestionService>) {
    let db = Database::open(db_path).expect("open database");
    let store = Arc::new(SqliteEmployeeStore::new(db.clone()));
    let directory = Arc::new(EmployeeDirectory::new(store));
    directory.hydrate_from_store().expect("hydrate directory");
    let outcomes = Arc::new(OutcomeLog::with_database(db));
    let service = Arc::new(IngestionService::new(
        config,
        Arc::clone(&directory),
        Arc::clone(&outcomes),
    ));
    (directory, outcomes, service)
}
