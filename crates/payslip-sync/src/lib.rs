pub mod classifier;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod logging;
pub mod processor;
pub mod status;
pub mod storage;
pub mod validator;
pub mod worker;

pub use classifier::{classify, Candidate, Classification};
pub use config::ServiceConfig;
pub use db::{Database, SqliteEmployeeStore};
pub use directory::{EmployeeDirectory, EmployeeRecord, EmployeeStore, MemoryStore, RetryPolicy};
pub use error::{
    ConfigError, DirectoryError, FailureKind, Result, StorageError, StoreError, SyncError,
    WorkbookError, WorkerError,
};
pub use processor::{OutcomeLog, ProcessingOutcome, Processor};
pub use status::{ServiceState, ServiceStats, ServiceStatus, StatusReporter};
pub use validator::{Validator, Verdict};
pub use worker::{CycleReport, IngestionService};
