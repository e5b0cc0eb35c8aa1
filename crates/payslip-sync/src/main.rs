use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info};

use payslip_sync::error::{ConfigError, SyncError};
use payslip_sync::{
    logging, Database, EmployeeDirectory, IngestionService, OutcomeLog, ServiceConfig,
    SqliteEmployeeStore,
};

const RECENT_OUTCOMES_LOGGED: usize = 10;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("payslip-sync: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> payslip_sync::Result<()> {
    let config = ServiceConfig::from_env()?;
    logging::init(&config.log_level, config.log_format)?;

    let database_path = config.database_path().ok_or_else(|| ConfigError::Validation {
        message: "DATABASE_PATH is unset and no home directory is available".to_string(),
    })?;
    let db = Database::open(&database_path)?;

    let store = Arc::new(SqliteEmployeeStore::new(db.clone()));
    let directory = Arc::new(EmployeeDirectory::new(store));
    let loaded = directory.hydrate_from_store()?;
    info!("Loaded {} employees from {}", loaded, database_path.display());

    let outcomes = Arc::new(OutcomeLog::with_database(db));
    let service = Arc::new(IngestionService::new(config.clone(), directory, outcomes));

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .map_err(|e| SyncError::Signal(e.to_string()))?;

    if config.enabled {
        service.start()?;
    } else {
        info!("AUTO_START is off, ingestion service not started");
    }

    let _ = shutdown_rx.recv();
    info!("Shutdown requested");
    service.stop();

    for row in service.outcomes().history(RECENT_OUTCOMES_LOGGED) {
        info!(
            "Recent outcome: {} {} ({}) at {}",
            row.status,
            row.file_path,
            row.error_detail.as_deref().unwrap_or("ok"),
            row.recorded_at
        );
    }
    match serde_json::to_string(&service.reporter().status()) {
        Ok(status) => info!("Final status: {}", status),
        Err(e) => error!("Failed to serialize final status: {}", e),
    }
    Ok(())
}
