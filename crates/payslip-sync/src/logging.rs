//! Subscriber setup for the binary.
//!
//! The library logs through `log` and opens `tracing` spans; this installs
//! one `tracing` subscriber for both and bridges `log` records into it.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::LogFormat;
use crate::error::{Result, SyncError};

/// Default filter when `RUST_LOG` is unset, e.g. `payslip_sync=info`.
pub fn default_filter(level: &str) -> String {
    format!("payslip_sync={}", level)
}

/// Installs the global subscriber and the `log` bridge. `RUST_LOG` takes
/// precedence over `level`.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(level)))
        .map_err(|e| SyncError::Logging(format!("invalid log filter: {}", e)))?;

    let installed = match format {
        LogFormat::Text => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().with_target(true));
            tracing::subscriber::set_global_default(subscriber)
        }
        LogFormat::Json => {
            let subscriber = Registry::default()
                .with(filter)
                .with(fmt::layer().json().with_current_span(true));
            tracing::subscriber::set_global_default(subscriber)
        }
    };
    installed.map_err(|e| SyncError::Logging(format!("failed to install subscriber: {}", e)))?;

    tracing_log::LogTracer::init()
        .map_err(|e| SyncError::Logging(format!("failed to bridge log records: {}", e)))
}
