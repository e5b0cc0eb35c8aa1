pub mod scanner;
pub mod service;

pub use scanner::{DirectoryScanner, FileIdentity};
pub use service::{CycleReport, IngestionService};
