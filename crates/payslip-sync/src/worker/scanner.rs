use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::WorkerError;

/// Office writes `~$<name>` lock files next to open workbooks.
const LOCK_FILE_PREFIX: &str = "~$";

/// Distinguishes a re-uploaded file from the one already processed under
/// the same name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    len: u64,
    modified: Option<SystemTime>,
    #[cfg(unix)]
    inode: u64,
}

impl FileIdentity {
    pub fn of(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            #[cfg(unix)]
            inode: std::os::unix::fs::MetadataExt::ino(&meta),
        })
    }
}

pub struct DirectoryScanner {
    watch_directory: PathBuf,
    excluded: Vec<PathBuf>,
}

impl DirectoryScanner {
    pub fn new<P: AsRef<Path>>(watch_directory: P, excluded: Vec<PathBuf>) -> Self {
        Self {
            watch_directory: watch_directory.as_ref().to_path_buf(),
            excluded,
        }
    }

    pub fn watch_directory(&self) -> &Path {
        &self.watch_directory
    }

    /// Lists top-level regular files, sorted by name. Hidden files, Office
    /// lock files and anything under an excluded area are skipped.
    ///
    /// An unreadable watched directory is an error; an unreadable single
    /// entry is logged and skipped.
    pub fn scan(&self) -> Result<Vec<PathBuf>, WorkerError> {
        if !self.watch_directory.is_dir() {
            return Err(WorkerError::WatchedDirectoryUnavailable(
                self.watch_directory.clone(),
            ));
        }

        let mut files = Vec::new();

        for entry in WalkDir::new(&self.watch_directory)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(WorkerError::ScanFailed {
                        path: self.watch_directory.clone(),
                        source: e,
                    });
                }
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if self.excluded.iter().any(|area| path.starts_with(area)) {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if name.starts_with('.') || name.starts_with(LOCK_FILE_PREFIX) {
                debug!("Ignoring {}", path.display());
                continue;
            }

            files.push(path.to_path_buf());
        }

        debug!(
            "Scanned {} files in {}",
            files.len(),
            self.watch_directory.display()
        );
        Ok(files)
    }
}
