use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use serde::Serialize;

use crate::error::StorageError;

/// Suffix appended to a rejected file's stored name for its diagnostic record.
pub const DIAGNOSTIC_SUFFIX: &str = ".error.json";

/// Move a file from `src` to `dst`. Uses `rename` first (fast, atomic on same
/// filesystem). Falls back to copy + delete when rename fails, which handles
/// cross-device moves.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    copy_then_remove(src, dst, |p| std::fs::remove_file(p))
}

/// The copy is deleted again when the source cannot be removed, so a failed
/// move never leaves the file in two places.
fn copy_then_remove<F>(src: &Path, dst: &Path, remove_source: F) -> Result<(), StorageError>
where
    F: FnOnce(&Path) -> std::io::Result<()>,
{
    let move_error = |source: std::io::Error| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source,
    };

    std::fs::copy(src, dst).map_err(move_error)?;
    if let Err(e) = remove_source(src) {
        let _ = std::fs::remove_file(dst);
        return Err(move_error(e));
    }
    Ok(())
}

/// Relocates terminal files out of the watched directory.
pub struct FileStorage {
    processed_directory: PathBuf,
    invalid_directory: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(processed_directory: P, invalid_directory: Q) -> Self {
        Self {
            processed_directory: processed_directory.as_ref().to_path_buf(),
            invalid_directory: invalid_directory.as_ref().to_path_buf(),
        }
    }

    pub fn processed_directory(&self) -> &Path {
        &self.processed_directory
    }

    pub fn invalid_directory(&self) -> &Path {
        &self.invalid_directory
    }

    /// Creates the processed and invalid areas.
    pub fn ensure_layout(&self) -> Result<(), StorageError> {
        self.ensure_directory(&self.processed_directory)?;
        self.ensure_directory(&self.invalid_directory)
    }

    /// Moves an accepted workbook into `processed/spreadsheets/` under a
    /// date-prefixed name.
    pub fn store_spreadsheet(&self, source_path: &Path) -> Result<PathBuf, StorageError> {
        let target_dir = self.processed_directory.join("spreadsheets");
        self.ensure_directory(&target_dir)?;

        let now = Utc::now();
        let date_prefix = format!("{:04}-{:02}-{:02}", now.year(), now.month(), now.day());
        let original_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("workbook.xlsx");

        let target = self.resolve_conflict(&target_dir, &format!("{}_{}", date_prefix, original_name))?;
        move_file(source_path, &target)?;
        Ok(target)
    }

    /// Moves an accepted payslip to its keyed location. A payslip already
    /// stored for the same employee and period is replaced.
    pub fn store_payslip(
        &self,
        source_path: &Path,
        employee_id: &str,
        period: &str,
    ) -> Result<PathBuf, StorageError> {
        let target_dir = self.processed_directory.join("payslips").join(employee_id);
        self.ensure_directory(&target_dir)?;

        let target = target_dir.join(format!(
            "{}_{}_{}.pdf",
            crate::classifier::PAYSLIP_PREFIX,
            employee_id,
            period
        ));
        move_file(source_path, &target)?;
        Ok(target)
    }

    /// Moves a rejected file into the invalid area and writes its sibling
    /// diagnostic record. Returns `(stored_path, diagnostic_path)`.
    ///
    /// The diagnostic is written first and removed again if the move fails,
    /// so a diagnostic never exists without its file.
    pub fn reject<T: Serialize>(
        &self,
        source_path: &Path,
        diagnostic: &T,
    ) -> Result<(PathBuf, PathBuf), StorageError> {
        self.ensure_directory(&self.invalid_directory)?;

        let original_name = source_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed");
        let target = self.resolve_conflict(&self.invalid_directory, original_name)?;
        let diagnostic_path = diagnostic_path_for(&target);

        let content = serde_json::to_vec_pretty(diagnostic)?;
        std::fs::write(&diagnostic_path, content).map_err(|e| StorageError::WriteFile {
            path: diagnostic_path.clone(),
            source: e,
        })?;

        if let Err(e) = move_file(source_path, &target) {
            let _ = std::fs::remove_file(&diagnostic_path);
            return Err(e);
        }

        Ok((target, diagnostic_path))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Resolves filename conflicts by finding an available name. A candidate
    /// is taken when neither it nor its diagnostic sibling exists.
    fn resolve_conflict(&self, directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        let is_free = |p: &Path| {
            std::fs::symlink_metadata(p).is_err()
                && std::fs::symlink_metadata(diagnostic_path_for(p)).is_err()
        };

        let path = directory.join(filename);
        if is_free(&path) {
            return Ok(path);
        }

        let (base, ext) = if let Some(dot_pos) = filename.rfind('.') {
            (&filename[..dot_pos], Some(&filename[dot_pos..]))
        } else {
            (filename, None)
        };

        for counter in 2..=1000 {
            let new_filename = match ext {
                Some(ext) => format!("{}_{}{}", base, counter, ext),
                None => format!("{}_{}", base, counter),
            };

            let new_path = directory.join(&new_filename);
            if is_free(&new_path) {
                return Ok(new_path);
            }
        }

        Err(StorageError::FileExists(path))
    }
}

/// `invalid/report.pdf` -> `invalid/report.pdf.error.json`
pub fn diagnostic_path_for(stored_path: &Path) -> PathBuf {
    let mut name = stored_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(DIAGNOSTIC_SUFFIX);
    stored_path.with_file_name(name)
}
