//! Numbered backup rotation and atomic replacement of a file.
//!
//! Before a file is rewritten, its previous versions are shifted along a
//! chain of siblings named `<name>.1`, `<name>.2`, ... where a higher number
//! means an older copy:
//!
//! ```text
//! all_vehicles.ini     -> all_vehicles.ini.1
//! all_vehicles.ini.1   -> all_vehicles.ini.2
//! ...
//! all_vehicles.ini.9   -> all_vehicles.ini.10
//! all_vehicles.ini.10  (deleted when retention is 10)
//! ```
//!
//! Rotation is best-effort: a failed delete or rename is logged and the
//! remaining steps still run. Only the final write can fail the operation.
//! The new contents go to a temporary file in the same directory that is then
//! renamed over the target, so a crash never leaves a half-written file.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default number of backups kept.
pub const DEFAULT_RETENTION: usize = 10;

/// Errors that abort a write.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The target path has no file name.
    #[error("invalid file path: {0}")]
    InvalidPath(PathBuf),

    /// The new contents could not be written.
    #[error("failed to write {path}: {source}")]
    Write {
        /// The file being replaced.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// What a failed rotation step was trying to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationAction {
    /// Listing existing backups.
    List,
    /// Deleting a backup beyond the retention limit.
    Delete,
    /// Shifting a backup to the next number.
    Shift,
    /// Moving the live file to `.1`.
    Backup,
}

/// A rotation step that failed and was skipped.
#[derive(Debug)]
pub struct RotationFailure {
    /// The step.
    pub action: RotationAction,
    /// The file it was applied to.
    pub path: PathBuf,
    /// The error.
    pub error: io::Error,
}

/// Outcome of a rotation.
#[derive(Debug, Default)]
pub struct RotationReport {
    /// Backups deleted for exceeding retention.
    pub deleted: Vec<PathBuf>,
    /// Backups shifted, as `(from, to)`.
    pub shifted: Vec<(PathBuf, PathBuf)>,
    /// Where the live file went, if it existed.
    pub live_backup: Option<PathBuf>,
    /// Steps that failed and were skipped.
    pub failures: Vec<RotationFailure>,
}

impl RotationReport {
    fn fail(&mut self, action: RotationAction, path: &Path, err: io::Error) {
        error!(
            action = ?action,
            path = %path.display(),
            error = %err,
            "Backup rotation step failed"
        );
        self.failures.push(RotationFailure {
            action,
            path: path.to_path_buf(),
            error: err,
        });
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn backup_path(path: &Path, name: &str, number: u32) -> PathBuf {
    parent_dir(path).join(format!("{name}.{number}"))
}

/// Parses the backup number from `<name>.<n>`, rejecting zero and non-digits.
fn backup_number(file_name: &str, name: &str) -> Option<u32> {
    let suffix = file_name.strip_prefix(name)?.strip_prefix('.')?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok().filter(|n| *n > 0)
}

/// Lists existing backups of `path`, oldest number last.
///
/// # Errors
///
/// Returns an error if the containing directory cannot be read.
pub fn list_backups(path: &Path) -> io::Result<Vec<(u32, PathBuf)>> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(Vec::new());
    };

    let mut backups: Vec<(u32, PathBuf)> = fs::read_dir(parent_dir(path))?
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .filter_map(|entry| {
            let file_name = entry.file_name();
            let number = backup_number(file_name.to_str()?, name)?;
            Some((number, entry.path()))
        })
        .collect();

    backups.sort_by_key(|(number, _)| *number);
    Ok(backups)
}

/// Shifts the backup chain of `path` and moves the live file to `.1`.
///
/// At most `retention` backups exist afterwards. Every failure is logged and
/// recorded in the report; none of them stops the rotation.
pub fn rotate_backups(path: &Path, retention: usize) -> RotationReport {
    let mut report = RotationReport::default();
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return report;
    };

    let backups = match list_backups(path) {
        Ok(backups) => backups,
        Err(e) => {
            report.fail(RotationAction::List, parent_dir(path), e);
            Vec::new()
        }
    };

    let keep = retention.saturating_sub(1).min(backups.len());
    let (kept, excess) = backups.split_at(keep);

    for (_, old) in excess {
        match fs::remove_file(old) {
            Ok(()) => {
                debug!(path = %old.display(), "Deleted old backup");
                report.deleted.push(old.clone());
            }
            Err(e) => report.fail(RotationAction::Delete, old, e),
        }
    }

    for (number, from) in kept.iter().rev() {
        let to = backup_path(path, name, number + 1);
        if to.exists() {
            if let Err(e) = fs::remove_file(&to) {
                report.fail(RotationAction::Shift, from, e);
                continue;
            }
        }
        match fs::rename(from, &to) {
            Ok(()) => report.shifted.push((from.clone(), to)),
            Err(e) => report.fail(RotationAction::Shift, from, e),
        }
    }

    if path.exists() {
        let first = backup_path(path, name, 1);
        if first.exists() {
            // `.1` survived a failed shift and must not be overwritten
            let err = io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} still exists", first.display()),
            );
            report.fail(RotationAction::Backup, path, err);
        } else {
            match fs::rename(path, &first) {
                Ok(()) => report.live_backup = Some(first),
                Err(e) => report.fail(RotationAction::Backup, path, e),
            }
        }
    } else {
        warn!(path = %path.display(), "No existing file to back up");
    }

    info!(
        path = %path.display(),
        deleted = report.deleted.len(),
        shifted = report.shifted.len(),
        failures = report.failures.len(),
        "Rotated backups"
    );

    report
}

/// Writes `contents` to a temporary sibling and renames it over `path`.
fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Rotates backups of `path`, then replaces it with `contents`.
///
/// # Errors
///
/// Returns [`BackupError::Write`] if the new contents cannot be written. The
/// rotation that already happened is not undone.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use liverysync_monitor::backup::{write_with_rotation, DEFAULT_RETENTION};
///
/// let report = write_with_rotation(
///     Path::new("all_vehicles.ini"),
///     b"header\n",
///     DEFAULT_RETENTION,
/// )?;
/// println!("{} backup steps failed", report.failures.len());
/// # Ok::<(), liverysync_monitor::backup::BackupError>(())
/// ```
pub fn write_with_rotation(
    path: &Path,
    contents: &[u8],
    retention: usize,
) -> Result<RotationReport, BackupError> {
    if path.file_name().is_none() {
        return Err(BackupError::InvalidPath(path.to_path_buf()));
    }

    let report = rotate_backups(path, retention);

    write_atomically(path, contents).map_err(|source| {
        error!(path = %path.display(), error = %source, "Unable to write file");
        BackupError::Write {
            path: path.to_path_buf(),
            source,
        }
    })?;

    info!(path = %path.display(), bytes = contents.len(), "File written");
    Ok(report)
}
