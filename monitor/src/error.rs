//! Error types for the LiverySync monitor.
//!
//! Each module defines its own error enum next to the code that produces it.
//! [`LiverySyncError`] gathers them for callers that work across modules,
//! such as the command-line driver.

use thiserror::Error;

use crate::backup::BackupError;
use crate::config::ConfigError;
use crate::identity::IdentityError;
use crate::paths::PathError;
use crate::record::RecordError;
use crate::selection::SelectionError;
use crate::session::DrainError;
use crate::store::StoreError;
use crate::sync::SyncError;
use crate::utils::debounce::DebouncerError;
use crate::watcher::WatchError;

/// Errors that can occur anywhere in the monitor.
#[derive(Error, Debug)]
pub enum LiverySyncError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid file or directory path.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// Invalid vehicle file identity.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Malformed vehicle record.
    #[error("record error: {0}")]
    Record(#[from] RecordError),

    /// Vehicle database could not be loaded.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Vehicle database could not be written.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Selected vehicle could not be read.
    #[error("selection error: {0}")]
    Selection(#[from] SelectionError),

    /// Settings could not be synchronized.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// File watching error.
    #[error("file watch error: {0}")]
    Watch(#[from] WatchError),

    /// Queue drain failed.
    #[error("drain error: {0}")]
    Drain(#[from] DrainError),

    /// Debouncer stopped.
    #[error("debouncer error: {0}")]
    Debouncer(#[from] DebouncerError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized `Result` type for monitor operations.
pub type Result<T> = std::result::Result<T, LiverySyncError>;
