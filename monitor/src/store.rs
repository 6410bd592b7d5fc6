//! Loading and saving the `all_vehicles.ini` database.
//!
//! The file is a one-line preamble followed by `[VEHICLE]` blocks. It is read
//! as raw bytes and decoded one byte per character, so writing it back
//! reproduces every byte the synchronizer did not change, including the
//! original line endings and any non-ASCII bytes in vehicle paths.
//!
//! Records for vehicles whose directory no longer exists are dropped on load.
//! A later save therefore removes them from the file.

use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};

use crate::backup::{write_with_rotation, BackupError, RotationReport};
use crate::paths::FilePath;
use crate::record::{RecordError, VehicleRecord, SECTION_MARKER};

/// Errors that can occur while loading the database.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The database path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A `[VEHICLE]` block is malformed. The whole load fails.
    #[error("malformed vehicle record at block {index}: {source}")]
    Record {
        /// Zero-based position of the block in the file.
        index: usize,
        /// What was wrong with it.
        #[source]
        source: RecordError,
    },
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Line terminator used by a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineEnding {
    /// `\n`
    #[default]
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineEnding {
    /// The terminator characters.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lf => "\n",
            Self::CrLf => "\r\n",
        }
    }
}

/// An in-memory vehicle database.
#[derive(Debug, Clone, Default)]
pub struct Database {
    /// Lines before the first `[VEHICLE]` marker, written back verbatim.
    pub preamble: Vec<String>,

    /// Vehicle records in file order.
    pub records: Vec<VehicleRecord>,

    /// Terminator detected when the file was read.
    pub line_ending: LineEnding,
}

impl Database {
    /// Parses database text.
    ///
    /// The first line is always preamble. Each `[VEHICLE]` line after it
    /// opens a new record that runs up to the next marker.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Record`] for the first malformed block.
    pub fn parse(text: &str) -> Result<Self> {
        let line_ending = if text.contains("\r\n") {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        };
        let lines: Vec<&str> = text.lines().collect();

        let markers: Vec<usize> = lines
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, line)| **line == SECTION_MARKER)
            .map(|(idx, _)| idx)
            .collect();

        let first_marker = markers.first().copied().unwrap_or(lines.len());
        let preamble = lines[..first_marker].iter().map(|s| s.to_string()).collect();

        let mut records = Vec::with_capacity(markers.len());
        for (index, &start) in markers.iter().enumerate() {
            let end = markers.get(index + 1).copied().unwrap_or(lines.len());
            let block = lines[start..end].iter().map(|s| s.to_string()).collect();
            let record = VehicleRecord::from_lines(block)
                .map_err(|source| StoreError::Record { index, source })?;
            records.push(record);
        }

        Ok(Self {
            preamble,
            records,
            line_ending,
        })
    }

    /// Drops records whose vehicle is no longer installed.
    ///
    /// Returns the dropped records.
    pub fn retain_installed(&mut self) -> Vec<VehicleRecord> {
        let (installed, uninstalled): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(VehicleRecord::is_installed);
        self.records = installed;
        uninstalled
    }

    /// Every line of the database, preamble first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.preamble
            .iter()
            .map(String::as_str)
            .chain(self.records.iter().flat_map(|r| r.raw().iter().map(String::as_str)))
    }

    /// Number of lines [`lines`](Self::lines) yields.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.preamble.len() + self.records.iter().map(|r| r.raw().len()).sum::<usize>()
    }

    /// Serializes the database, one terminator after every line.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let terminator = self.line_ending.as_str();
        let mut text = String::new();
        for line in self.lines() {
            text.push_str(line);
            text.push_str(terminator);
        }
        encode_latin1(&text)
    }
}

/// Decodes bytes one-to-one into chars U+0000..=U+00FF.
#[must_use]
pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Inverse of [`decode_latin1`]. Chars above U+00FF become `?`.
#[must_use]
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Reads and writes one vehicle database file.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: FilePath,
}

impl RecordStore {
    /// Creates a store for the database at `path`.
    #[must_use]
    pub fn new(path: FilePath) -> Self {
        Self { path }
    }

    /// The database path.
    #[must_use]
    pub fn path(&self) -> &FilePath {
        &self.path
    }

    /// Loads the database and drops records for uninstalled vehicles.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or any record is malformed.
    pub fn load(&self) -> Result<Database> {
        let bytes = fs::read(self.path.as_path()).map_err(|source| StoreError::Read {
            path: self.path.as_path().to_path_buf(),
            source,
        })?;
        let text = decode_latin1(&bytes);

        let mut database = Database::parse(&text)?;
        info!(
            path = %self.path,
            lines = text.lines().count(),
            "Read vehicle database"
        );

        let dropped = database.retain_installed();
        for record in &dropped {
            debug!(record = %record, file = %record.file(), "Dropping vehicle that is no longer installed");
        }
        info!(
            vehicles = database.records.len(),
            uninstalled = dropped.len(),
            "Vehicles loaded"
        );

        Ok(database)
    }

    /// Writes the database, rotating up to `retention` numbered backups first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the new contents cannot be written. Backup
    /// rotation problems are reported in the returned [`RotationReport`].
    pub fn save(
        &self,
        database: &Database,
        retention: usize,
    ) -> std::result::Result<RotationReport, BackupError> {
        write_with_rotation(self.path.as_path(), &database.to_bytes(), retention)
    }
}
