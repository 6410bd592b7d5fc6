//! Vehicle records from `all_vehicles.ini`.
//!
//! A record is the raw text of one `[VEHICLE]` block:
//!
//! ```text
//! [VEHICLE]
//! ID=12
//! File="D:\rF2\Installed\Vehicles\Teams\Foo\Car_2024\car.veh"
//! Seat=(0.000,0.020)
//! FOV=60
//! ...
//! ```
//!
//! Only `ID` and `File` are interpreted. Every other line, including unknown
//! fields, comments and blank lines, is carried through untouched so that a
//! rewritten database differs from the original only in the lines the
//! synchronizer replaced.

use std::fmt;

use thiserror::Error;

use crate::identity::{IdentityError, VehicleFileIdentity};
use crate::paths::{FilePath, PathError};

/// Line that opens a vehicle block.
pub const SECTION_MARKER: &str = "[VEHICLE]";

/// Numeric record identifier field.
pub const ID_FIELD: &str = "ID";

/// Quoted vehicle file field.
pub const FILE_FIELD: &str = "File";

/// Errors that can occur when building a record from raw lines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// A required field has no well-formed line.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The `File` value is not a usable path.
    #[error("invalid vehicle file path: {0}")]
    File(#[from] PathError),

    /// The `File` value cannot be turned into an identity.
    #[error("invalid vehicle identity: {0}")]
    Identity(#[from] IdentityError),
}

/// Result type for record operations.
pub type Result<T> = std::result::Result<T, RecordError>;

/// Splits a `key=value` line at the first `=`.
fn split_field(line: &str) -> Option<(&str, &str)> {
    line.split_once('=')
}

/// First `name=<digits>` value. Field names are case-sensitive.
fn fetch_numeric(lines: &[String], name: &str) -> Option<u32> {
    lines
        .iter()
        .filter_map(|line| split_field(line))
        .filter(|(key, _)| *key == name)
        .find_map(|(_, value)| {
            let end = value
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(value.len());
            value[..end].parse().ok()
        })
}

/// First `name="<text>"` value. Field names are case-sensitive.
fn fetch_quoted<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines
        .iter()
        .filter_map(|line| split_field(line))
        .filter(|(key, _)| *key == name)
        .find_map(|(_, value)| {
            value
                .strip_prefix('"')
                .and_then(|rest| rest.split_once('"'))
                .map(|(inner, _)| inner)
        })
}

/// One `[VEHICLE]` block with its identifying fields.
#[derive(Debug, Clone)]
pub struct VehicleRecord {
    raw: Vec<String>,
    id: u32,
    file: FilePath,
    identity: VehicleFileIdentity,
}

impl VehicleRecord {
    /// Builds a record from its raw lines, marker included.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::MissingField`] when no `ID=<digits>` or
    /// `File="..."` line exists, or an error when the file value is empty.
    pub fn from_lines(raw: Vec<String>) -> Result<Self> {
        let id = fetch_numeric(&raw, ID_FIELD).ok_or(RecordError::MissingField(ID_FIELD))?;
        let file_value =
            fetch_quoted(&raw, FILE_FIELD).ok_or(RecordError::MissingField(FILE_FIELD))?;
        let identity = VehicleFileIdentity::parse(file_value)?;
        let file = FilePath::new(file_value)?;

        Ok(Self {
            raw,
            id,
            file,
            identity,
        })
    }

    /// The raw lines of the block.
    #[must_use]
    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    /// Record identifier, unique within one load.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The vehicle file as written in the database.
    #[must_use]
    pub fn file(&self) -> &FilePath {
        &self.file
    }

    /// The normalized vehicle identity.
    #[must_use]
    pub fn identity(&self) -> &VehicleFileIdentity {
        &self.identity
    }

    /// True when the vehicle's directory exists, or the path has none.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.file.directory().map_or(true, |dir| dir.exists())
    }

    /// First line whose key matches `name`, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn field_line(&self, name: &str) -> Option<&str> {
        self.raw
            .iter()
            .find(|line| key_matches(line, name))
            .map(String::as_str)
    }

    /// Value of the first line whose key matches `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.field_line(name)
            .and_then(split_field)
            .map(|(_, value)| value)
    }

    /// Returns a new record with the given fields copied from `source`.
    ///
    /// Each line of `self` whose key is in `fields` is replaced by the first
    /// line of `source` with the same key. Fields that `source` lacks are left
    /// as they are. All other lines are kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error if the substituted lines no longer form a valid record.
    pub fn with_fields_from(&self, source: &VehicleRecord, fields: &[&str]) -> Result<Self> {
        let raw = self
            .raw
            .iter()
            .map(|line| {
                let Some((key, _)) = split_field(line) else {
                    return line.clone();
                };
                let key = key.trim();
                if !fields.iter().any(|f| f.eq_ignore_ascii_case(key)) {
                    return line.clone();
                }
                source
                    .field_line(key)
                    .map_or_else(|| line.clone(), str::to_string)
            })
            .collect();

        Self::from_lines(raw)
    }
}

fn key_matches(line: &str, name: &str) -> bool {
    split_field(line).is_some_and(|(key, _)| key.trim().eq_ignore_ascii_case(name))
}

impl PartialEq for VehicleRecord {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for VehicleRecord {}

impl fmt::Display for VehicleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.id)
    }
}
