//! Reads the currently selected vehicle from `player.JSON`.
//!
//! The game rewrites this file whenever the player changes settings. Only
//! one value is of interest:
//!
//! ```json
//! { "DRIVER": { "Vehicle File": "D:\\rF2\\Installed\\Vehicles\\Foo\\1.0\\car.veh", ... }, ... }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::identity::{IdentityError, VehicleFileIdentity};

/// Errors that can occur when reading the selection.
#[derive(Error, Debug)]
pub enum SelectionError {
    /// The player file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// The player file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The player file is not valid JSON of the expected shape.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The player file.
        path: PathBuf,
        /// The JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The selected vehicle value is unusable.
    #[error("invalid selected vehicle: {0}")]
    Identity(#[from] IdentityError),
}

#[derive(Debug, Deserialize)]
struct PlayerFile {
    #[serde(rename = "DRIVER")]
    driver: Option<Driver>,
}

#[derive(Debug, Deserialize)]
struct Driver {
    #[serde(rename = "Vehicle File")]
    vehicle_file: Option<String>,
}

/// Parses player file contents and returns the raw `Vehicle File` value.
fn selected_vehicle_file(bytes: &[u8]) -> serde_json::Result<Option<String>> {
    let player: PlayerFile = serde_json::from_slice(bytes)?;
    Ok(player.driver.and_then(|d| d.vehicle_file))
}

/// Reads the selected vehicle identity from the player file at `path`.
///
/// Returns `Ok(None)` when the file has no `DRIVER` / `Vehicle File` entry.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// selected vehicle value is empty.
pub fn read_selected_vehicle(path: &Path) -> Result<Option<VehicleFileIdentity>, SelectionError> {
    let bytes = fs::read(path).map_err(|source| SelectionError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let value = selected_vehicle_file(&bytes).map_err(|source| SelectionError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    value
        .map(|raw| VehicleFileIdentity::parse(&raw))
        .transpose()
        .map_err(SelectionError::from)
}
