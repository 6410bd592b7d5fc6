//! LiverySync Monitor - keeps rFactor 2 vehicle settings in sync across liveries.
//!
//! rFactor 2 stores seat, mirror, field-of-view and force-feedback settings
//! per vehicle file in `all_vehicles.ini`. Every livery and version of a car
//! is a separate vehicle, so adjusting the seat in one livery leaves all the
//! others untouched. This crate watches which vehicle the player drives and,
//! once the game session ends, copies those settings to every sibling livery.
//!
//! # Overview
//!
//! ```text
//! player.JSON ─▶ watcher (debounced) ─▶ selection ─▶ queue
//!                                                      │ session end
//! all_vehicles.ini ◀─ backup ◀─ store ◀─ sync ◀────────┘
//! ```
//!
//! # Modules
//!
//! - [`paths`]: Case-insensitive file and directory path values
//! - [`identity`]: Normalized vehicle identities and similarity
//! - [`record`]: `[VEHICLE]` records and field substitution
//! - [`store`]: Loading and saving the vehicle database
//! - [`sync`]: Copying settings between similar vehicles
//! - [`backup`]: Numbered backup rotation and atomic writes
//! - [`selection`]: Reading the selected vehicle from `player.JSON`
//! - [`queue`]: Unique LIFO queue of tracked vehicles
//! - [`watcher`]: Debounced per-file watching
//! - [`session`]: Tracker and session lifecycle
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Crate-wide error type
//! - [`utils`]: Shared utilities (debouncing)

pub mod backup;
pub mod config;
pub mod error;
pub mod identity;
pub mod paths;
pub mod queue;
pub mod record;
pub mod selection;
pub mod session;
pub mod store;
pub mod sync;
pub mod utils;
pub mod watcher;

pub use config::{Config, LogFormat};
pub use error::{LiverySyncError, Result};
pub use identity::VehicleFileIdentity;
pub use paths::{DirectoryPath, FilePath};
pub use record::VehicleRecord;
pub use session::{DrainMode, DrainReport, SessionController, SyncPaths, VehicleTracker};
pub use store::{Database, RecordStore};
pub use sync::{synchronize, SyncOutcome, SYNCED_FIELDS};
pub use utils::{Debouncer, DebouncerError, DEFAULT_DEBOUNCE_MS};
pub use watcher::{WatchDispatcher, WatchError};
