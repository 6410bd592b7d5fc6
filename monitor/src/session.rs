//! Tracking vehicle selections during a game session.
//!
//! While the game runs, every settled change to `player.JSON` pushes the
//! currently selected vehicle onto a queue. When the session ends the queue
//! is drained in the background: the database is loaded once, each queued
//! vehicle's settings are copied to its liveries, and the file is written
//! only if something changed.
//!
//! The database is not touched while the game runs because the game keeps it
//! in memory and overwrites it on exit.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup::{BackupError, RotationReport};
use crate::config::Config;
use crate::identity::VehicleFileIdentity;
use crate::paths::{DirectoryPath, FilePath, PathError};
use crate::queue::UniquePendingQueue;
use crate::selection::{read_selected_vehicle, SelectionError};
use crate::store::{RecordStore, StoreError};
use crate::sync::{synchronize, SyncError, SyncOutcome};
use crate::watcher::WatchDispatcher;

/// Player file, relative to the install root.
const PLAYER_FILE: &str = "UserData/player/player.JSON";

/// Vehicle database, relative to the install root.
const DATABASE_FILE: &str = "UserData/player/all_vehicles.ini";

/// Errors that abort a queue drain.
///
/// The queue has already been emptied when these occur, so the tracked
/// vehicles of that drain are not retried.
#[derive(Error, Debug)]
pub enum DrainError {
    /// The database could not be loaded.
    #[error("failed to load vehicle database: {0}")]
    Load(#[from] StoreError),

    /// The database could not be written.
    #[error("failed to write vehicle database: {0}")]
    Write(#[from] BackupError),
}

/// Files used for one install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPaths {
    /// The install root.
    pub install_root: DirectoryPath,
    /// `player.JSON`, watched for selection changes.
    pub player_file: FilePath,
    /// `all_vehicles.ini`, the database rewritten on drain.
    pub database_file: FilePath,
}

impl SyncPaths {
    /// Derives the player and database files from an install root.
    ///
    /// # Errors
    ///
    /// Returns an error if `install_root` is not a usable path.
    pub fn from_install_root(install_root: &Path) -> Result<Self, PathError> {
        let root = DirectoryPath::try_from(install_root)?;
        Ok(Self {
            player_file: FilePath::try_from(install_root.join(PLAYER_FILE).as_path())?,
            database_file: FilePath::try_from(install_root.join(DATABASE_FILE).as_path())?,
            install_root: root,
        })
    }
}

/// What happened when the current selection was enqueued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The vehicle was not queued before.
    Added(VehicleFileIdentity),
    /// The vehicle was already queued and moved to the top.
    Touched(VehicleFileIdentity),
    /// `player.JSON` names no vehicle. The queue is unchanged.
    SelectionMissing,
}

/// Whether a drain writes its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Write the database when anything changed.
    Persist,
    /// Compute changes only.
    DryRun,
}

/// Summary of one queue drain.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Per-vehicle results, in processing order.
    pub outcomes: Vec<SyncOutcome>,
    /// Queued vehicles that have no record in the database.
    pub not_found: Vec<VehicleFileIdentity>,
    /// Lines in the database after synchronization.
    pub lines: usize,
    /// Backup rotation details, present when the database was written.
    pub rotation: Option<RotationReport>,
}

impl DrainReport {
    /// Records changed across all vehicles.
    #[must_use]
    pub fn changed_count(&self) -> usize {
        self.outcomes.iter().map(SyncOutcome::changed_count).sum()
    }

    /// True if the database file was rewritten.
    #[must_use]
    pub fn written(&self) -> bool {
        self.rotation.is_some()
    }
}

/// Collects selected vehicles and applies them to the database.
#[derive(Debug)]
pub struct VehicleTracker {
    paths: SyncPaths,
    store: RecordStore,
    queue: UniquePendingQueue<VehicleFileIdentity>,
    retention: usize,
    drain_lock: Mutex<()>,
}

impl VehicleTracker {
    /// Creates a tracker keeping `retention` database backups.
    #[must_use]
    pub fn new(paths: SyncPaths, retention: usize) -> Self {
        Self {
            store: RecordStore::new(paths.database_file.clone()),
            paths,
            queue: UniquePendingQueue::new(),
            retention,
            drain_lock: Mutex::new(()),
        }
    }

    /// The files this tracker works on.
    #[must_use]
    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    /// Number of vehicles waiting to be processed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues `identity`. Returns `true` if it was not queued before.
    pub fn track(&self, identity: VehicleFileIdentity) -> bool {
        let vehicle = identity.to_string();
        let added = self.queue.push(identity);
        if added {
            info!(vehicle = %vehicle, "Vehicle tracked");
        } else {
            debug!(vehicle = %vehicle, "Vehicle moved to top of queue");
        }
        added
    }

    /// Reads the selected vehicle from `player.JSON` and queues it.
    ///
    /// # Errors
    ///
    /// Returns an error if the player file cannot be read or parsed.
    pub fn enqueue_selected_vehicle(&self) -> Result<EnqueueOutcome, SelectionError> {
        let Some(identity) = read_selected_vehicle(self.paths.player_file.as_path())? else {
            info!(
                path = %self.paths.player_file,
                "Selected vehicle missing from player file"
            );
            return Ok(EnqueueOutcome::SelectionMissing);
        };

        if self.track(identity.clone()) {
            Ok(EnqueueOutcome::Added(identity))
        } else {
            Ok(EnqueueOutcome::Touched(identity))
        }
    }

    /// Drains the queue and propagates settings for every tracked vehicle.
    ///
    /// Concurrent calls run one after another. Vehicles queued while a
    /// drain runs are left for the next one.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be loaded or, in
    /// [`DrainMode::Persist`], written.
    pub fn process_queue(&self, mode: DrainMode) -> Result<DrainReport, DrainError> {
        let _guard = self.drain_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut report = DrainReport::default();
        let identities = self.queue.drain();
        if identities.is_empty() {
            return Ok(report);
        }

        let mut database = self.store.load()?;

        for identity in identities {
            match synchronize(&identity, &mut database.records) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(SyncError::SourceNotFound(identity)) => report.not_found.push(identity),
            }
        }
        report.lines = database.line_count();

        let changed = report.changed_count();
        if changed == 0 {
            info!(
                path = %self.paths.database_file,
                "No vehicles needed update, skipping write"
            );
            return Ok(report);
        }

        match mode {
            DrainMode::DryRun => {
                info!(
                    updated = changed,
                    lines = report.lines,
                    path = %self.paths.database_file,
                    "Dry run, database not written"
                );
            }
            DrainMode::Persist => {
                report.rotation = Some(self.store.save(&database, self.retention)?);
                info!(
                    updated = changed,
                    lines = report.lines,
                    path = %self.paths.database_file,
                    "Vehicles updated"
                );
            }
        }

        Ok(report)
    }
}

/// Connects game session start and end to tracking and draining.
///
/// None of its methods return errors; failures are logged.
#[derive(Debug)]
pub struct SessionController {
    debounce: Duration,
    retention: usize,
    tracker: Option<Arc<VehicleTracker>>,
    dispatcher: Option<WatchDispatcher>,
    drains: Vec<JoinHandle<()>>,
}

impl SessionController {
    /// Creates a controller with the given quiet period and backup retention.
    #[must_use]
    pub fn new(debounce: Duration, retention: usize) -> Self {
        Self {
            debounce,
            retention,
            tracker: None,
            dispatcher: None,
            drains: Vec::new(),
        }
    }

    /// Creates a controller from configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.debounce, config.backup_retention)
    }

    /// The tracker of the current or last session.
    #[must_use]
    pub fn tracker(&self) -> Option<&Arc<VehicleTracker>> {
        self.tracker.as_ref()
    }

    /// True while the player file is being watched.
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        match (&self.dispatcher, &self.tracker) {
            (Some(dispatcher), Some(tracker)) => {
                dispatcher.is_registered(&tracker.paths().player_file)
            }
            _ => false,
        }
    }

    /// Starts watching the player file of the game at `install_root`.
    ///
    /// A tracker for the same install root is reused, keeping anything still
    /// queued. Must be called inside a Tokio runtime. Returns `false` if
    /// tracking could not be started.
    pub fn on_tracked_session_start(&mut self, install_root: &Path) -> bool {
        let paths = match SyncPaths::from_install_root(install_root) {
            Ok(paths) => paths,
            Err(e) => {
                error!(install_root = %install_root.display(), error = %e, "Invalid install root");
                return false;
            }
        };

        let tracker = match self.tracker.take() {
            Some(tracker) if *tracker.paths() == paths => tracker,
            previous => {
                if let Some(previous) = previous {
                    self.release_tracker(&previous);
                }
                Arc::new(VehicleTracker::new(paths, self.retention))
            }
        };
        self.tracker = Some(Arc::clone(&tracker));

        let debounce = self.debounce;
        let dispatcher = self
            .dispatcher
            .get_or_insert_with(|| WatchDispatcher::new(debounce));

        let on_settled = {
            let tracker = Arc::clone(&tracker);
            move |_: &FilePath| {
                if let Err(e) = tracker.enqueue_selected_vehicle() {
                    warn!(error = %e, "Unable to read selected vehicle");
                }
            }
        };

        let paths = tracker.paths();
        if let Err(e) = dispatcher.register(paths.player_file.clone(), on_settled) {
            error!(path = %paths.player_file, error = %e, "Unable to watch player file");
            return false;
        }

        info!(
            database = %paths.database_file,
            player = %paths.player_file,
            pending = tracker.pending(),
            "Tracking vehicle selections, database is updated when the session ends"
        );
        true
    }

    /// Stops feeding a tracker that is being replaced by one for another
    /// install root.
    fn release_tracker(&self, previous: &VehicleTracker) {
        let player_file = &previous.paths().player_file;
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.unregister(player_file);
        }
        if previous.pending() > 0 {
            warn!(
                player = %player_file,
                pending = previous.pending(),
                "Install root changed, dropping vehicles tracked for the previous one"
            );
        }
    }

    /// Stops watching and drains the queue in the background.
    ///
    /// Returns `false` if no session was started.
    pub fn on_tracked_session_end(&mut self) -> bool {
        let Some(tracker) = self.tracker.as_ref().map(Arc::clone) else {
            warn!("Session ended without a tracked session");
            return false;
        };

        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.unregister(&tracker.paths().player_file);
        }

        self.drains.retain(|handle| !handle.is_finished());
        self.drains.push(tokio::task::spawn_blocking(move || {
            match tracker.process_queue(DrainMode::Persist) {
                Ok(report) => {
                    for missing in &report.not_found {
                        debug!(vehicle = %missing, "Tracked vehicle not in database");
                    }
                }
                Err(e) => error!(error = %e, "Unable to update vehicles"),
            }
        }));
        true
    }

    /// Releases all watches and waits for background drains to finish.
    pub async fn shutdown(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.dispose();
        }

        let drains: Vec<_> = self.drains.drain(..).collect();
        if drains.iter().any(|handle| !handle.is_finished()) {
            info!("Waiting to finish processing of tracked vehicles");
        }
        for handle in drains {
            if let Err(e) = handle.await {
                error!(error = %e, "Vehicle processing task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// An install root with two liveries of one car and an unrelated car.
    fn install_root() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        let vehicles = root.join("Installed").join("Vehicles");
        for dir in ["Foo/Car_2024", "Foo/Car_2025", "Bar/Car_2024"] {
            fs::create_dir_all(vehicles.join(dir)).unwrap();
        }
        fs::create_dir_all(root.join("UserData").join("player")).unwrap();

        let veh = |dir: &str| vehicles.join(dir).join("car.veh").display().to_string();
        let database = format!(
            "//[[gMa1.002f (c)2016    ]] (c)\n\
             [VEHICLE]\nID=1\nFile=\"{}\"\nFOV=60\nSeat=(0.0,0.1)\n\
             [VEHICLE]\nID=2\nFile=\"{}\"\nFOV=50\nSeat=(0.0,0.0)\n\
             [VEHICLE]\nID=3\nFile=\"{}\"\nFOV=50\n",
            veh("Foo/Car_2024"),
            veh("Foo/Car_2025"),
            veh("Bar/Car_2024"),
        );
        fs::write(root.join(DATABASE_FILE), database).unwrap();
        select(root, &veh("Foo/Car_2024"));
        temp_dir
    }

    fn select(root: &Path, vehicle_file: &str) {
        let json = serde_json::json!({ "DRIVER": { "Vehicle File": vehicle_file } });
        fs::write(root.join(PLAYER_FILE), json.to_string()).unwrap();
    }

    fn tracker(root: &Path) -> VehicleTracker {
        VehicleTracker::new(SyncPaths::from_install_root(root).unwrap(), 10)
    }

    fn database(root: &Path) -> String {
        fs::read_to_string(root.join(DATABASE_FILE)).unwrap()
    }

    #[test]
    fn sync_paths_layout() {
        let paths = SyncPaths::from_install_root(Path::new("/games/rF2")).unwrap();
        assert!(paths.player_file.as_path().ends_with("UserData/player/player.JSON"));
        assert!(paths.database_file.as_path().ends_with("UserData/player/all_vehicles.ini"));
        assert_eq!(paths.install_root.name(), "rF2");
    }

    #[test]
    fn enqueue_reports_added_then_touched() {
        let root = install_root();
        let tracker = tracker(root.path());

        assert!(matches!(
            tracker.enqueue_selected_vehicle().unwrap(),
            EnqueueOutcome::Added(_)
        ));
        assert!(matches!(
            tracker.enqueue_selected_vehicle().unwrap(),
            EnqueueOutcome::Touched(_)
        ));
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn missing_selection_leaves_queue_unchanged() {
        let root = install_root();
        fs::write(root.path().join(PLAYER_FILE), r#"{ "DRIVER": {} }"#).unwrap();
        let tracker = tracker(root.path());

        assert_eq!(
            tracker.enqueue_selected_vehicle().unwrap(),
            EnqueueOutcome::SelectionMissing
        );
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn drain_propagates_and_writes_backup() {
        let root = install_root();
        let original = database(root.path());
        let tracker = tracker(root.path());
        tracker.enqueue_selected_vehicle().unwrap();

        let report = tracker.process_queue(DrainMode::Persist).unwrap();

        assert_eq!(report.changed_count(), 1);
        assert!(report.written());
        assert_eq!(tracker.pending(), 0);

        let written = database(root.path());
        assert_eq!(written.matches("FOV=60").count(), 2);
        assert_eq!(written.matches("Seat=(0.0,0.1)").count(), 2);
        assert_eq!(written.matches("FOV=50").count(), 1);

        let backup = fs::read_to_string(root.path().join(format!("{DATABASE_FILE}.1"))).unwrap();
        assert_eq!(backup, original);
    }

    #[test]
    fn drain_without_changes_skips_write() {
        let root = install_root();
        let tracker = tracker(root.path());
        tracker.enqueue_selected_vehicle().unwrap();
        tracker.process_queue(DrainMode::Persist).unwrap();

        tracker.enqueue_selected_vehicle().unwrap();
        let report = tracker.process_queue(DrainMode::Persist).unwrap();

        assert_eq!(report.changed_count(), 0);
        assert!(!report.written());
        assert!(!root.path().join(format!("{DATABASE_FILE}.2")).exists());
    }

    #[test]
    fn dry_run_leaves_database_untouched() {
        let root = install_root();
        let original = database(root.path());
        let tracker = tracker(root.path());
        tracker.enqueue_selected_vehicle().unwrap();

        let report = tracker.process_queue(DrainMode::DryRun).unwrap();

        assert_eq!(report.changed_count(), 1);
        assert!(!report.written());
        assert_eq!(database(root.path()), original);
    }

    #[test]
    fn empty_queue_does_not_load() {
        let temp_dir = TempDir::new().unwrap();
        // No database exists, so loading would fail
        let tracker = tracker(temp_dir.path());

        let report = tracker.process_queue(DrainMode::Persist).unwrap();
        assert!(report.outcomes.is_empty());
    }

    #[test]
    fn unknown_vehicle_is_skipped() {
        let root = install_root();
        let tracker = tracker(root.path());
        tracker.track(VehicleFileIdentity::parse(r"Vehicles\Nope\1.0\car.veh").unwrap());
        tracker.enqueue_selected_vehicle().unwrap();

        let report = tracker.process_queue(DrainMode::Persist).unwrap();

        assert_eq!(report.not_found.len(), 1);
        assert_eq!(report.changed_count(), 1);
    }

    #[test]
    fn load_failure_loses_queued_items() {
        let temp_dir = TempDir::new().unwrap();
        let tracker = tracker(temp_dir.path());
        tracker.track(VehicleFileIdentity::parse(r"Vehicles\Foo\1.0\car.veh").unwrap());

        let err = tracker.process_queue(DrainMode::Persist).unwrap_err();

        assert!(matches!(err, DrainError::Load(_)));
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn most_recent_selection_wins() {
        let root = install_root();
        let vehicles = root.path().join("Installed").join("Vehicles");
        let tracker = tracker(root.path());

        tracker.enqueue_selected_vehicle().unwrap();
        select(
            root.path(),
            &vehicles.join("Foo/Car_2025/car.veh").display().to_string(),
        );
        tracker.enqueue_selected_vehicle().unwrap();

        tracker.process_queue(DrainMode::Persist).unwrap();

        // Car_2025 was selected last, so its settings reach Car_2024
        let written = database(root.path());
        assert_eq!(written.matches("FOV=50").count(), 3);
    }

    #[tokio::test]
    async fn session_start_fails_without_player_directory() {
        let temp_dir = TempDir::new().unwrap();
        let mut controller = SessionController::new(Duration::from_millis(50), 10);

        assert!(!controller.on_tracked_session_start(temp_dir.path()));
        assert!(!controller.is_tracking());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn session_end_without_start_is_harmless() {
        let mut controller = SessionController::new(Duration::from_millis(50), 10);
        assert!(!controller.on_tracked_session_end());
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn tracker_is_reused_for_same_install_root() {
        let root = install_root();
        let mut controller = SessionController::new(Duration::from_millis(50), 10);

        assert!(controller.on_tracked_session_start(root.path()));
        let first = Arc::clone(controller.tracker().unwrap());
        controller.tracker().unwrap().track(
            VehicleFileIdentity::parse(r"Vehicles\Foo\Car_2024\car.veh").unwrap(),
        );
        controller
            .dispatcher
            .as_ref()
            .unwrap()
            .unregister(&first.paths().player_file);

        assert!(controller.on_tracked_session_start(root.path()));
        let second = controller.tracker().unwrap();
        assert!(Arc::ptr_eq(&first, second));
        assert_eq!(second.pending(), 1);
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn new_install_root_releases_previous_player_file() {
        let first_root = install_root();
        let second_root = install_root();
        let mut controller = SessionController::new(Duration::from_millis(50), 10);

        assert!(controller.on_tracked_session_start(first_root.path()));
        let first = Arc::clone(controller.tracker().unwrap());
        assert!(controller.on_tracked_session_start(second_root.path()));
        let second = Arc::clone(controller.tracker().unwrap());
        assert!(!Arc::ptr_eq(&first, &second));

        let dispatcher = controller.dispatcher.as_ref().unwrap();
        assert!(!dispatcher.is_registered(&first.paths().player_file));
        assert!(dispatcher.is_registered(&second.paths().player_file));
        assert_eq!(dispatcher.watched_directories(), 1);

        // The old root's player file no longer feeds anything
        let veh = first_root.path().join("Installed/Vehicles/Foo/Car_2025/car.veh");
        select(first_root.path(), &veh.display().to_string());
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(first.pending(), 0);

        controller.shutdown().await;
    }

    #[tokio::test]
    async fn session_end_drains_in_background() {
        let root = install_root();
        let mut controller = SessionController::new(Duration::from_millis(50), 10);

        assert!(controller.on_tracked_session_start(root.path()));
        assert!(controller.is_tracking());
        controller.tracker().unwrap().enqueue_selected_vehicle().unwrap();

        assert!(controller.on_tracked_session_end());
        assert!(!controller.is_tracking());
        controller.shutdown().await;

        assert_eq!(database(root.path()).matches("FOV=60").count(), 2);
    }
}
