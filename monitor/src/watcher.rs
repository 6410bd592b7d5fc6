//! Debounced file watching with per-file callbacks.
//!
//! A [`WatchDispatcher`] watches individual files and calls a callback once
//! each time a file has *settled*, i.e. no create or modify notification has
//! arrived for it during the quiet period.
//!
//! # Architecture
//!
//! ```text
//! notify thread ──try_send──▶ Debouncer ──settled key──▶ dispatch task ──▶ callback
//!       ▲                                                     │
//!       │ one non-recursive watch per directory               │ re-checks registration
//!       └──────────────── Registry (Arc<Mutex<..>>) ◀─────────┘
//! ```
//!
//! The notify callback never blocks: it only forwards keys to the debouncer.
//! Directory watches are reference-counted and released when the last file
//! registered in that directory is unregistered. `notify` watchers are always
//! created and dropped with the registry lock released, since dropping one
//! joins notify's event thread, which may itself be waiting to deliver.
//!
//! # Example
//!
//! ```no_run
//! use liverysync_monitor::paths::FilePath;
//! use liverysync_monitor::watcher::WatchDispatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = WatchDispatcher::with_default_interval();
//!     let player = FilePath::new("/games/rF2/UserData/player/player.JSON")?;
//!
//!     dispatcher.register(player, |path| println!("{path} settled"))?;
//!     tokio::signal::ctrl_c().await?;
//!     dispatcher.dispose();
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::paths::{DirectoryPath, FilePath};
use crate::utils::debounce::{Debouncer, DEFAULT_DEBOUNCE_MS};

/// Callback invoked with the path of a file that has settled.
pub type SettleCallback = Arc<dyn Fn(&FilePath) + Send + Sync>;

/// Errors that can occur during file watching operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Failed to initialize the file system watcher.
    #[error("failed to create watcher: {0}")]
    WatcherInit(#[from] notify::Error),

    /// The directory of the file does not exist.
    #[error("watch directory does not exist: {0}")]
    DirectoryNotFound(PathBuf),

    /// The dispatcher has been disposed.
    #[error("watch dispatcher has been disposed")]
    Disposed,
}

/// Result type for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

struct DirectoryWatch {
    /// Kept alive to maintain the watch subscription.
    _watcher: RecommendedWatcher,
    registrants: usize,
}

#[derive(Default)]
struct Registry {
    callbacks: HashMap<FilePath, SettleCallback>,
    directories: HashMap<DirectoryPath, DirectoryWatch>,
    disposed: bool,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Watches files and reports each burst of changes once.
///
/// Must be created inside a Tokio runtime. Disposed automatically on drop.
pub struct WatchDispatcher {
    registry: Arc<Mutex<Registry>>,
    debouncer: Debouncer<FilePath, ()>,
    dispatch_task: JoinHandle<()>,
    interval: Duration,
}

impl std::fmt::Debug for WatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("WatchDispatcher")
            .field("interval", &self.interval)
            .field("files", &registry.callbacks.len())
            .field("directories", &registry.directories.len())
            .field("disposed", &registry.disposed)
            .finish()
    }
}

impl WatchDispatcher {
    /// Creates a dispatcher with the given quiet period.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let (settled_tx, settled_rx) = mpsc::channel(100);
        let debouncer = Debouncer::new(interval, settled_tx);

        let dispatch_task = tokio::spawn(dispatch_settled(settled_rx, Arc::clone(&registry)));

        debug!(interval_ms = interval.as_millis(), "Created watch dispatcher");

        Self {
            registry,
            debouncer,
            dispatch_task,
            interval,
        }
    }

    /// Creates a dispatcher with the default quiet period of 1250 ms.
    #[must_use]
    pub fn with_default_interval() -> Self {
        Self::new(Duration::from_millis(DEFAULT_DEBOUNCE_MS))
    }

    /// The quiet period.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Calls `on_settled` whenever `path` has settled after a change.
    ///
    /// Registering a path that is already registered does nothing and keeps
    /// the original callback.
    ///
    /// # Errors
    ///
    /// Returns an error if the file's directory does not exist, the native
    /// watch cannot be created, or the dispatcher has been disposed.
    pub fn register<F>(&self, path: FilePath, on_settled: F) -> Result<()>
    where
        F: Fn(&FilePath) + Send + Sync + 'static,
    {
        let directory = path
            .directory()
            .ok_or_else(|| WatchError::DirectoryNotFound(path.as_path().to_path_buf()))?;
        let callback: SettleCallback = Arc::new(on_settled);

        {
            let mut registry = lock(&self.registry);
            if registry.disposed {
                return Err(WatchError::Disposed);
            }
            if registry.callbacks.contains_key(&path) {
                trace!(path = %path, "Already registered");
                return Ok(());
            }
            if let Some(watch) = registry.directories.get_mut(&directory) {
                watch.registrants += 1;
                registry.callbacks.insert(path.clone(), callback);
                debug!(path = %path, "Registered file in watched directory");
                return Ok(());
            }
        }

        if !directory.exists() {
            return Err(WatchError::DirectoryNotFound(
                directory.as_path().to_path_buf(),
            ));
        }
        let watcher = create_watcher(&directory, self.debouncer.clone())?;

        // Anything displaced here is dropped after the lock is released.
        let surplus = {
            let mut registry = lock(&self.registry);
            if registry.disposed {
                return Err(WatchError::Disposed);
            }
            if registry.callbacks.contains_key(&path) {
                Some(watcher)
            } else {
                registry.callbacks.insert(path.clone(), callback);
                match registry.directories.get_mut(&directory) {
                    Some(watch) => {
                        watch.registrants += 1;
                        Some(watcher)
                    }
                    None => {
                        registry.directories.insert(
                            directory.clone(),
                            DirectoryWatch {
                                _watcher: watcher,
                                registrants: 1,
                            },
                        );
                        None
                    }
                }
            }
        };
        drop(surplus);

        info!(path = %path, directory = %directory, "Watching file");
        Ok(())
    }

    /// Stops watching `path` and cancels its pending settle, if any.
    ///
    /// Returns `false` if the path was not registered.
    pub fn unregister(&self, path: &FilePath) -> bool {
        let released = {
            let mut registry = lock(&self.registry);
            if registry.callbacks.remove(path).is_none() {
                return false;
            }
            path.directory().and_then(|directory| {
                let watch = registry.directories.get_mut(&directory)?;
                watch.registrants = watch.registrants.saturating_sub(1);
                if watch.registrants == 0 {
                    registry.directories.remove(&directory).map(|w| (directory, w))
                } else {
                    None
                }
            })
        };

        if !self.debouncer.cancel(path.clone()) {
            warn!(path = %path, "Could not cancel pending settle");
        }
        if let Some((directory, watch)) = released {
            drop(watch);
            debug!(directory = %directory, "Released directory watch");
        }

        info!(path = %path, "Stopped watching file");
        true
    }

    /// True if `path` is currently registered.
    #[must_use]
    pub fn is_registered(&self, path: &FilePath) -> bool {
        lock(&self.registry).callbacks.contains_key(path)
    }

    /// Number of directories with a native watch.
    #[must_use]
    pub fn watched_directories(&self) -> usize {
        lock(&self.registry).directories.len()
    }

    /// True once [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        lock(&self.registry).disposed
    }

    /// Cancels all pending settles and releases every watch.
    ///
    /// Later registrations fail with [`WatchError::Disposed`]. Calling this
    /// more than once has no further effect.
    pub fn dispose(&self) {
        let watches: Vec<DirectoryWatch> = {
            let mut registry = lock(&self.registry);
            if registry.disposed {
                return;
            }
            registry.disposed = true;
            registry.callbacks.clear();
            registry.directories.drain().map(|(_, watch)| watch).collect()
        };

        let released = watches.len();
        drop(watches);
        self.debouncer.cancel_all();
        self.dispatch_task.abort();

        info!(directories = released, "Watch dispatcher disposed");
    }
}

impl Drop for WatchDispatcher {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Creates a non-recursive notify watch on `directory`.
fn create_watcher(
    directory: &DirectoryPath,
    debouncer: Debouncer<FilePath, ()>,
) -> Result<RecommendedWatcher> {
    let watched = directory.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| {
            handle_notify_event(res, &watched, &debouncer);
        },
        Config::default(),
    )?;

    watcher.watch(directory.as_path(), RecursiveMode::NonRecursive)?;
    debug!(directory = %directory, "Started directory watch");

    Ok(watcher)
}

/// Forwards create and modify events for files in `directory` to the debouncer.
///
/// Runs on notify's thread, so it never blocks. Returns how many keys were
/// queued.
fn handle_notify_event(
    res: notify::Result<Event>,
    directory: &DirectoryPath,
    debouncer: &Debouncer<FilePath, ()>,
) -> usize {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return 0;
        }
    };

    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        trace!(kind = ?event.kind, "Ignoring event kind");
        return 0;
    }

    let mut queued = 0;
    for path in &event.paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(file) = FilePath::in_directory(directory, name) else {
            continue;
        };

        if debouncer.try_send(file, ()) {
            queued += 1;
        } else {
            warn!(path = %path.display(), "Failed to queue file event, channel may be full");
        }
    }
    queued
}

/// Invokes the callback for each settled path that is still registered.
async fn dispatch_settled(
    mut settled_rx: mpsc::Receiver<(FilePath, ())>,
    registry: Arc<Mutex<Registry>>,
) {
    while let Some((path, ())) = settled_rx.recv().await {
        let callback = {
            let registry = lock(&registry);
            if registry.disposed {
                break;
            }
            registry.callbacks.get(&path).cloned()
        };

        let Some(callback) = callback else {
            trace!(path = %path, "Settled file is not registered");
            continue;
        };

        debug!(path = %path, "File settled");
        if let Err(e) = tokio::task::spawn_blocking(move || callback(&path)).await {
            error!(error = %e, "Settle callback panicked");
        }
    }

    debug!("Dispatch task shutting down");
}
