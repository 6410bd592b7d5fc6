//! LiverySync Monitor - rFactor 2 livery settings synchronizer.
//!
//! # Commands
//!
//! - `liverysync-monitor run`: Track vehicle selections until stopped, then
//!   propagate settings
//! - `liverysync-monitor sync`: Propagate settings for given vehicles once
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use liverysync_monitor::config::{Config, LogFormat};
use liverysync_monitor::identity::VehicleFileIdentity;
use liverysync_monitor::session::{
    DrainMode, DrainReport, EnqueueOutcome, SessionController, SyncPaths, VehicleTracker,
};

/// LiverySync Monitor - keeps rFactor 2 seat, mirror and FFB settings in
/// sync across liveries of the same car.
#[derive(Parser, Debug)]
#[command(name = "liverysync-monitor")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    LIVERYSYNC_INSTALL_ROOT      rFactor 2 install root (default: Steam library)
    LIVERYSYNC_DEBOUNCE_MS       Quiet period for player.JSON changes (default: 1250)
    LIVERYSYNC_BACKUP_RETENTION  Database backups kept, 1-100 (default: 10)
    LIVERYSYNC_LOG_FORMAT        'pretty' or 'json' (default: pretty)
    RUST_LOG                     Log filter (default: info)

EXAMPLES:
    # Track while playing, propagate on Ctrl+C
    liverysync-monitor run --install-root 'D:\\Games\\rFactor 2'

    # Preview what the current selection would change
    liverysync-monitor sync --dry-run
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Track vehicle selections until stopped.
    ///
    /// Watches player.JSON while the game runs. On Ctrl+C or SIGTERM the
    /// settings of every selected vehicle are copied to its liveries.
    Run {
        /// rFactor 2 install root (overrides LIVERYSYNC_INSTALL_ROOT).
        #[arg(short, long)]
        install_root: Option<PathBuf>,
    },

    /// Propagate settings once.
    ///
    /// Uses the given vehicle files, or the vehicle currently selected in
    /// player.JSON when none are given. The last file listed is applied
    /// first.
    Sync {
        /// rFactor 2 install root (overrides LIVERYSYNC_INSTALL_ROOT).
        #[arg(short, long)]
        install_root: Option<PathBuf>,

        /// Print the changes as unified diffs without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Vehicle files to propagate, as written in all_vehicles.ini.
        #[arg(value_name = "VEHICLE_FILE")]
        vehicle_files: Vec<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    init_logging(config.log_format);

    match cli.command {
        Command::Run { install_root } => {
            if let Some(root) = install_root {
                config.install_root = root;
            }

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("Failed to create tokio runtime")?;

            runtime.block_on(run_monitor(config))
        }
        Command::Sync {
            install_root,
            dry_run,
            vehicle_files,
        } => {
            if let Some(root) = install_root {
                config.install_root = root;
            }
            let mode = if dry_run {
                DrainMode::DryRun
            } else {
                DrainMode::Persist
            };
            run_sync(&config, &vehicle_files, mode)
        }
    }
}

/// Tracks one session from start until a shutdown signal.
async fn run_monitor(config: Config) -> Result<()> {
    info!(
        install_root = %config.install_root.display(),
        debounce_ms = config.debounce.as_millis(),
        backup_retention = config.backup_retention,
        "Starting LiverySync Monitor"
    );

    let mut controller = SessionController::from_config(&config);
    if !controller.on_tracked_session_start(&config.install_root) {
        bail!(
            "Unable to track vehicle selections under {}",
            config.install_root.display()
        );
    }

    wait_for_shutdown().await;
    info!("Shutdown signal received");

    controller.on_tracked_session_end();
    controller.shutdown().await;

    info!("LiverySync Monitor stopped");
    Ok(())
}

/// Runs the one-shot sync command.
fn run_sync(config: &Config, vehicle_files: &[String], mode: DrainMode) -> Result<()> {
    let paths = SyncPaths::from_install_root(&config.install_root)
        .context("Invalid install root")?;
    let tracker = VehicleTracker::new(paths, config.backup_retention);

    if vehicle_files.is_empty() {
        let outcome = tracker
            .enqueue_selected_vehicle()
            .context("Failed to read the selected vehicle")?;
        if outcome == EnqueueOutcome::SelectionMissing {
            bail!(
                "No vehicle selected in {}",
                tracker.paths().player_file
            );
        }
    } else {
        for raw in vehicle_files {
            let identity = VehicleFileIdentity::parse(raw)
                .with_context(|| format!("Invalid vehicle file '{raw}'"))?;
            tracker.track(identity);
        }
    }

    let report = tracker
        .process_queue(mode)
        .context("Failed to update vehicles")?;
    print_report(&report, mode);
    Ok(())
}

fn print_report(report: &DrainReport, mode: DrainMode) {
    if mode == DrainMode::DryRun {
        for change in report.outcomes.iter().flat_map(|o| &o.changes) {
            print!("{}", change.unified_diff());
        }
    }

    for missing in &report.not_found {
        eprintln!("Vehicle not found in database: {missing}");
    }

    let verb = match (mode, report.written()) {
        (DrainMode::DryRun, _) => "would be updated",
        (DrainMode::Persist, true) => "updated",
        (DrainMode::Persist, false) => "updated, nothing written",
    };
    eprintln!("{} vehicles {verb}", report.changed_count());
}

/// Initializes the logging subsystem.
fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr);
            tracing_subscriber::registry()
                .with(filter)
                .with(json_layer)
                .init();
        }
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
