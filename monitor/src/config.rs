//! Configuration module for the LiverySync monitor.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `LIVERYSYNC_INSTALL_ROOT` | No | Steam `rFactor 2` directory | Game install root |
//! | `LIVERYSYNC_DEBOUNCE_MS` | No | 1250 | Quiet period before a change is picked up |
//! | `LIVERYSYNC_BACKUP_RETENTION` | No | 10 | Number of database backups kept (1-100) |
//! | `LIVERYSYNC_LOG_FORMAT` | No | `pretty` | `pretty` or `json` log output |
//!
//! # Example
//!
//! ```no_run
//! use liverysync_monitor::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Install root: {}", config.install_root.display());
//! ```

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;

use crate::backup::DEFAULT_RETENTION;
use crate::utils::debounce::DEFAULT_DEBOUNCE_MS;

/// Environment variable overriding the install root.
pub const INSTALL_ROOT_VAR: &str = "LIVERYSYNC_INSTALL_ROOT";

const DEBOUNCE_VAR: &str = "LIVERYSYNC_DEBOUNCE_MS";
const RETENTION_VAR: &str = "LIVERYSYNC_BACKUP_RETENTION";
const LOG_FORMAT_VAR: &str = "LIVERYSYNC_LOG_FORMAT";

/// Minimum allowed backup retention.
const MIN_RETENTION: usize = 1;

/// Maximum allowed backup retention.
const MAX_RETENTION: usize = 100;

/// Steam library path of the game, relative to the Steam root.
const STEAM_GAME_DIR: &str = "steamapps/common/rFactor 2";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Output format for tracing logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, for terminals.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// Configuration for the LiverySync monitor.
#[derive(Debug, Clone)]
pub struct Config {
    /// rFactor 2 install root, the directory containing `UserData`.
    pub install_root: PathBuf,

    /// Quiet period after the last change to `player.JSON`.
    pub debounce: Duration,

    /// Number of numbered database backups kept.
    pub backup_retention: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - A numeric variable is set but not a valid number in range
    /// - `LIVERYSYNC_LOG_FORMAT` is neither `pretty` nor `json`
    /// - No install root is given and the home directory cannot be determined
    pub fn from_env() -> Result<Self, ConfigError> {
        let install_root = match env::var(INSTALL_ROOT_VAR) {
            Ok(val) if !val.trim().is_empty() => PathBuf::from(val),
            _ => default_install_root()?,
        };

        // Optional: LIVERYSYNC_DEBOUNCE_MS (default: 1250, must be > 0)
        let debounce_ms = match env::var(DEBOUNCE_VAR) {
            Ok(val) => {
                let ms = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: DEBOUNCE_VAR.to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: DEBOUNCE_VAR.to_string(),
                        message: "debounce interval must be greater than 0".to_string(),
                    });
                }
                ms
            }
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        // Optional: LIVERYSYNC_BACKUP_RETENTION (default: 10, must be 1-100)
        let backup_retention = match env::var(RETENTION_VAR) {
            Ok(val) => {
                let count = val.parse::<usize>().map_err(|_| ConfigError::InvalidValue {
                    key: RETENTION_VAR.to_string(),
                    message: format!("expected integer {MIN_RETENTION}-{MAX_RETENTION}, got '{val}'"),
                })?;
                if !(MIN_RETENTION..=MAX_RETENTION).contains(&count) {
                    return Err(ConfigError::InvalidValue {
                        key: RETENTION_VAR.to_string(),
                        message: format!(
                            "backup retention must be between {MIN_RETENTION} and {MAX_RETENTION}, got {count}"
                        ),
                    });
                }
                count
            }
            Err(_) => DEFAULT_RETENTION,
        };

        let log_format = match env::var(LOG_FORMAT_VAR) {
            Ok(val) => val
                .parse::<LogFormat>()
                .map_err(|message| ConfigError::InvalidValue {
                    key: LOG_FORMAT_VAR.to_string(),
                    message,
                })?,
            Err(_) => LogFormat::default(),
        };

        Ok(Self {
            install_root,
            debounce: Duration::from_millis(debounce_ms),
            backup_retention,
            log_format,
        })
    }
}

/// Where Steam installs the game by default.
fn default_install_root() -> Result<PathBuf, ConfigError> {
    if cfg!(windows) {
        return Ok(PathBuf::from(r"C:\Program Files (x86)\Steam").join(STEAM_GAME_DIR));
    }
    let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
    Ok(base_dirs.data_dir().join("Steam").join(STEAM_GAME_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all LIVERYSYNC_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("LIVERYSYNC_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("LIVERYSYNC_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_defaults() {
        with_clean_env(|| {
            let config = Config::from_env().expect("should parse default config");

            assert_eq!(config.debounce, Duration::from_millis(1250));
            assert_eq!(config.backup_retention, 10);
            assert_eq!(config.log_format, LogFormat::Pretty);
            assert!(config.install_root.ends_with("rFactor 2"));
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            env::set_var(INSTALL_ROOT_VAR, "/games/rFactor 2");
            env::set_var(DEBOUNCE_VAR, "500");
            env::set_var(RETENTION_VAR, "3");
            env::set_var(LOG_FORMAT_VAR, "JSON");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.install_root, PathBuf::from("/games/rFactor 2"));
            assert_eq!(config.debounce, Duration::from_millis(500));
            assert_eq!(config.backup_retention, 3);
            assert_eq!(config.log_format, LogFormat::Json);
        });
    }

    #[test]
    #[serial]
    fn test_blank_install_root_uses_default() {
        with_clean_env(|| {
            env::set_var(INSTALL_ROOT_VAR, "  ");
            let config = Config::from_env().unwrap();
            assert!(config.install_root.ends_with("rFactor 2"));
        });
    }

    #[test]
    #[serial]
    fn test_invalid_debounce() {
        with_clean_env(|| {
            env::set_var(DEBOUNCE_VAR, "soon");
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == DEBOUNCE_VAR));
        });
    }

    #[test]
    #[serial]
    fn test_zero_debounce_rejected() {
        with_clean_env(|| {
            env::set_var(DEBOUNCE_VAR, "0");
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("greater than 0"));
        });
    }

    #[test]
    #[serial]
    fn test_retention_bounds() {
        with_clean_env(|| {
            env::set_var(RETENTION_VAR, "0");
            assert!(Config::from_env().is_err());

            env::set_var(RETENTION_VAR, "101");
            let err = Config::from_env().unwrap_err();
            assert!(err.to_string().contains("between 1 and 100"));

            env::set_var(RETENTION_VAR, "100");
            assert_eq!(Config::from_env().unwrap().backup_retention, 100);

            env::set_var(RETENTION_VAR, "1");
            assert_eq!(Config::from_env().unwrap().backup_retention, 1);
        });
    }

    #[test]
    #[serial]
    fn test_invalid_log_format() {
        with_clean_env(|| {
            env::set_var(LOG_FORMAT_VAR, "xml");
            let err = Config::from_env().unwrap_err();
            assert_eq!(
                err.to_string(),
                "invalid value for LIVERYSYNC_LOG_FORMAT: expected 'pretty' or 'json', got 'xml'"
            );
        });
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!(" Json ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert!("".parse::<LogFormat>().is_err());
    }
}
