//! Service configuration.

use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Runtime configuration for the scan service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Path of the libSQL database holding configuration profiles.
    pub db_path: PathBuf,
    /// Directory receiving one log file per scan.
    pub logs_dir: PathBuf,
    /// Root directory that request template references are resolved against.
    pub templates_dir: PathBuf,
    /// Number of scans executed concurrently.
    pub workers: usize,
    /// Capacity of the pending-scan queue.
    pub queue_capacity: usize,
    /// Port of the HTTP status surface.
    pub http_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/scans.db"),
            logs_dir: PathBuf::from("./data/logs"),
            templates_dir: PathBuf::from("./templates"),
            workers: 4,
            queue_capacity: 64,
            http_port: 8822,
        }
    }
}

impl ServiceConfig {
    /// Build config from `SCAN_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let workers = parse_env("SCAN_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SCAN_WORKERS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            db_path: path_env("SCAN_DB_PATH", defaults.db_path),
            logs_dir: path_env("SCAN_LOGS_DIR", defaults.logs_dir),
            templates_dir: path_env("SCAN_TEMPLATES_DIR", defaults.templates_dir),
            workers,
            queue_capacity: parse_env("SCAN_QUEUE_CAPACITY", defaults.queue_capacity)?.max(1),
            http_port: parse_env("SCAN_HTTP_PORT", defaults.http_port)?,
        })
    }
}

fn path_env(key: &str, default: PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
