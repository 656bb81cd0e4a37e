//! Error types for the scan runner.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),
}

/// Service configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors that terminate a single scan.
///
/// None of these are retried by the worker; a caller that wants a retry
/// submits a new request.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Configuration profile {name} not found")]
    ConfigNotFound { name: String },

    #[error("Configuration profile {name} could not be decoded: {reason}")]
    Decode { name: String, reason: String },

    #[error("Could not prepare scan inputs: {0}")]
    Materialization(String),

    #[error("Scan setup failed: {0}")]
    Setup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings lookup failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scan {id} is {state}, cannot {action}")]
    InvalidState {
        id: i64,
        state: String,
        action: String,
    },

    #[error("Scan queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("Scan queue is closed")]
    QueueClosed,
}

/// Result type alias for the scan runner.
pub type Result<T> = std::result::Result<T, Error>;
