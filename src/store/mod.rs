//! Persistence layer: libSQL-backed storage for configuration profiles.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{SettingsStore, StoredSetting};
