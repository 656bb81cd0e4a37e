//! `SettingsStore` trait: async interface to configuration-profile storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::DatabaseError;

/// A stored configuration profile, still in its serialized form.
#[derive(Debug, Clone)]
pub struct StoredSetting {
    pub name: String,
    /// Serialized profile document (YAML).
    pub settingdata: String,
    pub datatype: String,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic storage for named configuration profiles.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Look up a profile by name. `Ok(None)` when no such profile exists.
    async fn get_setting_by_name(&self, name: &str) -> Result<Option<StoredSetting>, DatabaseError>;

    /// Create or replace a profile.
    async fn upsert_setting(
        &self,
        name: &str,
        settingdata: &str,
        datatype: &str,
    ) -> Result<(), DatabaseError>;

    /// All stored profiles, ordered by name.
    async fn list_settings(&self) -> Result<Vec<StoredSetting>, DatabaseError>;
}
