//! libSQL backend: async `SettingsStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{SettingsStore, StoredSetting};

const SETTING_COLUMNS: &str = "name, settingdata, datatype, updated_at";

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use,
/// so a single connection is shared by every scan worker.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Column order matches SETTING_COLUMNS.
fn row_to_setting(row: &libsql::Row) -> Result<StoredSetting, libsql::Error> {
    let updated: String = row.get(3)?;
    Ok(StoredSetting {
        name: row.get(0)?,
        settingdata: row.get(1)?,
        datatype: row.get(2)?,
        updated_at: parse_datetime(&updated),
    })
}

#[async_trait]
impl SettingsStore for LibSqlBackend {
    async fn get_setting_by_name(&self, name: &str) -> Result<Option<StoredSetting>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SETTING_COLUMNS} FROM settings WHERE name = ?1"),
                params![name],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_setting_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let setting = row_to_setting(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(setting))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_setting_by_name: {e}"))),
        }
    }

    async fn upsert_setting(
        &self,
        name: &str,
        settingdata: &str,
        datatype: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO settings (name, settingdata, datatype, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(name) DO UPDATE SET
                    settingdata = excluded.settingdata,
                    datatype = excluded.datatype,
                    updated_at = excluded.updated_at",
                params![name, settingdata, datatype, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_setting: {e}")))?;
        debug!(name, "Setting stored");
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<StoredSetting>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SETTING_COLUMNS} FROM settings ORDER BY name"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_settings: {e}")))?;

        let mut settings = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_settings: {e}")))?
        {
            settings.push(
                row_to_setting(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(settings)
    }
}
