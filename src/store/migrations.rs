//! Version-tracked database migrations for the libSQL backend.
//!
//! `_migrations` records the applied versions; `run_migrations()` applies the
//! missing ones in order. V2 seeds the `default` scan profile.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "settings",
        sql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                name TEXT PRIMARY KEY,
                settingdata TEXT NOT NULL,
                datatype TEXT NOT NULL DEFAULT 'yaml',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
    Migration {
        version: 2,
        name: "default_profile",
        sql: r#"
            INSERT OR IGNORE INTO settings (name, settingdata, datatype) VALUES (
                'default',
                'rate-limit: 150
rate-limit-minute: 0
bulk-size: 25
template-threads: 25
timeout: 5
retries: 1
',
                'yaml'
            );
        "#,
    },
];

fn migration_error(context: impl std::fmt::Display) -> impl FnOnce(libsql::Error) -> DatabaseError {
    move |e| DatabaseError::Migration(format!("{context}: {e}"))
}

/// Apply every migration newer than the recorded version, each in its own
/// transaction together with its version record.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(migration_error("create _migrations"))?;

    let applied = current_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for migration in pending {
        let label = format!("V{} ({})", migration.version, migration.name);
        tracing::info!(version = migration.version, name = migration.name, "Applying migration");

        let tx = conn
            .transaction()
            .await
            .map_err(migration_error(format!("begin {label}")))?;
        tx.execute_batch(migration.sql)
            .await
            .map_err(migration_error(format!("apply {label}")))?;
        tx.execute(
            "INSERT INTO _migrations (version, name) VALUES (?1, ?2)",
            libsql::params![migration.version, migration.name],
        )
        .await
        .map_err(migration_error(format!("record {label}")))?;
        tx.commit()
            .await
            .map_err(migration_error(format!("commit {label}")))?;
    }

    tracing::info!(version = current_version(conn).await?, "Settings schema up to date");
    Ok(())
}

async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(migration_error("query schema version"))?;

    match rows.next().await.map_err(migration_error("read schema version"))? {
        Some(row) => row.get::<i64>(0).map_err(migration_error("decode schema version")),
        None => Ok(0),
    }
}
