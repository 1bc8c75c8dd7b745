//! SQLite plumbing for the local store: connection setup, DDL and migrations.

pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the store database at `path`, creating missing parent directories.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("cannot create directory {}", dir.display()))?;
    }

    let conn = Connection::open(path)
        .with_context(|| format!("cannot open database {}", path.display()))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    prepare(&conn)?;

    tracing::info!(path = %path.display(), "store database ready");
    Ok(conn)
}

/// Throwaway in-memory database with the full schema.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("cannot open in-memory database")?;
    prepare(&conn)?;
    Ok(conn)
}

fn prepare(conn: &Connection) -> Result<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(conn).context("schema setup failed")?;
    let version = migrations::run_migrations(conn).context("schema migration failed")?;
    tracing::debug!(schema_version = version, "schema up to date");
    Ok(())
}
