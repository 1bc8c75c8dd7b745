//! Forward-only schema migrations.
//!
//! The version lives in `schema_meta`. Each step in [`MIGRATIONS`] runs in its own
//! transaction together with the version bump, so a failed step leaves the
//! database at the previous version.

use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// `(target version, name, step)`, in ascending order.
const MIGRATIONS: &[(u32, &str, Step)] = &[(2, "backfill_session_owners", backfill_session_owners)];

pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let raw: String = conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'schema_version'",
        [],
        |row| row.get(0),
    )?;
    Ok(raw.parse().unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE schema_meta SET value = ?1 WHERE key = 'schema_version'",
        [version.to_string()],
    )?;
    Ok(())
}

/// Apply every pending step and return the resulting version.
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<u32> {
    let start = get_schema_version(conn)?;
    let mut version = start;
    for &(target, name, step) in MIGRATIONS.iter().filter(|(t, _, _)| *t > start) {
        tracing::info!(from = version, to = target, migration = name, "migrating store schema");
        let tx = conn.unchecked_transaction()?;
        step(&tx)?;
        set_schema_version(&tx, target)?;
        tx.commit()?;
        version = target;
    }
    Ok(version)
}

/// Sessions first written through `add_messages` were stored without an owner.
/// Recover it from the `user_id` the memory engine puts in message metadata.
fn backfill_session_owners(conn: &Connection) -> rusqlite::Result<()> {
    let repaired = conn.execute(
        "UPDATE sessions SET user_id = owner.user_id \
         FROM ( \
             SELECT session_id, MIN(json_extract(metadata, '$.user_id')) AS user_id \
             FROM messages \
             WHERE CASE WHEN json_valid(metadata) THEN json_type(metadata, '$.user_id') END = 'text' \
             GROUP BY session_id \
         ) AS owner \
         WHERE sessions.id = owner.session_id AND sessions.user_id = ''",
        [],
    )?;
    if repaired > 0 {
        tracing::info!(sessions = repaired, "recovered session owners");
    }
    Ok(())
}
