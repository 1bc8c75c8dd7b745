//! SQLite-backed [`MemoryStore`] for offline use.
//!
//! Messages live in the `messages` table with a synced FTS5 index. Search ranks by
//! BM25 and rescales each hit against the best one so scores land in `(0.0, 1.0]`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{MemoryStore, Role, SearchHit, StoreError, StoreMessage, StoreResult, StoredMessage};

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = crate::db::open_database(path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = crate::db::open_memory_database()?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| StoreError::Task(format!("db lock poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("db task failed: {e}")))?
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get("role")?;
    let metadata: Option<String> = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    Ok(StoredMessage {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        role: role.parse().unwrap_or(Role::User),
        content: row.get("content")?,
        metadata: metadata
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

/// Quote each word and OR them together so FTS5 treats user text as plain terms.
fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "")))
        .filter(|w| w != "\"\"")
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn insert_session(conn: &Connection, session_id: &str, user_id: &str, metadata: &serde_json::Value) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO sessions (id, user_id, metadata, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![session_id, user_id, serde_json::to_string(metadata)?, timestamp(Utc::now())],
    )?;
    Ok(inserted > 0)
}

/// Sessions that `add_messages` created on the fly have no owner yet; the first
/// `ensure_session` with a user fills it in.
fn claim_session(conn: &Connection, session_id: &str, user_id: &str, metadata: &serde_json::Value) -> StoreResult<bool> {
    if user_id.is_empty() {
        return Ok(false);
    }
    let claimed = conn.execute(
        "UPDATE sessions SET user_id = ?2, metadata = ?3 WHERE id = ?1 AND user_id = ''",
        params![session_id, user_id, serde_json::to_string(metadata)?],
    )?;
    Ok(claimed > 0)
}

#[async_trait]
impl MemoryStore for SqliteStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            if insert_session(conn, &session_id, &user_id, &metadata)? {
                tracing::info!(session = %session_id, "session created");
            } else if claim_session(conn, &session_id, &user_id, &metadata)? {
                tracing::info!(session = %session_id, user = %user_id, "session owner recorded");
            }
            Ok(())
        })
        .await
    }

    async fn add_messages(&self, session_id: &str, messages: &[StoreMessage]) -> StoreResult<()> {
        let session_id = session_id.to_string();
        let messages = messages.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            insert_session(&tx, &session_id, "", &serde_json::json!({}))?;

            for message in &messages {
                let id = uuid::Uuid::now_v7().to_string();
                tx.execute(
                    "INSERT INTO messages (id, session_id, role, content, metadata, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        id,
                        session_id,
                        message.role.as_str(),
                        message.content,
                        serde_json::to_string(&message.metadata)?,
                        timestamp(Utc::now()),
                    ],
                )?;
                let rowid = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO messages_fts (rowid, content, id, session_id) VALUES (?1, ?2, ?3, ?4)",
                    params![rowid, message.content, id, session_id],
                )?;
            }

            tx.commit()?;
            tracing::debug!(session = %session_id, count = messages.len(), "messages stored");
            Ok(())
        })
        .await
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let exists: Option<String> = conn
                .query_row("SELECT id FROM sessions WHERE id = ?1", [&session_id], |r| r.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(StoreError::SessionNotFound(session_id));
            }

            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, metadata, created_at FROM messages \
                 WHERE session_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![session_id, limit as i64], row_to_message)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    async fn search(&self, session_id: &str, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let escaped = escape_fts_query(query);
        if escaped.is_empty() {
            return Ok(Vec::new());
        }
        let session_id = session_id.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.session_id, m.role, m.content, m.metadata, m.created_at, f.rank \
                 FROM messages_fts f JOIN messages m ON m.rowid = f.rowid \
                 WHERE messages_fts MATCH ?1 AND f.session_id = ?2 \
                 ORDER BY f.rank LIMIT ?3",
            )?;
            let ranked = stmt
                .query_map(params![escaped, session_id, limit as i64], |row| {
                    Ok((row_to_message(row)?, row.get::<_, f64>("rank")?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            // FTS5 rank is negative; more negative is better.
            let best = ranked.first().map(|(_, rank)| *rank).unwrap_or(0.0);
            Ok(ranked
                .into_iter()
                .map(|(message, rank)| {
                    let score = if best < 0.0 { (rank / best).clamp(f64::EPSILON, 1.0) } else { 1.0 };
                    SearchHit { message, score }
                })
                .collect())
        })
        .await
    }
}
