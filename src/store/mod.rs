//! Session/message memory stores.
//!
//! [`MemoryStore`] is the contract the memory engine writes through: sessions hold
//! role-tagged messages with JSON metadata, and search returns scored hits. Two
//! backends implement it, [`zep::ZepStore`] over HTTP and [`local::SqliteStore`]
//! on a local SQLite file.

pub mod local;
pub mod zep;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::PersonaConfig;

pub use local::SqliteStore;
pub use zep::ZepStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("store task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            _ => Err(format!("unknown role: {s}")),
        }
    }
}

/// A message to append to a session.
#[derive(Debug, Clone, Serialize)]
pub struct StoreMessage {
    pub role: Role,
    pub content: String,
    pub metadata: serde_json::Value,
}

impl StoreMessage {
    pub fn new(role: Role, content: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            role,
            content: content.into(),
            metadata,
        }
    }
}

/// A message as read back from a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub message: StoredMessage,
    /// Similarity in `(0.0, 1.0]`.
    pub score: f64,
}

#[async_trait]
pub trait MemoryStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create the session if it does not exist yet.
    async fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()>;

    /// Append messages. The session is created on demand.
    async fn add_messages(&self, session_id: &str, messages: &[StoreMessage]) -> StoreResult<()>;

    /// Most recent messages first.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>>;

    /// Best matches first.
    async fn search(&self, session_id: &str, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>>;
}

/// Build the store selected by `store.backend`. `none` runs the engine in local mode.
pub fn open_store(config: &PersonaConfig) -> anyhow::Result<Option<Arc<dyn MemoryStore>>> {
    match config.store.backend.as_str() {
        "local" | "sqlite" => {
            let store = SqliteStore::open(config.resolved_db_path())?;
            Ok(Some(Arc::new(store)))
        }
        "zep" => {
            let store = ZepStore::new(&config.zep)?;
            Ok(Some(Arc::new(store)))
        }
        "none" => Ok(None),
        other => anyhow::bail!("unknown store backend: {other} (expected local, zep or none)"),
    }
}
