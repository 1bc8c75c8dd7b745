//! Zep cloud memory API client.
//!
//! Session ids travel as single percent-encoded path segments, so ids holding `/`,
//! spaces or `?` address the right session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{MemoryStore, Role, SearchHit, StoreError, StoreMessage, StoreResult, StoredMessage};
use crate::config::ZepConfig;

pub struct ZepStore {
    client: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Deserialize)]
struct ZepMessage {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    role_type: Option<String>,
    content: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct ZepMemory {
    #[serde(default)]
    messages: Vec<ZepMessage>,
}

#[derive(Deserialize)]
struct ZepSearchResult {
    message: Option<ZepMessage>,
    #[serde(default)]
    score: f64,
}

impl ZepMessage {
    fn into_stored(self, session_id: &str) -> StoredMessage {
        StoredMessage {
            id: self.uuid.unwrap_or_else(|| uuid::Uuid::now_v7().to_string()),
            session_id: session_id.to_string(),
            role: self
                .role_type
                .as_deref()
                .and_then(|r| r.parse().ok())
                .unwrap_or(Role::User),
            content: self.content,
            metadata: self.metadata.unwrap_or(serde_json::Value::Null),
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

impl ZepStore {
    pub fn new(config: &ZepConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("zep backend selected but ZEP_API_KEY is not set"))?;
        let base_url = Url::parse(&config.api_url)
            .map_err(|e| anyhow::anyhow!("invalid zep api_url {}: {e}", config.api_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("invalid zep api_url {}: not a base URL", config.api_url);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    /// `{base}/api/v2/{segments...}`, each segment percent-encoded on its own.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["api", "v2"]).extend(segments);
        }
        url
    }

    fn with_query(mut url: Url, key: &str, value: usize) -> Url {
        url.query_pairs_mut().append_pair(key, &value.to_string());
        url
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("Authorization", format!("Api-Key {}", self.api_key))
    }

    async fn check(resp: reqwest::Response) -> StoreResult<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status { status, body })
    }
}

#[async_trait]
impl MemoryStore for ZepStore {
    fn name(&self) -> &'static str {
        "zep"
    }

    async fn ensure_session(
        &self,
        session_id: &str,
        user_id: &str,
        metadata: serde_json::Value,
    ) -> StoreResult<()> {
        let resp = self
            .auth(self.client.get(self.endpoint(&["sessions", session_id])))
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status() != StatusCode::NOT_FOUND {
            Self::check(resp).await?;
        }

        let resp = self
            .auth(self.client.post(self.endpoint(&["sessions"])))
            .json(&json!({
                "session_id": session_id,
                "user_id": user_id,
                "metadata": metadata,
            }))
            .send()
            .await?;
        Self::check(resp).await?;
        tracing::info!(session = %session_id, "zep session created");
        Ok(())
    }

    async fn add_messages(&self, session_id: &str, messages: &[StoreMessage]) -> StoreResult<()> {
        let body: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                json!({
                    "role": m.role.as_str(),
                    "role_type": m.role.as_str(),
                    "content": m.content,
                    "metadata": m.metadata,
                })
            })
            .collect();
        let resp = self
            .auth(self.client.post(self.endpoint(&["sessions", session_id, "memory"])))
            .json(&json!({ "messages": body }))
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> StoreResult<Vec<StoredMessage>> {
        let url = Self::with_query(self.endpoint(&["sessions", session_id, "memory"]), "lastn", limit);
        let resp = self.auth(self.client.get(url)).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        let memory: ZepMemory = Self::check(resp).await?.json().await?;
        let mut messages: Vec<StoredMessage> = memory
            .messages
            .into_iter()
            .map(|m| m.into_stored(session_id))
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn search(&self, session_id: &str, query: &str, limit: usize) -> StoreResult<Vec<SearchHit>> {
        let url = Self::with_query(self.endpoint(&["sessions", session_id, "search"]), "limit", limit);
        let resp = self
            .auth(self.client.post(url))
            .json(&json!({ "text": query, "search_type": "similarity" }))
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let results: Vec<ZepSearchResult> = Self::check(resp).await?.json().await?;
        Ok(results
            .into_iter()
            .filter_map(|r| {
                r.message.map(|m| SearchHit {
                    message: m.into_stored(session_id),
                    score: r.score,
                })
            })
            .collect())
    }
}
