//! Memory engine: typed records over a session store, with a local cache and clusters.
//!
//! Records are routed by importance: high and critical go to the primary session
//! (`user_{id}_primary`), everything else to the working session (`user_{id}_working`).
//! Graph episodes behind each record are mirrored as system messages into
//! `graphiti_session_{id}`.
//! Without a store the engine runs in local mode and keeps everything in its cache.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cluster::{ClusterIndex, Placement};
use super::facts::{extract_facts, summarize};
use super::types::{Importance, MemoryCluster, MemoryContext, MemoryRecord, MemoryType};
use crate::config::MemoryConfig;
use crate::graph::{episode_sync_metadata, Episode, SharedGraph};
use crate::store::{MemoryStore, Role, StoreError, StoreMessage, StoredMessage};

const PREFERENCE_QUERY: &str = "preferences settings configuration";
const PREFERENCE_LOAD_LIMIT: usize = 20;
const PROMOTION_SCAN_LIMIT: usize = 50;

/// Store metadata keys owned by the engine; everything else is caller metadata.
const RESERVED_KEYS: &[&str] = &[
    "memory_id",
    "memory_type",
    "importance",
    "entities",
    "relationships",
    "facts",
    "summary",
    "created_at",
    "user_id",
    "session_id",
    "source",
    "confidence",
    "ttl_hours",
    "accessed_count",
];

/// Input to [`MemoryEngine::add_memory`].
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    /// Assistant reply stored alongside the content.
    pub response: Option<String>,
    pub memory_type: MemoryType,
    pub importance: Importance,
    pub metadata: Map<String, Value>,
    /// Already-extracted episode; skips a second graph pass over the same text.
    pub episode: Option<Episode>,
}

impl NewMemory {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            response: None,
            memory_type: MemoryType::Episodic,
            importance: Importance::Medium,
            metadata: Map::new(),
            episode: None,
        }
    }

    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = memory_type;
        self
    }

    pub fn importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn episode(mut self, episode: Episode) -> Self {
        self.episode = Some(episode);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MemoryCounters {
    pub memories_created: u64,
    pub memories_retrieved: u64,
    pub searches_performed: u64,
    pub clusters_formed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEngineStats {
    #[serde(flatten)]
    pub counters: MemoryCounters,
    pub cache_size: usize,
    pub clusters: usize,
    pub preferences: usize,
    pub last_consolidation: Option<DateTime<Utc>>,
    /// Store backend name, or `local` when running without one.
    pub backend: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationReport {
    pub promoted: usize,
    pub expired: usize,
    pub clusters_rescored: usize,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            _ => Err(format!("unknown export format: {s} (expected json or markdown)")),
        }
    }
}

#[derive(Default)]
struct EngineState {
    cache: HashMap<String, MemoryRecord>,
    clusters: ClusterIndex,
    preferences: BTreeMap<String, Value>,
    /// Working-session records already copied to the primary session.
    promoted: HashSet<String>,
    counters: MemoryCounters,
    last_consolidation: Option<DateTime<Utc>>,
}

pub struct MemoryEngine {
    user_id: String,
    primary_session: String,
    working_session: String,
    episode_session: String,
    config: MemoryConfig,
    store: Option<Arc<dyn MemoryStore>>,
    graph: Option<SharedGraph>,
    state: Mutex<EngineState>,
    consolidation: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryEngine {
    pub fn new(
        user_id: impl Into<String>,
        config: MemoryConfig,
        store: Option<Arc<dyn MemoryStore>>,
        graph: Option<SharedGraph>,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            primary_session: format!("user_{user_id}_primary"),
            working_session: format!("user_{user_id}_working"),
            episode_session: format!("graphiti_session_{user_id}"),
            user_id,
            config,
            store,
            graph,
            state: Mutex::new(EngineState::default()),
            consolidation: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn primary_session(&self) -> &str {
        &self.primary_session
    }

    pub fn working_session(&self) -> &str {
        &self.working_session
    }

    pub fn episode_session(&self) -> &str {
        &self.episode_session
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn is_local(&self) -> bool {
        self.store.is_none()
    }

    /// Ensure the sessions exist, warm the preference and working caches, and start
    /// periodic consolidation.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        info!(user = %self.user_id, "initializing memory engine");

        match &self.store {
            Some(store) => {
                for (session, kind) in [
                    (&self.primary_session, "primary"),
                    (&self.working_session, "working"),
                    (&self.episode_session, "graph_episodes"),
                ] {
                    store
                        .ensure_session(
                            session,
                            &self.user_id,
                            json!({
                                "user_id": self.user_id,
                                "type": kind,
                                "created_at": Utc::now(),
                            }),
                        )
                        .await
                        .with_context(|| format!("failed to ensure session {session}"))?;
                }
                self.load_preferences(store.as_ref()).await;
                self.load_working_memory(store.as_ref()).await;
            }
            None => warn!("no memory store configured, running in local mode"),
        }

        self.start_periodic_consolidation();
        info!(user = %self.user_id, backend = self.backend_name(), "memory engine initialized");
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.store.as_ref().map_or("local", |s| s.name())
    }

    async fn load_preferences(&self, store: &dyn MemoryStore) {
        let hits = match store
            .search(&self.primary_session, PREFERENCE_QUERY, PREFERENCE_LOAD_LIMIT)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "could not load preferences");
                return;
            }
        };

        let mut state = lock(&self.state);
        for hit in hits {
            let meta = &hit.message.metadata;
            if meta["memory_type"] != MemoryType::Preference.as_str() {
                continue;
            }
            if let Some(key) = meta["preference_key"].as_str() {
                state
                    .preferences
                    .insert(key.to_string(), meta["preference_value"].clone());
            }
        }
        info!(count = state.preferences.len(), "loaded user preferences");
    }

    async fn load_working_memory(&self, store: &dyn MemoryStore) {
        let messages = match store
            .recent_messages(&self.working_session, self.config.max_working_memory)
            .await
        {
            Ok(messages) => messages,
            Err(StoreError::SessionNotFound(_)) => return,
            Err(e) => {
                warn!(error = %e, "could not load working memory");
                return;
            }
        };

        let mut state = lock(&self.state);
        for record in messages.iter().filter_map(|m| self.record_from_message(m)) {
            state.cache.insert(record.id.clone(), record);
        }
        info!(count = state.cache.len(), "loaded working memories");
    }

    /// Pull up to `limit` recent records per session into the cache. Returns how many
    /// were not cached yet.
    pub async fn load_recent(&self, limit: usize) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let mut loaded = 0;
        for session in [&self.primary_session, &self.working_session] {
            let messages = match store.recent_messages(session, limit).await {
                Ok(messages) => messages,
                Err(StoreError::SessionNotFound(_)) => continue,
                Err(e) => {
                    return Err(anyhow::Error::new(e).context(format!("failed to load {session}")))
                }
            };
            let mut state = lock(&self.state);
            for record in messages.iter().filter_map(|m| self.record_from_message(m)) {
                if state.cache.insert(record.id.clone(), record).is_none() {
                    loaded += 1;
                }
            }
        }
        debug!(loaded, "loaded recent memories");
        Ok(loaded)
    }

    /// Build, persist, cache and cluster a new record.
    pub async fn add_memory(&self, new: NewMemory) -> Result<MemoryRecord> {
        let NewMemory {
            content,
            response,
            memory_type,
            importance,
            metadata,
            episode,
        } = new;

        let episode = match episode {
            Some(ep) => Some(ep),
            None => self.graph.as_ref().map(|graph| {
                lock(graph).ingest_episode(&content, "memory_engine", Value::Object(metadata.clone()))
            }),
        };
        let (entities, relations) = episode
            .as_ref()
            .map(|ep| (ep.entity_names(), ep.relation_triples()))
            .unwrap_or_default();

        let (facts, summary) = if self.config.auto_summarize {
            (extract_facts(&content), Some(summarize(&content)))
        } else {
            (Vec::new(), None)
        };

        let session_id = if importance.is_long_term() {
            &self.primary_session
        } else {
            &self.working_session
        };
        let now = Utc::now();

        let record = MemoryRecord {
            id: uuid::Uuid::now_v7().to_string(),
            context: MemoryContext {
                session_id: session_id.clone(),
                user_id: self.user_id.clone(),
                timestamp: now,
                source: metadata
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("direct")
                    .to_string(),
                confidence: metadata
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0),
                importance,
                memory_type,
                entities,
                relations,
                metadata,
                ttl_hours: (importance == Importance::Transient)
                    .then_some(self.config.transient_ttl_hours),
            },
            content,
            summary,
            facts,
            created_at: now,
            access_count: 0,
            last_accessed: None,
        };

        if let Some(store) = &self.store {
            let mut messages = vec![StoreMessage::new(
                Role::User,
                record.content.clone(),
                self.store_metadata(&record),
            )];
            if let Some(response) = response {
                messages.push(StoreMessage::new(
                    Role::Assistant,
                    response,
                    json!({ "memory_id": record.id }),
                ));
            }
            store
                .add_messages(&record.context.session_id, &messages)
                .await
                .with_context(|| format!("failed to persist memory {}", record.id))?;
            if let Some(ep) = &episode {
                self.mirror_episode(store.as_ref(), ep).await;
            }
        }

        let mut state = lock(&self.state);
        state.cache.insert(record.id.clone(), record.clone());
        if self.config.enable_clustering {
            if let Placement::Seeded(cluster) = state.clusters.assign(&record) {
                state.counters.clusters_formed += 1;
                debug!(cluster = %cluster, memory = %record.id, "cluster seeded");
            }
        }
        state.counters.memories_created += 1;
        drop(state);

        info!(
            memory = %record.id,
            memory_type = %record.context.memory_type,
            importance = %record.context.importance,
            entities = record.context.entities.len(),
            "memory created"
        );
        Ok(record)
    }

    /// Best effort: a failed mirror never fails the memory write.
    async fn mirror_episode(&self, store: &dyn MemoryStore, episode: &Episode) {
        let message = StoreMessage::new(
            Role::System,
            format!("Graph episode: {}", episode.content),
            episode_sync_metadata(episode),
        );
        match store.add_messages(&self.episode_session, &[message]).await {
            Ok(()) => debug!(episode = %episode.id, "graph episode mirrored"),
            Err(e) => warn!(episode = %episode.id, error = %e, "failed to mirror graph episode"),
        }
    }

    fn store_metadata(&self, record: &MemoryRecord) -> Value {
        let mut meta = record.context.metadata.clone();
        let owned = json!({
            "memory_id": record.id,
            "memory_type": record.context.memory_type,
            "importance": record.context.importance,
            "entities": record.context.entities,
            "relationships": record.context.relations,
            "facts": record.facts,
            "summary": record.summary,
            "created_at": record.created_at,
            "user_id": self.user_id,
            "session_id": record.context.session_id,
            "source": record.context.source,
            "confidence": record.context.confidence,
            "ttl_hours": record.context.ttl_hours,
            "accessed_count": record.access_count,
        });
        if let Value::Object(owned) = owned {
            meta.extend(owned);
        }
        Value::Object(meta)
    }

    /// Rebuild a record from a stored user message. Messages without a `memory_id`
    /// were not written by this engine and are skipped.
    fn record_from_message(&self, message: &StoredMessage) -> Option<MemoryRecord> {
        if message.role != Role::User {
            return None;
        }
        let meta = message.metadata.as_object()?;
        let id = meta.get("memory_id")?.as_str()?.to_string();

        let text = |key: &str| meta.get(key).and_then(Value::as_str);
        let list = |key: &str| -> Vec<String> {
            meta.get(key)
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default()
        };
        let created_at = text("created_at")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(message.created_at);

        Some(MemoryRecord {
            id,
            content: message.content.clone(),
            context: MemoryContext {
                session_id: text("session_id").unwrap_or(&message.session_id).to_string(),
                user_id: self.user_id.clone(),
                timestamp: created_at,
                source: text("source").unwrap_or("store").to_string(),
                confidence: meta.get("confidence").and_then(Value::as_f64).unwrap_or(1.0),
                importance: text("importance")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(Importance::Medium),
                memory_type: text("memory_type")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(MemoryType::Episodic),
                entities: list("entities"),
                relations: meta
                    .get("relationships")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                metadata: meta
                    .iter()
                    .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ttl_hours: meta.get("ttl_hours").and_then(Value::as_f64),
            },
            summary: text("summary").map(String::from),
            facts: list("facts"),
            created_at,
            access_count: meta
                .get("accessed_count")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            last_accessed: None,
        })
    }

    /// Cache first; on a miss, query both sessions in the store.
    pub async fn search_memories(
        &self,
        query: &str,
        types: &[MemoryType],
        limit: usize,
        min_score: f64,
    ) -> Vec<MemoryRecord> {
        let type_ok = |r: &MemoryRecord| types.is_empty() || types.contains(&r.context.memory_type);

        {
            let mut state = lock(&self.state);
            state.counters.searches_performed += 1;

            let cached = search_cache(&state.cache, query, &type_ok, limit);
            if !cached.is_empty() {
                state.counters.cache_hits += 1;
                debug!(query, hits = cached.len(), "memory cache hit");
                return cached;
            }
            state.counters.cache_misses += 1;
        }

        let Some(store) = &self.store else {
            return Vec::new();
        };

        let mut results: Vec<MemoryRecord> = Vec::new();
        for session in [&self.primary_session, &self.working_session] {
            let hits = match store.search(session, query, limit).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(session = %session, error = %e, "memory search failed");
                    continue;
                }
            };
            for hit in hits.into_iter().filter(|h| h.score >= min_score) {
                let Some(mut record) = self.record_from_message(&hit.message) else {
                    continue;
                };
                if !type_ok(&record) || results.iter().any(|r| r.id == record.id) {
                    continue;
                }
                record.touch();
                results.push(record);
            }
        }

        results.sort_by(|a, b| b.relevance_now().total_cmp(&a.relevance_now()));
        results.truncate(limit);

        let mut state = lock(&self.state);
        for record in &results {
            state.cache.insert(record.id.clone(), record.clone());
        }
        state.counters.memories_retrieved += results.len() as u64;
        results
    }

    pub fn get(&self, memory_id: &str) -> Option<MemoryRecord> {
        lock(&self.state).cache.get(memory_id).cloned()
    }

    pub fn get_user_preferences(&self) -> BTreeMap<String, Value> {
        lock(&self.state).preferences.clone()
    }

    /// Record a preference in the cache and as a high-importance memory.
    pub async fn update_preference(
        &self,
        key: &str,
        value: Value,
        category: Option<&str>,
    ) -> Result<MemoryRecord> {
        lock(&self.state)
            .preferences
            .insert(key.to_string(), value.clone());

        let shown = match &value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let mut metadata = Map::new();
        metadata.insert("preference_key".into(), key.into());
        metadata.insert("preference_value".into(), value);
        metadata.insert("category".into(), category.unwrap_or("general").into());

        let record = self
            .add_memory(
                NewMemory::new(format!("User preference: {key} = {shown}"))
                    .memory_type(MemoryType::Preference)
                    .importance(Importance::High)
                    .metadata(metadata),
            )
            .await?;
        info!(key, value = %shown, "preference updated");
        Ok(record)
    }

    pub async fn update_behavior_patterns(&self, pattern: Map<String, Value>) -> Result<MemoryRecord> {
        let content = format!("Behavioral pattern: {}", Value::Object(pattern.clone()));
        self.add_memory(
            NewMemory::new(content)
                .memory_type(MemoryType::Behavioral)
                .importance(Importance::Medium)
                .metadata(pattern),
        )
        .await
    }

    /// Promote long-term records to the primary session, drop expired records and
    /// rescore clusters.
    pub async fn consolidate(&self) -> ConsolidationReport {
        info!("starting memory consolidation");
        let mut promoted = 0;

        if let Some(store) = &self.store {
            let candidates = match store
                .recent_messages(&self.working_session, PROMOTION_SCAN_LIMIT)
                .await
            {
                Ok(messages) => messages,
                Err(StoreError::SessionNotFound(_)) => Vec::new(),
                Err(e) => {
                    warn!(error = %e, "could not read working session");
                    Vec::new()
                }
            };

            for message in candidates {
                let Some(mut record) = self.record_from_message(&message) else {
                    continue;
                };
                if !record.context.importance.is_long_term()
                    || lock(&self.state).promoted.contains(&record.id)
                {
                    continue;
                }
                record.context.session_id = self.primary_session.clone();
                let copy = StoreMessage::new(Role::User, record.content.clone(), self.store_metadata(&record));
                if let Err(e) = store.add_messages(&self.primary_session, &[copy]).await {
                    warn!(memory = %record.id, error = %e, "promotion failed");
                    continue;
                }
                let mut state = lock(&self.state);
                state.promoted.insert(record.id.clone());
                if let Some(cached) = state.cache.get_mut(&record.id) {
                    cached.context.session_id = self.primary_session.clone();
                }
                promoted += 1;
            }
        }

        let now = Utc::now();
        let mut state = lock(&self.state);

        if self.store.is_none() {
            for record in state.cache.values_mut() {
                if record.context.session_id == self.working_session
                    && record.context.importance.is_long_term()
                {
                    record.context.session_id = self.primary_session.clone();
                    promoted += 1;
                }
            }
        }

        let before = state.cache.len();
        state.cache.retain(|_, record| !record.is_expired(now));
        let expired = before - state.cache.len();

        let clusters_rescored = if self.config.enable_clustering {
            state.clusters.rescore()
        } else {
            0
        };
        state.last_consolidation = Some(now);

        info!(promoted, expired, clusters_rescored, "consolidation complete");
        ConsolidationReport {
            promoted,
            expired,
            clusters_rescored,
            at: now,
        }
    }

    /// Run [`consolidate`](Self::consolidate) every `consolidation_hours` until
    /// [`shutdown`](Self::shutdown) or the engine is dropped.
    pub fn start_periodic_consolidation(self: &Arc<Self>) {
        let hours = self.config.consolidation_hours;
        if hours == 0 {
            return;
        }
        let engine = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(hours * 3600));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else { break };
                engine.consolidate().await;
            }
        });
        if let Some(previous) = lock(&self.consolidation).replace(handle) {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.consolidation).take() {
            handle.abort();
            debug!("periodic consolidation stopped");
        }
    }

    /// Write the engine counters to the `stats_{user}` session. Returns `false` in
    /// local mode.
    pub async fn sync_to_cloud(&self) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        let stats = serde_json::to_string(&self.stats())?;
        store
            .add_messages(
                &format!("stats_{}", self.user_id),
                &[StoreMessage::new(
                    Role::System,
                    format!("Memory engine stats: {stats}"),
                    json!({ "timestamp": Utc::now(), "type": "stats" }),
                )],
            )
            .await
            .context("failed to sync memory stats")?;
        info!("memory stats synced");
        Ok(true)
    }

    /// Cached records inside `[start, end]`, oldest first.
    pub fn memory_timeline(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        types: &[MemoryType],
    ) -> Vec<MemoryRecord> {
        let state = lock(&self.state);
        let mut records: Vec<MemoryRecord> = state
            .cache
            .values()
            .filter(|r| start.map_or(true, |s| r.created_at >= s))
            .filter(|r| end.map_or(true, |e| r.created_at <= e))
            .filter(|r| types.is_empty() || types.contains(&r.context.memory_type))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    pub fn export(&self, format: ExportFormat) -> Result<String> {
        let records = self.memory_timeline(None, None, &[]);
        match format {
            ExportFormat::Json => {
                let rows: Vec<Value> = records
                    .iter()
                    .map(|r| {
                        json!({
                            "id": r.id,
                            "content": r.content,
                            "type": r.context.memory_type,
                            "importance": r.context.importance,
                            "created": r.created_at,
                            "entities": r.context.entities,
                            "facts": r.facts,
                        })
                    })
                    .collect();
                Ok(serde_json::to_string_pretty(&rows)?)
            }
            ExportFormat::Markdown => {
                let mut md = String::from("# Personal Memories Export\n\n");
                for r in &records {
                    md.push_str(&format!("## {}\n", r.created_at.to_rfc3339()));
                    md.push_str(&format!(
                        "**Type**: {} | **Importance**: {}\n\n",
                        r.context.memory_type, r.context.importance
                    ));
                    md.push_str(&format!("{}\n\n", r.content));
                    if !r.context.entities.is_empty() {
                        md.push_str(&format!("**Entities**: {}\n", r.context.entities.join(", ")));
                    }
                    if !r.facts.is_empty() {
                        md.push_str("**Facts**:\n");
                        for fact in &r.facts {
                            md.push_str(&format!("- {fact}\n"));
                        }
                    }
                    md.push_str("\n---\n\n");
                }
                Ok(md)
            }
        }
    }

    pub fn clusters(&self) -> Vec<MemoryCluster> {
        lock(&self.state).clusters.clusters().to_vec()
    }

    pub fn stats(&self) -> MemoryEngineStats {
        let state = lock(&self.state);
        MemoryEngineStats {
            counters: state.counters.clone(),
            cache_size: state.cache.len(),
            clusters: state.clusters.len(),
            preferences: state.preferences.len(),
            last_consolidation: state.last_consolidation,
            backend: self.backend_name().to_string(),
        }
    }
}

impl Drop for MemoryEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Case-insensitive substring match on content or entity names, most relevant first.
fn search_cache(
    cache: &HashMap<String, MemoryRecord>,
    query: &str,
    type_ok: &dyn Fn(&MemoryRecord) -> bool,
    limit: usize,
) -> Vec<MemoryRecord> {
    let needle = query.to_lowercase();
    let mut hits: Vec<MemoryRecord> = cache
        .values()
        .filter(|r| type_ok(r))
        .filter(|r| {
            r.content.to_lowercase().contains(&needle)
                || r.context
                    .entities
                    .iter()
                    .any(|e| e.to_lowercase().contains(&needle))
        })
        .cloned()
        .collect();
    hits.sort_by(|a, b| b.relevance_now().total_cmp(&a.relevance_now()));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphEngine;
    use crate::store::SqliteStore;

    fn local_engine() -> MemoryEngine {
        MemoryEngine::new("u1", MemoryConfig::default(), None, None)
    }

    fn stored_engine(store: Arc<SqliteStore>) -> Arc<MemoryEngine> {
        let graph = Arc::new(Mutex::new(GraphEngine::new("u1")));
        Arc::new(MemoryEngine::new(
            "u1",
            MemoryConfig::default(),
            Some(store),
            Some(graph),
        ))
    }

    #[tokio::test]
    async fn routes_by_importance() {
        let engine = local_engine();
        let high = engine
            .add_memory(NewMemory::new("Deploy keys rotate monthly").importance(Importance::High))
            .await
            .unwrap();
        let low = engine
            .add_memory(NewMemory::new("Lunch was fine").importance(Importance::Low))
            .await
            .unwrap();
        let transient = engine
            .add_memory(NewMemory::new("Meeting room B").importance(Importance::Transient))
            .await
            .unwrap();

        assert_eq!(high.context.session_id, "user_u1_primary");
        assert_eq!(low.context.session_id, "user_u1_working");
        assert_eq!(transient.context.ttl_hours, Some(24.0));
        assert_eq!(high.context.ttl_hours, None);
    }

    #[tokio::test]
    async fn add_memory_uses_graph_and_summaries() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = stored_engine(store.clone());
        let record = engine
            .add_memory(NewMemory::new("Marie Dupont is working on Atlas").response("Noted"))
            .await
            .unwrap();

        assert!(record.context.entities.contains(&"Marie Dupont".to_string()));
        assert_eq!(record.context.relations[0].1, "works_on");
        assert_eq!(record.facts, vec!["Marie Dupont is working on Atlas"]);
        assert_eq!(record.summary.as_deref(), Some("Marie Dupont is working on Atlas"));

        let stored = store.recent_messages("user_u1_working", 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        let user = stored.iter().find(|m| m.role == Role::User).unwrap();
        assert_eq!(user.metadata["memory_id"], record.id.as_str());
        assert_eq!(user.metadata["importance"], "medium");
    }

    #[tokio::test]
    async fn graph_episodes_are_mirrored() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = stored_engine(store.clone());
        engine
            .add_memory(NewMemory::new("Marie Dupont is working on Atlas"))
            .await
            .unwrap();

        let mirrored = store.recent_messages("graphiti_session_u1", 10).await.unwrap();
        assert_eq!(mirrored.len(), 1);
        assert_eq!(mirrored[0].role, Role::System);
        assert_eq!(mirrored[0].content, "Graph episode: Marie Dupont is working on Atlas");
        assert_eq!(mirrored[0].metadata["source"], "memory_engine");
        assert_eq!(mirrored[0].metadata["graph_processed"], true);
        assert!(mirrored[0].metadata["episode_id"].is_string());
        assert!(mirrored[0].metadata["entities_count"].as_u64().unwrap() >= 2);

        // no graph, nothing to mirror
        let plain = Arc::new(MemoryEngine::new(
            "u2",
            MemoryConfig::default(),
            Some(store.clone()),
            None,
        ));
        plain.add_memory(NewMemory::new("hello")).await.unwrap();
        assert!(matches!(
            store.recent_messages("graphiti_session_u2", 10).await,
            Err(StoreError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn load_recent_restores_both_sessions() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let writer = stored_engine(store.clone());
        writer
            .add_memory(NewMemory::new("Deploy keys rotate monthly").importance(Importance::High))
            .await
            .unwrap();
        writer
            .add_memory(NewMemory::new("Lunch was fine").importance(Importance::Low))
            .await
            .unwrap();

        let reader = stored_engine(store);
        assert_eq!(reader.load_recent(10).await.unwrap(), 2);
        assert_eq!(reader.load_recent(10).await.unwrap(), 0);
        assert_eq!(reader.stats().cache_size, 2);
        assert_eq!(local_engine().load_recent(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn cache_search_matches_content_and_entities() {
        let engine = stored_engine(Arc::new(SqliteStore::in_memory().unwrap()));
        engine
            .add_memory(NewMemory::new("Marie Dupont is working on Atlas"))
            .await
            .unwrap();
        engine
            .add_memory(NewMemory::new("grocery list").memory_type(MemoryType::Working))
            .await
            .unwrap();

        let hits = engine.search_memories("ATLAS", &[], 5, 0.5).await;
        assert_eq!(hits.len(), 1);
        let hits = engine
            .search_memories("grocery", &[MemoryType::Episodic], 5, 0.5)
            .await;
        assert!(hits.is_empty());

        let stats = engine.stats();
        assert_eq!(stats.counters.cache_hits, 1);
        assert_eq!(stats.counters.cache_misses, 1);
        assert_eq!(stats.counters.searches_performed, 2);
    }

    #[tokio::test]
    async fn store_search_fills_cache_on_miss() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let writer = stored_engine(store.clone());
            writer
                .add_memory(NewMemory::new("The staging cluster runs on kubernetes").importance(Importance::High))
                .await
                .unwrap();
        }

        let reader = stored_engine(store);
        let hits = reader.search_memories("kubernetes", &[], 5, 0.5).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].context.importance, Importance::High);
        assert_eq!(hits[0].access_count, 1);
        assert!(reader.get(&hits[0].id).is_some());
        assert_eq!(reader.stats().counters.memories_retrieved, 1);
    }

    #[tokio::test]
    async fn preferences_reload_on_initialize() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        {
            let writer = stored_engine(store.clone());
            writer.initialize().await.unwrap();
            writer
                .update_preference("theme", json!("dark"), Some("ui"))
                .await
                .unwrap();
            writer.shutdown();
        }

        let reader = stored_engine(store);
        reader.initialize().await.unwrap();
        assert_eq!(reader.get_user_preferences()["theme"], "dark");
        reader.shutdown();
    }

    #[tokio::test]
    async fn consolidation_promotes_and_expires() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = stored_engine(store.clone());

        // A long-term record that landed in the working session.
        let mut meta = Map::new();
        meta.insert("memory_id".into(), "legacy".into());
        meta.insert("importance".into(), "critical".into());
        store
            .add_messages(
                "user_u1_working",
                &[StoreMessage::new(Role::User, "Passport number on file", Value::Object(meta))],
            )
            .await
            .unwrap();

        let transient = engine
            .add_memory(NewMemory::new("Parking spot 12").importance(Importance::Transient))
            .await
            .unwrap();
        {
            let mut state = lock(&engine.state);
            state.cache.get_mut(&transient.id).unwrap().created_at =
                Utc::now() - chrono::Duration::hours(30);
        }

        let report = engine.consolidate().await;
        assert_eq!(report.promoted, 1);
        assert_eq!(report.expired, 1);
        assert!(engine.get(&transient.id).is_none());

        let primary = store.recent_messages("user_u1_primary", 10).await.unwrap();
        assert_eq!(primary[0].content, "Passport number on file");

        // Already promoted records are not copied twice.
        assert_eq!(engine.consolidate().await.promoted, 0);
    }

    #[tokio::test]
    async fn clusters_rescored_at_consolidation() {
        let engine = stored_engine(Arc::new(SqliteStore::in_memory().unwrap()));
        engine
            .add_memory(NewMemory::new("Status update, working on Atlas"))
            .await
            .unwrap();
        engine
            .add_memory(NewMemory::new("projet Atlas, review done"))
            .await
            .unwrap();

        let clusters = engine.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].memory_ids.len(), 2);

        engine.consolidate().await;
        assert!((engine.clusters()[0].importance - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn timeline_and_export() {
        let engine = local_engine();
        engine
            .add_memory(NewMemory::new("Alice prefers tea").memory_type(MemoryType::Preference))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        engine.add_memory(NewMemory::new("Standup notes")).await.unwrap();

        let prefs = engine.memory_timeline(None, None, &[MemoryType::Preference]);
        assert_eq!(prefs.len(), 1);
        let all = engine.memory_timeline(None, None, &[]);
        assert_eq!(all[0].content, "Alice prefers tea");
        assert!(engine
            .memory_timeline(Some(Utc::now() + chrono::Duration::hours(1)), None, &[])
            .is_empty());

        let parsed: Vec<Value> = serde_json::from_str(&engine.export(ExportFormat::Json).unwrap()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["type"], "preference");

        let md = engine.export(ExportFormat::Markdown).unwrap();
        assert!(md.starts_with("# Personal Memories Export"));
        assert!(md.contains("**Facts**:\n- Alice prefers tea"));
    }

    #[tokio::test]
    async fn local_mode_sync_is_a_noop() {
        let engine = local_engine();
        assert!(!engine.sync_to_cloud().await.unwrap());
        assert_eq!(engine.stats().backend, "local");
    }

    #[tokio::test]
    async fn sync_writes_stats_session() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let engine = stored_engine(store.clone());
        assert!(engine.sync_to_cloud().await.unwrap());
        let msgs = store.recent_messages("stats_u1", 1).await.unwrap();
        assert!(msgs[0].content.starts_with("Memory engine stats: "));
        assert_eq!(msgs[0].role, Role::System);
    }

    #[test]
    fn export_format_parses() {
        assert_eq!("md".parse::<ExportFormat>().unwrap(), ExportFormat::Markdown);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
