//! Notion → memory bridge.
//!
//! Works on pages that have already been fetched (for example a JSON export). Each
//! page is classified, run through the graph, and written to the memory engine with
//! a type and importance derived from the page.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::config::NotionConfig;
use crate::graph::SharedGraph;
use crate::memory::{Importance, MemoryEngine, MemoryType, NewMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotionPageType {
    DatabaseEntry,
    Document,
    Task,
    MeetingNotes,
    Project,
    Person,
    Resource,
    #[default]
    Unknown,
}

/// Classification keywords, in tie-break order.
const PAGE_TYPE_KEYWORDS: &[(NotionPageType, &[&str])] = &[
    (
        NotionPageType::Task,
        &[
            "todo", "task", "tâche", "à faire", "deadline", "due", "assignee", "priority",
            "status", "done", "completed",
        ],
    ),
    (
        NotionPageType::MeetingNotes,
        &[
            "meeting", "réunion", "notes", "agenda", "participants", "action items",
            "decisions", "minutes",
        ],
    ),
    (
        NotionPageType::Project,
        &[
            "project", "projet", "roadmap", "milestone", "sprint", "timeline", "deliverable",
            "scope",
        ],
    ),
    (
        NotionPageType::Person,
        &[
            "contact", "person", "personne", "team member", "profile", "role", "email",
            "phone", "skills",
        ],
    ),
    (
        NotionPageType::Resource,
        &[
            "resource", "link", "reference", "documentation", "guide", "tutorial", "bookmark",
            "tools",
        ],
    ),
];

impl NotionPageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DatabaseEntry => "database_entry",
            Self::Document => "document",
            Self::Task => "task",
            Self::MeetingNotes => "meeting_notes",
            Self::Project => "project",
            Self::Person => "person",
            Self::Resource => "resource",
            Self::Unknown => "unknown",
        }
    }

    /// Memory type a page of this kind is stored as.
    pub fn memory_type(&self) -> MemoryType {
        match self {
            Self::Task | Self::Project => MemoryType::Working,
            Self::MeetingNotes | Self::Unknown => MemoryType::Episodic,
            Self::Person | Self::Resource | Self::Document | Self::DatabaseEntry => {
                MemoryType::Semantic
            }
        }
    }
}

impl std::fmt::Display for NotionPageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotionPageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            Self::DatabaseEntry,
            Self::Document,
            Self::Task,
            Self::MeetingNotes,
            Self::Project,
            Self::Person,
            Self::Resource,
            Self::Unknown,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
        .ok_or_else(|| format!("unknown page type: {s}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionPage {
    pub page_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub page_type: NotionPageType,
    #[serde(default = "Utc::now")]
    pub last_edited: DateTime<Utc>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub database_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

impl NotionPage {
    pub fn new(page_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            page_id: page_id.into(),
            title: title.into(),
            content: content.into(),
            page_type: NotionPageType::Unknown,
            last_edited: Utc::now(),
            properties: Map::new(),
            tags: Vec::new(),
            mentions: Vec::new(),
            database_id: None,
            parent_id: None,
            url: None,
        }
    }
}

/// Highest keyword score wins; ties go to the earlier type. No hits means document.
pub fn classify_page(page: &NotionPage) -> NotionPageType {
    let text = format!("{} {}", page.title, page.content).to_lowercase();
    let mut best = (NotionPageType::Document, 0);
    for (page_type, keywords) in PAGE_TYPE_KEYWORDS {
        let score = keywords.iter().filter(|k| text.contains(*k)).count();
        if score > best.1 {
            best = (*page_type, score);
        }
    }
    best.0
}

/// Recency, length, kind, mentions and tags add up to a score bucketed into
/// high (≥ 5), medium (≥ 3) or low.
pub fn page_importance(page: &NotionPage, now: DateTime<Utc>) -> Importance {
    let mut score = 0.0;

    score += match (now - page.last_edited).num_days() {
        d if d < 1 => 3.0,
        d if d < 7 => 2.0,
        d if d < 30 => 1.0,
        _ => 0.0,
    };

    let len = page.content.chars().count();
    if len > 1000 {
        score += 2.0;
    } else if len > 500 {
        score += 1.0;
    }

    score += match page.page_type {
        NotionPageType::Task | NotionPageType::Project => 2.0,
        NotionPageType::MeetingNotes => 1.0,
        _ => 0.0,
    };

    score += page.mentions.len() as f64 * 0.5;
    score += page.tags.len() as f64 * 0.3;

    if score >= 5.0 {
        Importance::High
    } else if score >= 3.0 {
        Importance::Medium
    } else {
        Importance::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub status: SyncStatus,
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub entities_extracted: usize,
    pub memories_created: usize,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
    pub last_sync: DateTime<Utc>,
}

impl SyncResult {
    fn new(status: SyncStatus) -> Self {
        Self {
            status,
            pages_processed: 0,
            pages_skipped: 0,
            entities_extracted: 0,
            memories_created: 0,
            errors: Vec::new(),
            duration_seconds: 0.0,
            last_sync: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotionSyncStats {
    pub total_syncs: u64,
    pub pages_synced: u64,
    pub entities_extracted: u64,
    pub memories_created: u64,
    pub sync_errors: u64,
    pub last_sync_duration: f64,
    pub sync_in_progress: bool,
    pub last_sync: Option<DateTime<Utc>>,
    pub pages_cached: usize,
    pub sync_history_count: usize,
}

#[derive(Default)]
struct BridgeState {
    pages: HashMap<String, NotionPage>,
    history: VecDeque<SyncResult>,
    stats: NotionSyncStats,
}

pub struct NotionBridge {
    user_id: String,
    config: NotionConfig,
    memory: Option<Arc<MemoryEngine>>,
    graph: Option<SharedGraph>,
    state: Mutex<BridgeState>,
    syncing: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl NotionBridge {
    pub fn new(
        user_id: impl Into<String>,
        config: NotionConfig,
        memory: Option<Arc<MemoryEngine>>,
        graph: Option<SharedGraph>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            memory,
            graph,
            state: Mutex::new(BridgeState::default()),
            syncing: AtomicBool::new(false),
        }
    }

    /// Sync up to `max_pages_per_sync` pages. A second sync while one is running is
    /// rejected with a failed result.
    pub async fn sync_pages(&self, pages: Vec<NotionPage>) -> SyncResult {
        if self.syncing.swap(true, Ordering::SeqCst) {
            let mut result = SyncResult::new(SyncStatus::Failed);
            result.errors.push("Sync already in progress".into());
            return result;
        }

        let started = Instant::now();
        info!(pages = pages.len(), "starting Notion sync");
        let mut result = SyncResult::new(SyncStatus::InProgress);

        for mut page in pages.into_iter().take(self.config.max_pages_per_sync) {
            if page.content.chars().count() < self.config.min_content_length {
                debug!(page = %page.page_id, "skipping short page");
                result.pages_skipped += 1;
                continue;
            }
            page.page_type = classify_page(&page);

            match self.sync_page(&page).await {
                Ok(entities) => {
                    result.entities_extracted += entities;
                    if self.memory.is_some() {
                        result.memories_created += 1;
                    }
                    debug!(page = %page.title, page_type = %page.page_type, "synced page");
                    lock(&self.state).pages.insert(page.page_id.clone(), page);
                    result.pages_processed += 1;
                }
                Err(e) => {
                    let message = format!("Error processing page {}: {e:#}", page.page_id);
                    error!("{message}");
                    result.errors.push(message);
                }
            }
        }

        result.duration_seconds = started.elapsed().as_secs_f64();
        result.last_sync = Utc::now();
        result.status = match (result.errors.is_empty(), result.pages_processed) {
            (true, _) => SyncStatus::Completed,
            (false, 0) => SyncStatus::Failed,
            (false, _) => SyncStatus::Partial,
        };

        {
            let mut state = lock(&self.state);
            let stats = &mut state.stats;
            stats.total_syncs += 1;
            stats.pages_synced += result.pages_processed as u64;
            stats.entities_extracted += result.entities_extracted as u64;
            stats.memories_created += result.memories_created as u64;
            stats.sync_errors += result.errors.len() as u64;
            stats.last_sync_duration = result.duration_seconds;
            stats.last_sync = Some(result.last_sync);

            state.history.push_back(result.clone());
            while state.history.len() > self.config.history_size {
                state.history.pop_front();
            }
        }
        self.syncing.store(false, Ordering::SeqCst);

        info!(
            pages = result.pages_processed,
            entities = result.entities_extracted,
            memories = result.memories_created,
            errors = result.errors.len(),
            duration = result.duration_seconds,
            "Notion sync completed"
        );
        result
    }

    /// Graph ingestion and memory write for one page. Returns the entity count.
    async fn sync_page(&self, page: &NotionPage) -> Result<usize> {
        let episode = self.graph.as_ref().map(|graph| {
            lock(graph).ingest_episode(
                &format!("Notion: {}\n\n{}", page.title, page.content),
                "notion",
                json!({
                    "page_id": page.page_id,
                    "page_type": page.page_type,
                    "url": page.url,
                    "properties": page.properties,
                }),
            )
        });
        let entity_names = episode
            .as_ref()
            .map(|e| e.entity_names())
            .unwrap_or_default();

        if let Some(memory) = &self.memory {
            let mut metadata = Map::new();
            metadata.insert("source".into(), "notion_bridge".into());
            metadata.insert("page_id".into(), page.page_id.clone().into());
            metadata.insert("page_type".into(), page.page_type.as_str().into());
            metadata.insert("url".into(), page.url.clone().into());
            metadata.insert("entities".into(), entity_names.clone().into());
            metadata.insert("properties".into(), Value::Object(page.properties.clone()));
            metadata.insert("last_edited".into(), page.last_edited.to_rfc3339().into());

            let mut new = NewMemory::new(format!(
                "[{}] {}: {}",
                page.page_type.as_str().to_uppercase(),
                page.title,
                page.content
            ))
            .response(format!(
                "Notion page '{}' synced with {} entities extracted",
                page.title,
                entity_names.len()
            ))
            .memory_type(page.page_type.memory_type())
            .importance(page_importance(page, Utc::now()))
            .metadata(metadata);
            if let Some(episode) = episode {
                new = new.episode(episode);
            }
            memory.add_memory(new).await?;
        }
        Ok(entity_names.len())
    }

    /// Cached pages containing `query` in title or content; title hits first, then
    /// most recently edited.
    pub fn search(&self, query: &str, types: &[NotionPageType], limit: usize) -> Vec<NotionPage> {
        let q = query.to_lowercase();
        let state = lock(&self.state);
        let mut hits: Vec<(bool, NotionPage)> = state
            .pages
            .values()
            .filter(|p| types.is_empty() || types.contains(&p.page_type))
            .filter_map(|p| {
                let in_title = p.title.to_lowercase().contains(&q);
                (in_title || p.content.to_lowercase().contains(&q)).then(|| (in_title, p.clone()))
            })
            .collect();
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.last_edited.cmp(&a.1.last_edited)));
        hits.into_iter().take(limit).map(|(_, p)| p).collect()
    }

    pub fn sync_stats(&self) -> NotionSyncStats {
        let state = lock(&self.state);
        NotionSyncStats {
            sync_in_progress: self.syncing.load(Ordering::SeqCst),
            pages_cached: state.pages.len(),
            sync_history_count: state.history.len(),
            ..state.stats.clone()
        }
    }

    /// Most recent `limit` results, oldest first.
    pub fn recent_results(&self, limit: usize) -> Vec<SyncResult> {
        let state = lock(&self.state);
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn export_cache(&self) -> Result<String> {
        let state = lock(&self.state);
        let mut pages: Vec<&NotionPage> = state.pages.values().collect();
        pages.sort_by(|a, b| a.page_id.cmp(&b.page_id));
        let export = json!({
            "export_date": Utc::now(),
            "user_id": self.user_id,
            "total_pages": pages.len(),
            "pages": pages,
        });
        Ok(serde_json::to_string_pretty(&export)?)
    }
}

/// Read pages from a JSON file: either a bare array or an export with a `pages` key.
pub fn load_pages(path: impl AsRef<Path>) -> Result<Vec<NotionPage>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    let pages = match value {
        Value::Object(mut obj) => obj.remove("pages").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    serde_json::from_value(pages).with_context(|| format!("invalid page list in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::graph::GraphEngine;
    use chrono::Duration;

    const MEETING: &str = "Weekly meeting with Sophie Martin. Agenda: roadmap review. \
                           Participants agreed on action items for the sprint.";

    fn bridge() -> NotionBridge {
        let graph: SharedGraph = Arc::new(Mutex::new(GraphEngine::new("ada")));
        let memory = Arc::new(MemoryEngine::new(
            "ada",
            MemoryConfig::default(),
            None,
            Some(graph.clone()),
        ));
        NotionBridge::new("ada", NotionConfig::default(), Some(memory), Some(graph))
    }

    #[test]
    fn classification_scores_keywords() {
        let page = NotionPage::new("p1", "Team sync", MEETING);
        assert_eq!(classify_page(&page), NotionPageType::MeetingNotes);

        let plain = NotionPage::new("p2", "Poem", "Roses are red, violets are blue");
        assert_eq!(classify_page(&plain), NotionPageType::Document);

        // One hit each: task comes first.
        let tie = NotionPage::new("p3", "x", "deadline and agenda");
        assert_eq!(classify_page(&tie), NotionPageType::Task);
    }

    #[test]
    fn importance_buckets() {
        let now = Utc::now();
        let mut page = NotionPage::new("p", "t", "short");
        page.page_type = NotionPageType::Task;
        assert_eq!(page_importance(&page, now), Importance::High);

        page.last_edited = now - Duration::days(3);
        assert_eq!(page_importance(&page, now), Importance::Medium);

        page.page_type = NotionPageType::Document;
        page.last_edited = now - Duration::days(90);
        assert_eq!(page_importance(&page, now), Importance::Low);

        page.mentions = vec!["a".into(); 6];
        assert_eq!(page_importance(&page, now), Importance::Medium);
    }

    #[test]
    fn page_type_memory_mapping() {
        assert_eq!(NotionPageType::Task.memory_type(), MemoryType::Working);
        assert_eq!(NotionPageType::MeetingNotes.memory_type(), MemoryType::Episodic);
        assert_eq!(NotionPageType::Resource.memory_type(), MemoryType::Semantic);
        assert_eq!("meeting_notes".parse::<NotionPageType>().unwrap(), NotionPageType::MeetingNotes);
    }

    #[tokio::test]
    async fn sync_ingests_and_caches() {
        let bridge = bridge();
        let pages = vec![
            NotionPage::new("m1", "Team sync", MEETING),
            NotionPage::new("s1", "Stub", "too short"),
        ];
        let result = bridge.sync_pages(pages).await;

        assert_eq!(result.status, SyncStatus::Completed);
        assert_eq!(result.pages_processed, 1);
        assert_eq!(result.pages_skipped, 1);
        assert_eq!(result.memories_created, 1);
        assert!(result.entities_extracted >= 1);

        let hits = bridge.search("sophie", &[], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].page_type, NotionPageType::MeetingNotes);
        assert!(bridge.search("sophie", &[NotionPageType::Task], 10).is_empty());

        let memory = bridge.memory.as_ref().unwrap();
        let records = memory.memory_timeline(None, None, &[MemoryType::Episodic]);
        assert!(records[0].content.starts_with("[MEETING_NOTES] Team sync:"));
        assert_eq!(records[0].context.metadata["source"], "notion_bridge");

        let stats = bridge.sync_stats();
        assert_eq!(stats.total_syncs, 1);
        assert_eq!(stats.pages_cached, 1);
        assert!(!stats.sync_in_progress);
    }

    #[tokio::test]
    async fn search_prefers_title_hits() {
        let bridge = bridge();
        let mut older = NotionPage::new("a", "Roadmap", MEETING);
        older.last_edited = Utc::now() - Duration::days(10);
        let newer = NotionPage::new("b", "Notes", format!("{MEETING} The roadmap is final."));
        bridge.sync_pages(vec![newer, older]).await;

        let hits = bridge.search("roadmap", &[], 10);
        assert_eq!(hits[0].page_id, "a");
        assert_eq!(hits[1].page_id, "b");
        assert_eq!(bridge.search("roadmap", &[], 1).len(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bridge = bridge();
        for _ in 0..12 {
            bridge.sync_pages(Vec::new()).await;
        }
        assert_eq!(bridge.sync_stats().sync_history_count, 10);
        assert_eq!(bridge.recent_results(3).len(), 3);
        assert_eq!(bridge.recent_results(50).len(), 10);
    }

    #[tokio::test]
    async fn concurrent_sync_is_rejected() {
        let bridge = bridge();
        bridge.syncing.store(true, Ordering::SeqCst);
        let result = bridge.sync_pages(vec![NotionPage::new("m", "t", MEETING)]).await;
        assert_eq!(result.status, SyncStatus::Failed);
        assert_eq!(result.errors, vec!["Sync already in progress"]);
    }

    #[tokio::test]
    async fn export_round_trips_through_load() {
        let bridge = bridge();
        bridge
            .sync_pages(vec![NotionPage::new("m1", "Team sync", MEETING)])
            .await;
        let export = bridge.export_cache().unwrap();

        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), export).unwrap();
        let pages = load_pages(tmp.path()).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_type, NotionPageType::MeetingNotes);
    }
}
