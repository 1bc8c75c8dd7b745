//! The personal agent: routes messages between the graph, memory and protocol clients.
//!
//! One [`PersonalAgent`] per user. Protocol clients sit behind async mutexes because
//! their calls are awaited; the graph and counters use std mutexes and are never held
//! across an `.await`.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::intent::{detect_intent, Intent};
use super::types::{AgentCapability, AgentContext, AgentEvent, AgentMessage, AgentResponse, AgentState};
use crate::config::PersonaConfig;
use crate::graph::{Entity, EntityType, GraphEngine, GraphStats, SharedGraph};
use crate::memory::{MemoryEngine, MemoryEngineStats, NewMemory};
use crate::protocols::a2a::A2aManager;
use crate::protocols::mcp::{tool_result_text, McpManager};
use crate::store::{MemoryStore, Role, StoreMessage};

const MEMORY_CONTEXT_LIMIT: usize = 5;
const KNOWLEDGE_QUERY_LIMIT: usize = 5;
const KNOWLEDGE_RESPONSE_ITEMS: usize = 3;
const RESPONSE_CACHE_LIMIT: usize = 100;
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentCounters {
    pub messages_processed: u64,
    pub memories_created: u64,
    pub entities_discovered: u64,
    pub tasks_completed: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStats {
    #[serde(flatten)]
    pub counters: AgentCounters,
    pub knowledge_graph: Option<GraphStats>,
    pub memory: MemoryEngineStats,
    pub a2a_tasks: Option<usize>,
    pub mcp_servers: Option<usize>,
    pub state: AgentState,
    pub capabilities: Vec<AgentCapability>,
    pub uptime_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentHealth {
    /// `healthy` only while the agent is ready.
    pub status: &'static str,
    pub agent_state: AgentState,
    pub components: BTreeMap<&'static str, &'static str>,
}

/// Outcome of routing one message.
struct Routed {
    content: String,
    action: String,
    source: &'static str,
}

pub struct PersonalAgent {
    agent_id: String,
    name: String,
    config: PersonaConfig,
    context: Mutex<AgentContext>,
    state: Mutex<AgentState>,
    memory: Arc<MemoryEngine>,
    store: Option<Arc<dyn MemoryStore>>,
    graph: Option<SharedGraph>,
    a2a: AsyncMutex<Option<A2aManager>>,
    mcp: AsyncMutex<Option<McpManager>>,
    counters: Mutex<AgentCounters>,
    responses: Mutex<VecDeque<AgentResponse>>,
    events: broadcast::Sender<AgentEvent>,
    queue: Mutex<Option<mpsc::Sender<AgentMessage>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    syncing: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PersonalAgent {
    /// Build an agent for `config.agent.user_id`. Nothing is started until
    /// [`initialize`](Self::initialize).
    pub fn new(config: PersonaConfig, store: Option<Arc<dyn MemoryStore>>) -> Arc<Self> {
        let user_id = config.agent.user_id.clone();
        let name = config.agent.name.clone();
        let graph: Option<SharedGraph> = config
            .agent
            .enable_graph
            .then(|| Arc::new(Mutex::new(GraphEngine::new(user_id.clone()))));
        let memory = Arc::new(MemoryEngine::new(
            user_id.clone(),
            config.memory.clone(),
            store.clone(),
            graph.clone(),
        ));
        let capabilities = AgentCapability::from_config(&config.agent);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Arc::new(Self {
            agent_id: format!("{name}_{user_id}"),
            name,
            context: Mutex::new(AgentContext::new(user_id, capabilities)),
            state: Mutex::new(AgentState::Initializing),
            memory,
            store,
            graph,
            a2a: AsyncMutex::new(None),
            mcp: AsyncMutex::new(None),
            counters: Mutex::new(AgentCounters::default()),
            responses: Mutex::new(VecDeque::new()),
            events,
            queue: Mutex::new(None),
            consumer: Mutex::new(None),
            syncing: AtomicBool::new(false),
            config,
        })
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn memory(&self) -> &Arc<MemoryEngine> {
        &self.memory
    }

    pub fn graph(&self) -> Option<&SharedGraph> {
        self.graph.as_ref()
    }

    pub fn state(&self) -> AgentState {
        *lock(&self.state)
    }

    pub fn context(&self) -> AgentContext {
        lock(&self.context).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// Move to `to` unless the agent has already shut down.
    fn transition(&self, to: AgentState) {
        let mut state = lock(&self.state);
        if *state != AgentState::Shutdown || to == AgentState::Shutdown {
            *state = to;
        }
    }

    fn emit(&self, event: AgentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_protocol(&self, name: &str, up: bool) {
        lock(&self.context)
            .active_protocols
            .insert(name.to_string(), up);
    }

    /// Bring up protocols, the memory engine and the queue consumer.
    ///
    /// A2A and MCP failures only disable that protocol; a memory engine failure is
    /// fatal and leaves the agent in the error state.
    pub async fn initialize(self: &Arc<Self>) -> Result<()> {
        info!(agent = %self.agent_id, "initializing agent");
        self.transition(AgentState::Initializing);

        if self.config.agent.enable_a2a {
            let up = self.init_a2a().await;
            self.set_protocol("a2a", up);
        }
        if self.config.agent.enable_mcp {
            let up = self.init_mcp().await;
            self.set_protocol("mcp", up);
        }
        self.set_protocol("graphiti", self.graph.is_some());

        if let Err(e) = self.memory.initialize().await {
            self.transition(AgentState::Error);
            error!(error = %e, "memory engine failed to initialize");
            return Err(e.context("memory engine failed to initialize"));
        }

        self.load_user_context();
        self.start_queue_consumer();
        self.transition(AgentState::Ready);

        let capabilities: Vec<&str> = lock(&self.context)
            .capabilities
            .iter()
            .map(|c| c.as_str())
            .collect();
        info!(agent = %self.agent_id, ?capabilities, "agent ready");
        self.emit(AgentEvent::Initialized {
            agent: self.name.clone(),
        });
        Ok(())
    }

    async fn init_a2a(&self) -> bool {
        let mut a2a = A2aManager::new(self.agent_id.clone(), self.config.a2a.clone());
        match a2a.initialize().await {
            Ok(()) => {
                a2a.register_capability(
                    "memory_search",
                    "Search the user's personal memory",
                    json!({"query": "string", "limit": "number"}),
                );
                a2a.register_capability(
                    "knowledge_query",
                    "Query the personal knowledge graph",
                    json!({"entity_type": "string", "filters": "object"}),
                );
                *self.a2a.lock().await = Some(a2a);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to initialize A2A");
                false
            }
        }
    }

    async fn init_mcp(&self) -> bool {
        let mut mcp = McpManager::new(self.agent_id.clone(), self.config.mcp.clone());
        match mcp.initialize().await {
            Ok(()) => {
                *self.mcp.lock().await = Some(mcp);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to initialize MCP");
                false
            }
        }
    }

    fn load_user_context(&self) {
        let preferences = self.memory.get_user_preferences();
        let contacts: Vec<String> = self
            .graph
            .as_ref()
            .map(|g| {
                lock(g)
                    .search_entities_by_type(EntityType::Person, 5)
                    .into_iter()
                    .map(|e| e.name)
                    .collect()
            })
            .unwrap_or_default();

        let mut context = lock(&self.context);
        info!(preferences = preferences.len(), "loaded user context");
        context.metadata.insert(
            "preferences".into(),
            serde_json::to_value(&preferences).unwrap_or_default(),
        );
        context
            .metadata
            .insert("important_contacts".into(), contacts.into());
    }

    fn start_queue_consumer(self: &Arc<Self>) {
        let (tx, mut rx) = mpsc::channel::<AgentMessage>(self.config.agent.queue_capacity.max(1));
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let Some(agent) = weak.upgrade() else {
                    break;
                };
                agent.process_message(message).await;
            }
            debug!("message queue consumer stopped");
        });

        *lock(&self.queue) = Some(tx);
        if let Some(previous) = lock(&self.consumer).replace(handle) {
            previous.abort();
        }
    }

    /// Hand a message to the background consumer. Fails once the agent is shut down.
    pub async fn enqueue(&self, message: AgentMessage) -> Result<()> {
        let tx = lock(&self.queue)
            .clone()
            .context("agent message queue is not running")?;
        tx.send(message)
            .await
            .map_err(|_| anyhow!("agent message queue closed"))
    }

    /// Process one message. Never fails: errors produce a zero-confidence fallback.
    pub async fn process_message(&self, message: AgentMessage) -> AgentResponse {
        info!(message = %message.id, source = %message.source, "processing message");
        lock(&self.context).update_activity();
        self.transition(AgentState::Processing);

        match self.handle_message(&message).await {
            Ok(response) => {
                lock(&self.counters).messages_processed += 1;
                self.cache_response(response.clone());
                self.transition(AgentState::Ready);
                self.emit(AgentEvent::MessageProcessed {
                    message_id: message.id.clone(),
                    intent: response.intent().unwrap_or_default().to_string(),
                });
                response
            }
            Err(e) => {
                error!(message = %message.id, error = %e, "error processing message");
                lock(&self.counters).errors += 1;
                self.transition(AgentState::Error);

                let mut response = AgentResponse::new(
                    message.id,
                    "I encountered an error processing your message. Please try again.",
                    0.0,
                );
                response.actions.push("error_handling".into());
                response
                    .metadata
                    .insert("error".into(), format!("{e:#}").into());
                response
            }
        }
    }

    /// Convenience for plain user text.
    pub async fn process_text(&self, content: &str) -> AgentResponse {
        self.process_message(AgentMessage::user(content)).await
    }

    async fn handle_message(&self, message: &AgentMessage) -> Result<AgentResponse> {
        let episode = match (&self.graph, message.requires_memory) {
            (Some(graph), true) => {
                let episode = lock(graph).ingest_episode(
                    &message.content,
                    &message.source,
                    Value::Object(message.context.clone()),
                );
                lock(&self.counters).entities_discovered += episode.entities.len() as u64;
                Some(episode)
            }
            _ => None,
        };

        let memories = self
            .memory
            .search_memories(
                &message.content,
                &[],
                MEMORY_CONTEXT_LIMIT,
                self.config.memory.min_search_score,
            )
            .await;

        let intent = detect_intent(&message.content);
        debug!(message = %message.id, %intent, memories = memories.len(), "routing message");
        let routed = self.route(intent, &message.content, !memories.is_empty()).await?;

        if message.requires_memory {
            let mut metadata = Map::new();
            metadata.insert("source".into(), message.source.clone().into());
            metadata.insert("intent".into(), intent.as_str().into());
            metadata.insert("timestamp".into(), message.timestamp.to_rfc3339().into());
            let mut new = NewMemory::new(message.content.clone())
                .response(routed.content.clone())
                .metadata(metadata);
            if let Some(episode) = episode {
                new = new.episode(episode);
            }
            self.memory.add_memory(new).await?;
            lock(&self.counters).memories_created += 1;
        }

        let elapsed = (Utc::now() - message.timestamp).num_microseconds().unwrap_or(0) as f64 / 1e6;
        let mut response = AgentResponse::new(message.id.clone(), routed.content, 0.9);
        response.sources.push(routed.source.to_string());
        response.actions.push(routed.action);
        response.metadata.insert("intent".into(), intent.as_str().into());
        response
            .metadata
            .insert("processing_time".into(), json!(elapsed));
        response
            .metadata
            .insert("memories_used".into(), memories.len().into());
        Ok(response)
    }

    /// Dispatch by intent. A bucket whose protocol is unavailable falls through to
    /// the contextual response.
    async fn route(&self, intent: Intent, content: &str, has_context: bool) -> Result<Routed> {
        match intent {
            Intent::TaskExecution => {
                let mut guard = self.a2a.lock().await;
                if let Some(a2a) = guard.as_mut() {
                    let mut metadata = Map::new();
                    metadata.insert("user_id".into(), self.memory.user_id().into());
                    let task = a2a.create_task("user_request", json!({ "message": content }), metadata);
                    let output = a2a.execute_task(&task.task_id).await?;
                    lock(&self.counters).tasks_completed += 1;
                    return Ok(Routed {
                        content: output["response"]
                            .as_str()
                            .unwrap_or("Task completed")
                            .to_string(),
                        action: format!("Executed A2A task {}", task.task_id),
                        source: "a2a_execution",
                    });
                }
            }
            Intent::KnowledgeQuery => {
                if let Some(graph) = &self.graph {
                    let entities = query_knowledge_graph(&lock(graph), content);
                    return Ok(Routed {
                        content: format_knowledge_response(&entities),
                        action: "Queried knowledge graph".into(),
                        source: "graphiti_kg",
                    });
                }
            }
            Intent::FileOperation => {
                let mut guard = self.mcp.lock().await;
                if let Some(mcp) = guard.as_mut() {
                    let output = execute_mcp_operation(mcp, content).await?;
                    return Ok(Routed {
                        content: output,
                        action: "Executed MCP operation".into(),
                        source: "mcp_tool",
                    });
                }
            }
            Intent::MemoryQuery | Intent::GeneralConversation => {}
        }

        Ok(Routed {
            content: contextual_response(content, has_context),
            action: "Generated contextual response".into(),
            source: "memory_context",
        })
    }

    fn cache_response(&self, response: AgentResponse) {
        let mut cache = lock(&self.responses);
        cache.push_back(response);
        while cache.len() > RESPONSE_CACHE_LIMIT {
            cache.pop_front();
        }
    }

    pub fn cached_response(&self, message_id: &str) -> Option<AgentResponse> {
        lock(&self.responses)
            .iter()
            .rev()
            .find(|r| r.message_id == message_id)
            .cloned()
    }

    /// Feed feedback into the graph and record a behaviour pattern. Returns `false`
    /// when learning is disabled.
    pub async fn learn_from_interaction(
        &self,
        message: &AgentMessage,
        response: &AgentResponse,
        feedback: Option<&str>,
    ) -> Result<bool> {
        if !lock(&self.context).has(AgentCapability::Learning) {
            return Ok(false);
        }
        self.transition(AgentState::Learning);

        let positive = feedback.is_some_and(|f| f.to_lowercase().contains("good"));
        if let (Some(feedback), Some(graph)) = (feedback, &self.graph) {
            lock(graph).ingest_episode(
                &format!("User feedback: {feedback} for response: {}", response.content),
                "feedback",
                json!({
                    "message_id": message.id,
                    "response_id": response.id,
                    "sentiment": if positive { "positive" } else { "negative" },
                }),
            );
        }

        let mut pattern = Map::new();
        pattern.insert("intent".into(), response.intent().into());
        pattern.insert("success".into(), positive.into());
        pattern.insert("timestamp".into(), Utc::now().to_rfc3339().into());
        let result = self.memory.update_behavior_patterns(pattern).await;
        self.transition(AgentState::Ready);
        result?;

        info!(message = %message.id, "learned from interaction");
        self.emit(AgentEvent::Learned {
            message_id: message.id.clone(),
        });
        Ok(true)
    }

    /// Push memory and agent stats to the store. Returns `false` when a sync is
    /// already running.
    pub async fn sync_with_cloud(&self) -> Result<bool> {
        if self.syncing.swap(true, Ordering::SeqCst) {
            warn!("already syncing, skipping");
            return Ok(false);
        }
        self.transition(AgentState::Syncing);
        let result = self.sync_inner().await;
        self.syncing.store(false, Ordering::SeqCst);

        match result {
            Ok(()) => {
                self.transition(AgentState::Ready);
                info!("cloud sync completed");
                self.emit(AgentEvent::Synced);
                Ok(true)
            }
            Err(e) => {
                self.transition(AgentState::Error);
                error!(error = %e, "cloud sync failed");
                Err(e)
            }
        }
    }

    async fn sync_inner(&self) -> Result<()> {
        self.memory.sync_to_cloud().await?;

        if let Some(graph) = &self.graph {
            let stats = lock(graph).stats();
            info!(
                entities = stats.total_entities,
                relationships = stats.total_relationships,
                episodes = stats.total_episodes,
                "graph stats"
            );
        }

        if let Some(store) = &self.store {
            let counters = lock(&self.counters).clone();
            store
                .add_messages(
                    &format!("agent_stats_{}", self.memory.user_id()),
                    &[StoreMessage::new(
                        Role::System,
                        format!("Agent stats: {}", serde_json::to_string(&counters)?),
                        json!({ "agent_name": self.name, "timestamp": Utc::now() }),
                    )],
                )
                .await
                .context("failed to sync agent stats")?;
        }
        Ok(())
    }

    pub async fn get_stats(&self) -> AgentStats {
        let (capabilities, created_at): (Vec<AgentCapability>, DateTime<Utc>) = {
            let context = lock(&self.context);
            (context.capabilities.clone(), context.created_at)
        };
        let a2a_tasks = self.a2a.lock().await.as_ref().map(|a| a.active_task_count());
        let mcp_servers = self.mcp.lock().await.as_ref().map(|m| m.running_count());

        AgentStats {
            counters: lock(&self.counters).clone(),
            knowledge_graph: self.graph.as_ref().map(|g| lock(g).stats()),
            memory: self.memory.stats(),
            a2a_tasks,
            mcp_servers,
            state: self.state(),
            capabilities,
            uptime_secs: (Utc::now() - created_at).num_milliseconds() as f64 / 1000.0,
        }
    }

    pub async fn health_check(&self) -> AgentHealth {
        let state = self.state();
        let enabled = |on: bool| if on { "healthy" } else { "disabled" };

        let mut components = BTreeMap::new();
        components.insert("memory", "healthy");
        components.insert("a2a", enabled(self.a2a.lock().await.is_some()));
        components.insert("mcp", enabled(self.mcp.lock().await.is_some()));
        components.insert("graphiti", enabled(self.graph.is_some()));
        components.insert(
            "zep",
            match &self.store {
                Some(store) if store.name() == "zep" => "healthy",
                _ => "disconnected",
            },
        );

        AgentHealth {
            status: if state == AgentState::Ready { "healthy" } else { "unhealthy" },
            agent_state: state,
            components,
        }
    }

    /// Stop the queue consumer (pending messages are dropped), run a final sync and
    /// close protocol connections.
    pub async fn shutdown(&self) {
        info!(agent = %self.agent_id, "shutting down agent");
        self.transition(AgentState::Shutdown);

        lock(&self.queue).take();
        if let Some(handle) = lock(&self.consumer).take() {
            handle.abort();
        }

        if let Err(e) = self.sync_with_cloud().await {
            warn!(error = %e, "final sync failed");
        }
        if let Some(mcp) = self.mcp.lock().await.as_mut() {
            mcp.disconnect_all().await;
        }
        if let Some(a2a) = self.a2a.lock().await.as_mut() {
            a2a.cleanup();
        }
        self.memory.shutdown();

        self.emit(AgentEvent::Shutdown {
            agent: self.name.clone(),
        });
        info!(agent = %self.agent_id, "agent shutdown complete");
    }
}

/// Entities of a type named in the query, else entities whose names appear in it.
fn query_knowledge_graph(graph: &GraphEngine, query: &str) -> Vec<Entity> {
    let lower = query.to_lowercase();
    match EntityType::ALL.iter().find(|t| lower.contains(t.as_str())) {
        Some(entity_type) => graph.search_entities_by_type(*entity_type, KNOWLEDGE_QUERY_LIMIT),
        None => graph.entities_named_in(query, KNOWLEDGE_QUERY_LIMIT),
    }
}

fn format_knowledge_response(entities: &[Entity]) -> String {
    if entities.is_empty() {
        return "I couldn't find relevant information in your knowledge graph.".into();
    }
    let mut out = String::from("Based on your personal knowledge graph:\n");
    for entity in entities.iter().take(KNOWLEDGE_RESPONSE_ITEMS) {
        out.push_str(&format!("- {} ({})", entity.name, entity.entity_type));
        if let Some(description) = &entity.description {
            out.push_str(&format!(": {description}"));
        }
        out.push('\n');
    }
    out
}

fn contextual_response(content: &str, has_context: bool) -> String {
    if has_context {
        format!(
            "Based on your previous interactions, I understand you're asking about: {content}. \
             Let me help you with that."
        )
    } else {
        format!("I'm processing your request: {content}. How can I assist you further?")
    }
}

/// First token that looks like a path (`notes.md`, `./docs`, `src/lib.rs`).
fn extract_path(content: &str) -> Option<&str> {
    content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | ',' | '?' | '!')))
        .map(|w| w.trim_end_matches('.'))
        .find(|w| w.contains('/') || (w.contains('.') && !w.starts_with('.') && w.len() > 2))
}

async fn execute_mcp_operation(mcp: &mut McpManager, content: &str) -> Result<String> {
    let lower = content.to_lowercase();
    let wanted = if lower.contains("list") {
        "list_directory"
    } else if lower.contains("read") {
        "read_file"
    } else {
        return Ok("Could not determine MCP operation".into());
    };

    if !mcp.is_running("filesystem") {
        return Ok("MCP filesystem server is not running".into());
    }
    let tools = mcp.discover_tools("filesystem");
    let Some(tool) = tools.iter().find(|t| t.name == wanted).or(tools.first()) else {
        return Ok("No filesystem tools available".into());
    };

    let path = extract_path(content).unwrap_or("./");
    let result = mcp
        .execute_tool("filesystem", &tool.name, json!({ "path": path }))
        .await?;
    let text = tool_result_text(&result);
    Ok(if text.is_empty() { result.to_string() } else { text })
}
