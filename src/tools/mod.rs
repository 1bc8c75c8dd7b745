pub mod add_memory;
pub mod agent_stats;
pub mod process_message;
pub mod query_entities;
pub mod related_entities;
pub mod search_memories;

use add_memory::AddMemoryParams;
use agent_stats::AgentStatsParams;
use process_message::ProcessMessageParams;
use query_entities::QueryEntitiesParams;
use related_entities::RelatedEntitiesParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memories::SearchMemoriesParams;
use std::sync::{Arc, MutexGuard, PoisonError};

use crate::agent::{AgentMessage, PersonalAgent};
use crate::graph::{EntityType, GraphEngine, SharedGraph};
use crate::memory::{Importance, MemoryType, NewMemory};

const DEFAULT_ENTITY_LIMIT: usize = 10;
const DEFAULT_DEPTH: usize = 2;
const MAX_DEPTH: usize = 4;

/// The Persona MCP tool handler. Every tool goes through the shared agent.
#[derive(Clone)]
pub struct PersonaTools {
    tool_router: ToolRouter<Self>,
    agent: Arc<PersonalAgent>,
}

fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, GraphEngine> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

#[tool_router]
impl PersonaTools {
    pub fn new(agent: Arc<PersonalAgent>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            agent,
        }
    }

    fn graph(&self) -> Result<&SharedGraph, String> {
        self.agent
            .graph()
            .ok_or_else(|| "knowledge graph is disabled".to_string())
    }

    /// Route a message through the agent loop.
    #[tool(description = "Send a message to the personal agent. It is classified (task, knowledge query, file operation, memory query, conversation), answered from memory/graph/protocols, and learned from.")]
    async fn process_message(
        &self,
        Parameters(params): Parameters<ProcessMessageParams>,
    ) -> Result<String, String> {
        if params.content.trim().is_empty() {
            return Err("content must not be empty".into());
        }

        let mut message = AgentMessage::new(
            params.content,
            params.source.unwrap_or_else(|| "mcp".to_string()),
        )
        .priority(params.priority.unwrap_or(5));
        if params.remember == Some(false) {
            message = message.without_memory();
        }

        tracing::info!(message_id = %message.id, source = %message.source, "process_message called");

        let response = self.agent.process_message(message).await;
        to_json(&response)
    }

    /// Store a memory directly, bypassing intent routing.
    #[tool(description = "Store a memory. Types: episodic, semantic, procedural, working, preference, behavioral. Importance high/critical lands in long-term memory, the rest in the working session.")]
    async fn add_memory(
        &self,
        Parameters(params): Parameters<AddMemoryParams>,
    ) -> Result<String, String> {
        if params.content.trim().is_empty() {
            return Err("content must not be empty".into());
        }

        let memory_type: MemoryType = match params.r#type.as_deref() {
            Some(t) => t.parse()?,
            None => MemoryType::Episodic,
        };
        let importance: Importance = match params.importance.as_deref() {
            Some(i) => i.parse()?,
            None => Importance::Medium,
        };

        tracing::info!(
            content_len = params.content.len(),
            memory_type = %memory_type,
            importance = %importance,
            "add_memory called"
        );

        let mut new = NewMemory::new(params.content)
            .memory_type(memory_type)
            .importance(importance)
            .metadata(params.metadata.unwrap_or_default());
        if let Some(response) = params.response {
            new = new.response(response);
        }

        let record = self
            .agent
            .memory()
            .add_memory(new)
            .await
            .map_err(|e| format!("store failed: {e}"))?;

        tracing::info!(id = %record.id, "memory stored");
        to_json(&record)
    }

    #[tool(description = "Search memories by natural language query. Recent cache entries are checked first, then the long-term and working sessions of the store.")]
    async fn search_memories(
        &self,
        Parameters(params): Parameters<SearchMemoriesParams>,
    ) -> Result<String, String> {
        let types = params
            .types
            .unwrap_or_default()
            .iter()
            .map(|t| t.parse::<MemoryType>())
            .collect::<Result<Vec<_>, _>>()?;

        let defaults = self.agent.memory().config();
        let limit = params.limit.unwrap_or(defaults.search_limit);
        let min_score = params.min_score.unwrap_or(defaults.min_search_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err("min_score must be between 0.0 and 1.0".into());
        }

        tracing::info!(query = %params.query, limit, "search_memories called");

        let memories = self
            .agent
            .memory()
            .search_memories(&params.query, &types, limit, min_score)
            .await;

        to_json(&serde_json::json!({
            "memories": memories,
            "total": memories.len(),
        }))
    }

    #[tool(description = "Look up knowledge-graph entities, either all of one type or those named in a piece of text.")]
    async fn query_entities(
        &self,
        Parameters(params): Parameters<QueryEntitiesParams>,
    ) -> Result<String, String> {
        let limit = params.limit.unwrap_or(DEFAULT_ENTITY_LIMIT);
        let graph = self.graph()?;

        let entities = match (params.r#type.as_deref(), params.text.as_deref()) {
            (Some(t), _) => {
                let entity_type: EntityType = t.parse()?;
                lock_graph(graph).search_entities_by_type(entity_type, limit)
            }
            (None, Some(text)) => lock_graph(graph).entities_named_in(text, limit),
            (None, None) => return Err("either type or text is required".into()),
        };

        tracing::info!(found = entities.len(), "query_entities called");
        to_json(&serde_json::json!({
            "entities": entities,
            "total": entities.len(),
        }))
    }

    #[tool(description = "Find entities related to one entity by walking the knowledge graph. Direct neighbours and indirect ones (with the entity they were reached through) are returned separately.")]
    async fn related_entities(
        &self,
        Parameters(params): Parameters<RelatedEntitiesParams>,
    ) -> Result<String, String> {
        let depth = params.max_depth.unwrap_or(DEFAULT_DEPTH);
        if !(1..=MAX_DEPTH).contains(&depth) {
            return Err(format!("max_depth must be between 1 and {MAX_DEPTH}"));
        }

        let graph = lock_graph(self.graph()?);
        let entity_id = match graph.get_entity(&params.entity) {
            Some(entity) => entity.id.clone(),
            None => graph
                .entity_by_name(&params.entity)
                .map(|e| e.id.clone())
                .ok_or_else(|| format!("entity not found: {}", params.entity))?,
        };

        tracing::info!(entity = %entity_id, depth, "related_entities called");

        let related = graph
            .find_related_entities(&entity_id, depth)
            .map_err(|e| e.to_string())?;
        to_json(&serde_json::json!({
            "entity_id": entity_id,
            "direct": related.direct,
            "indirect": related.indirect,
        }))
    }

    #[tool(description = "Run memory consolidation now: copy high/critical working memories into long-term memory, drop cached memories past their TTL, and rescore cluster importance.")]
    async fn consolidate_memories(&self) -> Result<String, String> {
        tracing::info!("consolidate_memories called");
        let report = self.agent.memory().consolidate().await;
        to_json(&report)
    }

    #[tool(description = "Get agent statistics: message and memory counters, knowledge graph size, protocol status, uptime.")]
    async fn agent_stats(
        &self,
        Parameters(params): Parameters<AgentStatsParams>,
    ) -> Result<String, String> {
        tracing::info!("agent_stats called");
        let stats = self.agent.get_stats().await;
        if params.include_health.unwrap_or(false) {
            let health = self.agent.health_check().await;
            return to_json(&serde_json::json!({ "stats": stats, "health": health }));
        }
        to_json(&stats)
    }
}

#[tool_handler]
impl ServerHandler for PersonaTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Persona is a personal agent with long-term memory and a knowledge graph. \
                 Use process_message to talk to it, add_memory and search_memories for \
                 memory, and query_entities or related_entities to explore what it knows."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonaConfig;
    use crate::store::{MemoryStore, SqliteStore};

    async fn tools_with_store() -> (PersonaTools, Arc<dyn MemoryStore>) {
        let mut config = PersonaConfig::default();
        config.agent.enable_a2a = false;
        config.agent.enable_mcp = false;
        let store: Arc<dyn MemoryStore> = Arc::new(SqliteStore::in_memory().unwrap());
        let agent = PersonalAgent::new(config, Some(Arc::clone(&store)));
        agent.initialize().await.unwrap();
        (PersonaTools::new(agent), store)
    }

    async fn tools() -> PersonaTools {
        tools_with_store().await.0
    }

    #[tokio::test]
    async fn messages_default_to_mcp_source() {
        let (tools, store) = tools_with_store().await;
        tools
            .process_message(Parameters(ProcessMessageParams {
                content: "Budget sync with Omar Haddad".into(),
                source: None,
                remember: None,
                priority: None,
            }))
            .await
            .unwrap();

        let found = tools
            .search_memories(Parameters(SearchMemoriesParams {
                query: "Budget sync".into(),
                types: None,
                limit: None,
                min_score: Some(0.0),
            }))
            .await
            .unwrap();
        let found: serde_json::Value = serde_json::from_str(&found).unwrap();
        assert_eq!(found["memories"][0]["context"]["source"], "mcp");

        let user = tools.agent.memory().user_id().to_string();
        let mirrored = store
            .recent_messages(&format!("graphiti_session_{user}"), 5)
            .await
            .unwrap();
        assert_eq!(mirrored[0].metadata["source"], "mcp");
    }

    #[tokio::test]
    async fn consolidate_description_matches_behavior() {
        let tools = tools().await;
        let listed = tools.tool_router.list_all();
        let consolidate = listed
            .iter()
            .find(|t| t.name == "consolidate_memories")
            .unwrap();
        let description = consolidate.description.as_deref().unwrap();
        assert!(description.contains("high/critical"));
        assert!(description.contains("TTL"));
        assert!(!description.contains("frequently"));

        let report = tools.consolidate_memories().await.unwrap();
        let report: serde_json::Value = serde_json::from_str(&report).unwrap();
        assert_eq!(report["promoted"], 0);
    }

    #[tokio::test]
    async fn add_then_search() {
        let tools = tools().await;
        let stored = tools
            .add_memory(Parameters(AddMemoryParams {
                content: "Alice prefers morning standups".into(),
                response: None,
                r#type: Some("preference".into()),
                importance: Some("high".into()),
                metadata: None,
            }))
            .await
            .unwrap();
        let stored: serde_json::Value = serde_json::from_str(&stored).unwrap();
        assert_eq!(stored["context"]["memory_type"], "preference");

        let found = tools
            .search_memories(Parameters(SearchMemoriesParams {
                query: "standups".into(),
                types: Some(vec!["preference".into()]),
                limit: None,
                min_score: Some(0.0),
            }))
            .await
            .unwrap();
        let found: serde_json::Value = serde_json::from_str(&found).unwrap();
        assert_eq!(found["total"], 1);
    }

    #[tokio::test]
    async fn invalid_inputs_are_rejected() {
        let tools = tools().await;
        let err = tools
            .add_memory(Parameters(AddMemoryParams {
                content: "x".into(),
                response: None,
                r#type: Some("dream".into()),
                importance: None,
                metadata: None,
            }))
            .await
            .unwrap_err();
        assert!(err.contains("unknown memory type"));

        let err = tools
            .related_entities(Parameters(RelatedEntitiesParams {
                entity: "Nobody".into(),
                max_depth: Some(9),
            }))
            .await
            .unwrap_err();
        assert!(err.contains("max_depth"));

        let err = tools
            .query_entities(Parameters(QueryEntitiesParams {
                r#type: None,
                text: None,
                limit: None,
            }))
            .await
            .unwrap_err();
        assert!(err.contains("required"));
    }

    #[tokio::test]
    async fn message_feeds_entity_tools() {
        let tools = tools().await;
        tools
            .process_message(Parameters(ProcessMessageParams {
                content: "Met with Sarah Chen about Project Atlas".into(),
                source: None,
                remember: None,
                priority: None,
            }))
            .await
            .unwrap();

        let people = tools
            .query_entities(Parameters(QueryEntitiesParams {
                r#type: Some("person".into()),
                text: None,
                limit: None,
            }))
            .await
            .unwrap();
        assert!(people.contains("Sarah Chen"));

        let related = tools
            .related_entities(Parameters(RelatedEntitiesParams {
                entity: "Sarah Chen".into(),
                max_depth: None,
            }))
            .await
            .unwrap();
        let related: serde_json::Value = serde_json::from_str(&related).unwrap();
        assert!(!related["direct"].as_array().unwrap().is_empty());

        let stats = tools
            .agent_stats(Parameters(AgentStatsParams {
                include_health: Some(true),
            }))
            .await
            .unwrap();
        let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
        assert_eq!(stats["stats"]["messages_processed"], 1);
        assert_eq!(stats["health"]["status"], "healthy");
    }
}
