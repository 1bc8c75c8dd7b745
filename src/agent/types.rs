//! Messages, responses, lifecycle states and events of the agent loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::AgentConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    MemoryManagement,
    TaskExecution,
    KnowledgeGraph,
    ProtocolA2a,
    ProtocolMcp,
    NotionSync,
    EdgeProcessing,
    Learning,
    PreferenceTracking,
}

impl AgentCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MemoryManagement => "memory_management",
            Self::TaskExecution => "task_execution",
            Self::KnowledgeGraph => "knowledge_graph",
            Self::ProtocolA2a => "protocol_a2a",
            Self::ProtocolMcp => "protocol_mcp",
            Self::NotionSync => "notion_sync",
            Self::EdgeProcessing => "edge_processing",
            Self::Learning => "learning",
            Self::PreferenceTracking => "preference_tracking",
        }
    }

    /// Capabilities implied by the agent configuration.
    pub fn from_config(config: &AgentConfig) -> Vec<AgentCapability> {
        let mut caps = vec![Self::MemoryManagement, Self::TaskExecution];
        let optional = [
            (config.enable_a2a, Self::ProtocolA2a),
            (config.enable_mcp, Self::ProtocolMcp),
            (config.enable_graph, Self::KnowledgeGraph),
            (config.enable_notion, Self::NotionSync),
            (config.enable_learning, Self::Learning),
            (config.enable_preferences, Self::PreferenceTracking),
        ];
        caps.extend(optional.into_iter().filter(|(on, _)| *on).map(|(_, c)| c));
        caps
    }
}

impl std::fmt::Display for AgentCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Initializing,
    Ready,
    Processing,
    Learning,
    Syncing,
    Error,
    Shutdown,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Learning => "learning",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentContext {
    pub user_id: String,
    pub session_id: String,
    pub capabilities: Vec<AgentCapability>,
    /// `a2a`, `mcp`, `graphiti` → whether the protocol came up.
    pub active_protocols: BTreeMap<String, bool>,
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl AgentContext {
    pub fn new(user_id: impl Into<String>, capabilities: Vec<AgentCapability>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            session_id: uuid::Uuid::now_v7().to_string(),
            capabilities,
            active_protocols: BTreeMap::new(),
            metadata: Map::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn has(&self, capability: AgentCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub content: String,
    /// `user`, `notion`, `mcp`, ...
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub context: Map<String, Value>,
    /// Whether the message feeds the graph and is written back to memory.
    pub requires_memory: bool,
    /// 1 (lowest) to 10.
    pub priority: u8,
}

impl AgentMessage {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            content: content.into(),
            source: source.into(),
            timestamp: Utc::now(),
            context: Map::new(),
            requires_memory: true,
            priority: 5,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, "user")
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn without_memory(mut self) -> Self {
        self.requires_memory = false;
        self
    }

    pub fn context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: String,
    pub message_id: String,
    pub content: String,
    /// Confidence in `[0.0, 1.0]`; 0 for error fallbacks.
    pub confidence: f64,
    pub sources: Vec<String>,
    pub actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl AgentResponse {
    pub fn new(message_id: impl Into<String>, content: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            message_id: message_id.into(),
            content: content.into(),
            confidence,
            sources: Vec::new(),
            actions: Vec::new(),
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn intent(&self) -> Option<&str> {
        self.metadata.get("intent").and_then(Value::as_str)
    }
}

/// Lifecycle notifications, see [`PersonalAgent::subscribe`](super::PersonalAgent::subscribe).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Initialized { agent: String },
    MessageProcessed { message_id: String, intent: String },
    Learned { message_id: String },
    Synced,
    Shutdown { agent: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_follow_config() {
        let config = AgentConfig::default();
        let caps = AgentCapability::from_config(&config);
        assert_eq!(caps[0], AgentCapability::MemoryManagement);
        assert!(caps.contains(&AgentCapability::ProtocolA2a));
        assert!(caps.contains(&AgentCapability::Learning));
        assert!(!caps.contains(&AgentCapability::NotionSync));

        let bare = AgentConfig {
            enable_a2a: false,
            enable_mcp: false,
            enable_graph: false,
            enable_learning: false,
            enable_preferences: false,
            ..AgentConfig::default()
        };
        assert_eq!(
            AgentCapability::from_config(&bare),
            vec![AgentCapability::MemoryManagement, AgentCapability::TaskExecution]
        );
    }

    #[test]
    fn priority_is_clamped() {
        assert_eq!(AgentMessage::user("x").priority(0).priority, 1);
        assert_eq!(AgentMessage::user("x").priority(42).priority, 10);
        assert_eq!(AgentMessage::user("x").priority, 5);
    }

    #[test]
    fn event_serializes_with_tag() {
        let json = serde_json::to_value(AgentEvent::MessageProcessed {
            message_id: "m".into(),
            intent: "memory_query".into(),
        })
        .unwrap();
        assert_eq!(json["event"], "message_processed");
        assert_eq!(json["intent"], "memory_query");
    }
}
