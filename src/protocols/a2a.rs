//! Agent-to-agent (A2A 0.2) client.
//!
//! Keeps a registry of agent cards (our own plus any discovered remote agents) and
//! a table of tasks. Tasks either run locally or are posted to a remote agent's
//! `{base_url}/tasks` endpoint.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{A2aConfig, RemoteAgentConfig};

pub const PROTOCOL_VERSION: &str = "A2A-0.2";

/// Finished tasks kept for status lookups; older ones are evicted.
pub const FINISHED_TASK_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum A2aError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("agent {0} not found in registry")]
    UnknownAgent(String),

    #[error("task {0} not found")]
    UnknownTask(String),

    #[error("agent card at {url} unavailable (HTTP {status})")]
    CardUnavailable { url: String, status: u16 },

    #[error("A2A client not initialized")]
    NotInitialized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    pub description: String,
    #[serde(default = "default_card_version")]
    pub version: String,
    pub capabilities: Vec<String>,
    pub endpoints: BTreeMap<String, String>,
    #[serde(default)]
    pub authentication: Option<Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_card_version() -> String {
    "1.0.0".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct A2aTask {
    pub task_id: String,
    pub status: TaskStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Map<String, Value>,
}

impl A2aTask {
    fn new(task_id: String, input: Value, metadata: Map<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Pending,
            input,
            output: None,
            created_at: now,
            updated_at: now,
            metadata,
        }
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// A capability we advertise on our own card.
#[derive(Debug, Clone, Serialize)]
pub struct Capability {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentSummary {
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub version: String,
    /// `available` for remote agents, `local` for our own card.
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct A2aHealth {
    pub agent_id: String,
    pub status: &'static str,
    pub session_active: bool,
    pub agents_discovered: usize,
    pub active_tasks: usize,
    pub protocol_version: &'static str,
    pub timestamp: DateTime<Utc>,
}

pub struct A2aManager {
    agent_id: String,
    config: A2aConfig,
    client: Option<Client>,
    registry: BTreeMap<String, AgentCard>,
    remotes: HashMap<String, RemoteAgentConfig>,
    tasks: HashMap<String, A2aTask>,
    capabilities: Vec<Capability>,
}

impl A2aManager {
    pub fn new(agent_id: impl Into<String>, config: A2aConfig) -> Self {
        let remotes = config
            .remote_agents
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();
        Self {
            agent_id: agent_id.into(),
            config,
            client: None,
            registry: BTreeMap::new(),
            remotes,
            tasks: HashMap::new(),
            capabilities: Vec::new(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Build the HTTP client, publish our card and discover configured remote agents.
    /// Discovery failures are logged and skipped.
    pub async fn initialize(&mut self) -> Result<(), A2aError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(format!("PersonalAgent-A2A/{}", self.agent_id))
            .build()?;
        self.client = Some(client);

        self.registry.insert(self.agent_id.clone(), self.agent_card());
        info!(agent = %self.agent_id, "published agent card");

        let remotes: Vec<RemoteAgentConfig> = self.remotes.values().cloned().collect();
        for remote in remotes {
            match self.fetch_agent_card(&remote.card_url).await {
                Ok(card) => {
                    info!(agent = %remote.name, "discovered remote agent");
                    self.registry.insert(remote.name.clone(), card);
                }
                Err(e) => warn!(agent = %remote.name, error = %e, "agent discovery failed"),
            }
        }

        info!(agent = %self.agent_id, agents = self.registry.len(), "A2A client initialized");
        Ok(())
    }

    async fn fetch_agent_card(&self, url: &str) -> Result<AgentCard, A2aError> {
        let client = self.client.as_ref().ok_or(A2aError::NotInitialized)?;
        let resp = client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            return Err(A2aError::CardUnavailable {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(resp.json().await?)
    }

    /// Our own card, including every registered capability.
    pub fn agent_card(&self) -> AgentCard {
        let base = &self.config.base_url;
        let mut capabilities: Vec<String> = [
            "memory_management",
            "knowledge_graph_evolution",
            "notion_integration",
            "temporal_queries",
            "context_assembly",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        capabilities.extend(self.capabilities.iter().map(|c| c.name.clone()));

        let mut metadata = Map::new();
        metadata.insert("protocols".into(), json!([PROTOCOL_VERSION, "MCP-2025-06-18"]));
        metadata.insert("knowledge_graph".into(), "temporal_pkg".into());
        metadata.insert(
            "capability_parameters".into(),
            self.capabilities
                .iter()
                .map(|c| (c.name.clone(), c.parameters.clone()))
                .collect::<Map<String, Value>>()
                .into(),
        );

        AgentCard {
            name: format!("PersonalAgent-{}", self.agent_id),
            description: "Personal agent with session memory and a temporal knowledge graph".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            capabilities,
            endpoints: BTreeMap::from([
                ("base".to_string(), base.clone()),
                ("tasks".to_string(), format!("{base}/a2a/tasks")),
                ("messages".to_string(), format!("{base}/a2a/messages")),
                ("health".to_string(), format!("{base}/a2a/health")),
            ]),
            authentication: Some(json!({"type": "bearer", "required": false})),
            metadata,
        }
    }

    pub fn register_capability(&mut self, name: &str, description: &str, parameters: Value) {
        self.capabilities.retain(|c| c.name != name);
        self.capabilities.push(Capability {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        });
        if self.registry.contains_key(&self.agent_id) {
            self.registry.insert(self.agent_id.clone(), self.agent_card());
        }
        info!(capability = name, "A2A capability registered");
    }

    /// Create a pending task in the local table.
    pub fn create_task(&mut self, task_type: &str, input: Value, metadata: Map<String, Value>) -> A2aTask {
        let task_id = format!("task_{}", uuid::Uuid::now_v7().simple());
        let mut meta = metadata;
        meta.insert("task_type".into(), task_type.into());
        meta.insert("source_agent".into(), self.agent_id.clone().into());
        let task = A2aTask::new(task_id.clone(), input, meta);
        self.tasks.insert(task_id, task.clone());
        task
    }

    /// Run a pending task: dispatch to the configured task agent when it has been
    /// discovered, otherwise complete it locally. Returns the task output.
    pub async fn execute_task(&mut self, task_id: &str) -> Result<Value, A2aError> {
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| A2aError::UnknownTask(task_id.to_string()))?;

        let target = self
            .config
            .task_agent
            .clone()
            .filter(|agent| self.registry.contains_key(agent) && agent != &self.agent_id);

        let output = match target {
            Some(agent) => {
                let sent = self
                    .send_task_to_agent(&agent, task.input.clone(), Some(task_id.to_string()))
                    .await?;
                json!({
                    "response": format!("Task {} dispatched to {agent} ({})", sent.task_id, sent.status),
                    "status": sent.status,
                    "agent": agent,
                })
            }
            None => {
                let message = task.input["message"].as_str().unwrap_or("request");
                let output = json!({
                    "response": format!("Task completed: {message}"),
                    "status": TaskStatus::Completed,
                });
                if let Some(t) = self.tasks.get_mut(task_id) {
                    t.output = Some(output.clone());
                    t.set_status(TaskStatus::Completed);
                }
                self.prune_finished();
                output
            }
        };

        info!(task = task_id, "A2A task executed");
        Ok(output)
    }

    /// Post a task to a registered remote agent. HTTP 200 marks the task
    /// `in_progress` with the remote id; any other outcome marks it `failed`.
    pub async fn send_task_to_agent(
        &mut self,
        target: &str,
        data: Value,
        task_id: Option<String>,
    ) -> Result<A2aTask, A2aError> {
        if !self.registry.contains_key(target) {
            error!(agent = target, "agent not found in registry");
            return Err(A2aError::UnknownAgent(target.to_string()));
        }
        let client = self.client.clone().ok_or(A2aError::NotInitialized)?;

        let task_id = task_id.unwrap_or_else(|| {
            format!("task_{}_{target}", Utc::now().format("%Y%m%d_%H%M%S"))
        });
        let mut metadata = self
            .tasks
            .get(&task_id)
            .map(|t| t.metadata.clone())
            .unwrap_or_default();
        metadata.insert("source_agent".into(), self.agent_id.clone().into());
        metadata.insert("target_agent".into(), target.into());
        metadata.insert("protocol".into(), PROTOCOL_VERSION.into());

        let mut task = A2aTask::new(task_id.clone(), data, metadata);
        if let Some(existing) = self.tasks.get(&task_id) {
            task.created_at = existing.created_at;
        }

        if let Some(remote) = self.remotes.get(target) {
            let endpoint = format!("{}/tasks", remote.base_url.trim_end_matches('/'));
            let payload = json!({
                "task_id": task_id,
                "source_agent": self.agent_id,
                "input": task.input,
                "capabilities_required": remote.capabilities,
            });

            match client.post(&endpoint).json(&payload).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    let body: Value = resp.json().await.unwrap_or(Value::Null);
                    task.set_status(TaskStatus::InProgress);
                    task.metadata
                        .insert("remote_task_id".into(), body["task_id"].clone());
                    info!(task = %task_id, agent = target, "task sent to remote agent");
                }
                Ok(resp) => {
                    task.set_status(TaskStatus::Failed);
                    task.metadata
                        .insert("error".into(), format!("HTTP {}", resp.status().as_u16()).into());
                    error!(task = %task_id, agent = target, status = resp.status().as_u16(), "remote agent rejected task");
                }
                Err(e) => {
                    task.set_status(TaskStatus::Failed);
                    task.metadata.insert("error".into(), e.to_string().into());
                    error!(task = %task_id, agent = target, error = %e, "failed to send task");
                }
            }
        }

        self.tasks.insert(task_id, task.clone());
        self.prune_finished();
        Ok(task)
    }

    pub fn get_task_status(&self, task_id: &str) -> Option<&A2aTask> {
        self.tasks.get(task_id)
    }

    pub fn cancel_task(&mut self, task_id: &str) -> Result<&A2aTask, A2aError> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| A2aError::UnknownTask(task_id.to_string()))?;
        if !task.status.is_terminal() {
            task.set_status(TaskStatus::Canceled);
        }
        self.prune_finished();
        self.tasks
            .get(task_id)
            .ok_or_else(|| A2aError::UnknownTask(task_id.to_string()))
    }

    /// Drop the oldest finished tasks once more than [`FINISHED_TASK_LIMIT`] pile up.
    fn prune_finished(&mut self) {
        let mut finished: Vec<(DateTime<Utc>, String)> = self
            .tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .map(|t| (t.updated_at, t.task_id.clone()))
            .collect();
        if finished.len() <= FINISHED_TASK_LIMIT {
            return;
        }
        finished.sort();
        let excess = finished.len() - FINISHED_TASK_LIMIT;
        for (_, id) in finished.into_iter().take(excess) {
            self.tasks.remove(&id);
        }
        debug!(evicted = excess, "finished A2A tasks evicted");
    }

    pub fn list_available_agents(&self) -> BTreeMap<String, AgentSummary> {
        self.registry
            .iter()
            .map(|(name, card)| {
                let summary = AgentSummary {
                    name: card.name.clone(),
                    description: card.description.clone(),
                    capabilities: card.capabilities.clone(),
                    version: card.version.clone(),
                    status: if self.remotes.contains_key(name) { "available" } else { "local" },
                };
                (name.clone(), summary)
            })
            .collect()
    }

    /// Tasks still pending or in progress.
    pub fn active_task_count(&self) -> usize {
        self.tasks.values().filter(|t| !t.status.is_terminal()).count()
    }

    pub fn health_check(&self) -> A2aHealth {
        A2aHealth {
            agent_id: self.agent_id.clone(),
            status: "healthy",
            session_active: self.client.is_some(),
            agents_discovered: self.registry.len(),
            active_tasks: self.active_task_count(),
            protocol_version: PROTOCOL_VERSION,
            timestamp: Utc::now(),
        }
    }

    pub fn cleanup(&mut self) {
        self.client = None;
        info!(agent = %self.agent_id, "A2A client closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    async fn spawn_remote(accept: bool) -> String {
        let app = Router::new()
            .route(
                "/.well-known/agent-card",
                get(|| async {
                    Json(json!({
                        "name": "notes-agent",
                        "description": "Stores notes",
                        "capabilities": ["page_management"],
                        "endpoints": {"tasks": "/a2a/tasks"}
                    }))
                }),
            )
            .route(
                "/a2a/tasks",
                post(move |Json(body): Json<Value>| async move {
                    if accept {
                        (StatusCode::OK, Json(json!({"task_id": format!("remote-{}", body["task_id"].as_str().unwrap())})))
                    } else {
                        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"error": "busy"})))
                    }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config_with_remote(url: &str, task_agent: bool) -> A2aConfig {
        A2aConfig {
            task_agent: task_agent.then(|| "notes".to_string()),
            remote_agents: vec![RemoteAgentConfig {
                name: "notes".into(),
                card_url: format!("{url}/.well-known/agent-card"),
                base_url: format!("{url}/a2a"),
                capabilities: vec!["page_management".into()],
            }],
            ..A2aConfig::default()
        }
    }

    #[tokio::test]
    async fn discovers_remote_agents() {
        let url = spawn_remote(true).await;
        let mut a2a = A2aManager::new("me", config_with_remote(&url, false));
        a2a.initialize().await.unwrap();

        let agents = a2a.list_available_agents();
        assert_eq!(agents.len(), 2);
        assert_eq!(agents["notes"].status, "available");
        assert_eq!(agents["notes"].version, "1.0.0");
        assert_eq!(agents["me"].status, "local");
        assert!(a2a.health_check().session_active);
    }

    #[tokio::test]
    async fn discovery_failure_is_not_fatal() {
        let config = A2aConfig {
            remote_agents: vec![RemoteAgentConfig {
                name: "ghost".into(),
                card_url: "http://127.0.0.1:9/.well-known/agent-card".into(),
                base_url: "http://127.0.0.1:9".into(),
                capabilities: vec![],
            }],
            ..A2aConfig::default()
        };
        let mut a2a = A2aManager::new("me", config);
        a2a.initialize().await.unwrap();
        assert_eq!(a2a.list_available_agents().len(), 1);
    }

    #[tokio::test]
    async fn send_task_accepted_and_rejected() {
        let ok_url = spawn_remote(true).await;
        let mut a2a = A2aManager::new("me", config_with_remote(&ok_url, false));
        a2a.initialize().await.unwrap();
        let task = a2a
            .send_task_to_agent("notes", json!({"message": "archive"}), Some("t1".into()))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.metadata["remote_task_id"], "remote-t1");

        let bad_url = spawn_remote(false).await;
        let mut a2a = A2aManager::new("me", config_with_remote(&bad_url, false));
        a2a.initialize().await.unwrap();
        let task = a2a
            .send_task_to_agent("notes", json!({}), None)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.metadata["error"], "HTTP 503");

        assert!(matches!(
            a2a.send_task_to_agent("nobody", json!({}), None).await,
            Err(A2aError::UnknownAgent(_))
        ));
    }

    #[tokio::test]
    async fn execute_task_locally_without_task_agent() {
        let mut a2a = A2aManager::new("me", A2aConfig::default());
        a2a.initialize().await.unwrap();
        let task = a2a.create_task("user_request", json!({"message": "run the backup"}), Map::new());
        let output = a2a.execute_task(&task.task_id).await.unwrap();
        assert_eq!(output["response"], "Task completed: run the backup");
        assert_eq!(
            a2a.get_task_status(&task.task_id).unwrap().status,
            TaskStatus::Completed
        );
        assert!(a2a.execute_task("task_missing").await.is_err());
    }

    #[tokio::test]
    async fn execute_task_dispatches_to_task_agent() {
        let url = spawn_remote(true).await;
        let mut a2a = A2aManager::new("me", config_with_remote(&url, true));
        a2a.initialize().await.unwrap();
        let task = a2a.create_task("user_request", json!({"message": "file it"}), Map::new());
        let output = a2a.execute_task(&task.task_id).await.unwrap();
        assert_eq!(output["status"], "in_progress");
        let stored = a2a.get_task_status(&task.task_id).unwrap();
        assert_eq!(stored.metadata["task_type"], "user_request");
        assert_eq!(stored.metadata["target_agent"], "notes");
    }

    #[tokio::test]
    async fn capabilities_appear_on_card() {
        let mut a2a = A2aManager::new("me", A2aConfig::default());
        a2a.initialize().await.unwrap();
        a2a.register_capability("memory_search", "Search memory", json!({"query": "string"}));
        let card = a2a.agent_card();
        assert!(card.capabilities.contains(&"memory_search".to_string()));
        assert_eq!(card.endpoints["tasks"], "http://localhost:8080/a2a/tasks");
        assert_eq!(card.metadata["capability_parameters"]["memory_search"]["query"], "string");
    }

    #[test]
    fn cancel_only_open_tasks() {
        let mut a2a = A2aManager::new("me", A2aConfig::default());
        let task = a2a.create_task("t", json!({}), Map::new());
        assert_eq!(a2a.cancel_task(&task.task_id).unwrap().status, TaskStatus::Canceled);
        assert!(a2a.cancel_task("nope").is_err());
    }

    #[test]
    fn finished_tasks_do_not_count_and_are_evicted() {
        let mut a2a = A2aManager::new("me", A2aConfig::default());
        let open = a2a.create_task("t", json!({}), Map::new());
        let first = a2a.create_task("t", json!({}), Map::new());
        a2a.cancel_task(&first.task_id).unwrap();
        assert_eq!(a2a.active_task_count(), 1);
        assert_eq!(a2a.health_check().active_tasks, 1);
        std::thread::sleep(Duration::from_millis(2));

        for _ in 0..FINISHED_TASK_LIMIT {
            let task = a2a.create_task("t", json!({}), Map::new());
            a2a.cancel_task(&task.task_id).unwrap();
        }
        assert!(a2a.get_task_status(&first.task_id).is_none());
        assert!(a2a.get_task_status(&open.task_id).is_some());
        assert_eq!(a2a.tasks.len(), FINISHED_TASK_LIMIT + 1);
        assert_eq!(a2a.active_task_count(), 1);
    }
}
