use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PersonaConfig {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub store: StoreConfig,
    pub zep: ZepConfig,
    pub a2a: A2aConfig,
    pub mcp: McpConfig,
    pub notion: NotionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `stdio` or `http`.
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub user_id: String,
    pub name: String,
    pub enable_a2a: bool,
    pub enable_mcp: bool,
    pub enable_graph: bool,
    pub enable_notion: bool,
    pub enable_learning: bool,
    pub enable_preferences: bool,
    /// Capacity of the advisory message queue.
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_working_memory: usize,
    pub auto_summarize: bool,
    pub enable_clustering: bool,
    pub consolidation_hours: u64,
    pub transient_ttl_hours: f64,
    pub search_limit: usize,
    pub min_search_score: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// `local` (SQLite), `zep`, or `none`.
    pub backend: String,
    pub db_path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ZepConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct A2aConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Remote agent that receives `task_execution` requests. Tasks complete
    /// locally when unset or undiscovered.
    pub task_agent: Option<String>,
    pub remote_agents: Vec<RemoteAgentConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteAgentConfig {
    pub name: String,
    pub card_url: String,
    pub base_url: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct McpConfig {
    pub config_dir: String,
    /// Servers started when the agent initializes.
    pub autostart: Vec<String>,
    pub request_timeout_secs: u64,
    pub servers: Vec<McpServerEntry>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct McpServerEntry {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: std::collections::HashMap<String, String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotionConfig {
    pub max_pages_per_sync: usize,
    pub min_content_length: usize,
    pub history_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 7341,
            log_level: "info".into(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            user_id: "default".into(),
            name: "PersonalAgent".into(),
            enable_a2a: true,
            enable_mcp: true,
            enable_graph: true,
            enable_notion: false,
            enable_learning: true,
            enable_preferences: true,
            queue_capacity: 64,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_working_memory: 10,
            auto_summarize: true,
            enable_clustering: true,
            consolidation_hours: 24,
            transient_ttl_hours: 24.0,
            search_limit: 5,
            min_search_score: 0.5,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        let db_path = default_persona_dir()
            .join("memory.db")
            .to_string_lossy()
            .into_owned();
        Self {
            backend: "local".into(),
            db_path,
        }
    }
}

impl Default for ZepConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.getzep.com".into(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for A2aConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            timeout_secs: 30,
            task_agent: None,
            remote_agents: Vec::new(),
        }
    }
}

impl Default for McpConfig {
    fn default() -> Self {
        let config_dir = default_persona_dir()
            .join("mcp")
            .to_string_lossy()
            .into_owned();
        Self {
            config_dir,
            autostart: Vec::new(),
            request_timeout_secs: 30,
            servers: vec![
                McpServerEntry {
                    name: "filesystem".into(),
                    command: "npx".into(),
                    args: vec![
                        "-y".into(),
                        "@modelcontextprotocol/server-filesystem".into(),
                        ".".into(),
                    ],
                    env: Default::default(),
                    capabilities: vec![
                        "read_file".into(),
                        "write_file".into(),
                        "list_directory".into(),
                        "search_files".into(),
                    ],
                },
                McpServerEntry {
                    name: "git".into(),
                    command: "npx".into(),
                    args: vec![
                        "-y".into(),
                        "@modelcontextprotocol/server-git".into(),
                        "--repository".into(),
                        ".".into(),
                    ],
                    env: Default::default(),
                    capabilities: vec![
                        "git_log".into(),
                        "git_diff".into(),
                        "git_show".into(),
                        "git_status".into(),
                    ],
                },
            ],
        }
    }
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            max_pages_per_sync: 50,
            min_content_length: 50,
            history_size: 10,
        }
    }
}

/// Returns `~/.persona/`
pub fn default_persona_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".persona")
}

/// Returns the default config file path: `~/.persona/config.toml`
pub fn default_config_path() -> PathBuf {
    default_persona_dir().join("config.toml")
}

impl PersonaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            PersonaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PERSONA_DB") {
            self.store.db_path = val;
        }
        if let Ok(val) = std::env::var("PERSONA_STORE") {
            self.store.backend = val;
        }
        if let Ok(val) = std::env::var("PERSONA_USER") {
            self.agent.user_id = val;
        }
        if let Ok(val) = std::env::var("PERSONA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("ZEP_API_KEY") {
            self.zep.api_key = Some(val);
        }
        if let Ok(val) = std::env::var("ZEP_API_URL") {
            self.zep.api_url = val;
        }
    }

    /// Resolve the database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.store.db_path)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
