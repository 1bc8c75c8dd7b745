//! Model Context Protocol client.
//!
//! Launches configured MCP servers as child processes and speaks newline-delimited
//! JSON-RPC 2.0 over their stdio. The framing works over any `AsyncRead`/`AsyncWrite`
//! pair, so servers can also be attached over in-process streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::{expand_tilde, McpConfig};

pub use crate::config::McpServerEntry as McpServerConfig;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
const CONFIG_FILE: &str = "mcp_servers.json";
const ESSENTIAL_SERVERS: [&str; 2] = ["filesystem", "git"];

#[derive(Error, Debug)]
pub enum McpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("MCP server {0} is not configured")]
    UnknownServer(String),

    #[error("MCP server {0} is not running")]
    NotRunning(String),

    #[error("tool {tool} not available on server {server}")]
    UnknownTool { server: String, tool: String },

    #[error("failed to start MCP server {server}: {source}")]
    Spawn {
        server: String,
        source: std::io::Error,
    },

    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("{method} timed out after {secs}s")]
    Timeout { method: String, secs: u64 },

    #[error("server closed the connection")]
    Closed,

    #[error("invalid MCP configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Stopped,
    Running,
    Failed,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct McpTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub server: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatusInfo {
    pub name: String,
    pub status: ServerStatus,
    pub command: String,
    pub capabilities: Vec<String>,
    pub tools_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct McpHealth {
    pub agent_id: String,
    pub servers_configured: usize,
    pub servers_running: usize,
    pub tools_available: usize,
    pub protocol_version: &'static str,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// JSON-RPC framing
// ---------------------------------------------------------------------------

type BoxReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One JSON-RPC session with a server. Requests are strictly sequential.
pub struct RpcConnection {
    lines: Lines<BufReader<BoxReader>>,
    writer: BoxWriter,
    next_id: u64,
}

impl RpcConnection {
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let reader: BoxReader = Box::new(reader);
        Self {
            lines: BufReader::new(reader).lines(),
            writer: Box::new(writer),
            next_id: 0,
        }
    }

    async fn send(&mut self, message: &Value) -> Result<(), McpError> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Send a request and wait for the response carrying the same id.
    /// Notifications and unparseable lines in between are skipped.
    pub async fn request(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        self.next_id += 1;
        let id = self.next_id;
        self.send(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await?;

        loop {
            let line = self.lines.next_line().await?.ok_or(McpError::Closed)?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "skipping non-JSON line from MCP server");
                    continue;
                }
            };
            if message.get("id").and_then(Value::as_u64) != Some(id) {
                continue;
            }
            if let Some(err) = message.get("error") {
                return Err(McpError::Rpc {
                    code: err["code"].as_i64().unwrap_or(-32603),
                    message: err["message"].as_str().unwrap_or("unknown error").to_string(),
                });
            }
            return Ok(message.get("result").cloned().unwrap_or(Value::Null));
        }
    }

    pub async fn notify(&mut self, method: &str, params: Value) -> Result<(), McpError> {
        self.send(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    /// `initialize` handshake followed by the `notifications/initialized` notification.
    pub async fn initialize(&mut self, client_name: &str) -> Result<Value, McpError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": client_name, "version": env!("CARGO_PKG_VERSION")},
                }),
            )
            .await?;
        self.notify("notifications/initialized", json!({})).await?;
        Ok(result)
    }
}

/// Concatenate the text parts of a `tools/call` result.
pub fn tool_result_text(result: &Value) -> String {
    result["content"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct ServerHandle {
    config: McpServerConfig,
    status: ServerStatus,
    child: Option<Child>,
    conn: Option<RpcConnection>,
}

impl ServerHandle {
    fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            status: ServerStatus::Stopped,
            child: None,
            conn: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ServersFile {
    #[serde(rename = "mcpServers", default)]
    servers: BTreeMap<String, FileServerEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FileServerEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    capabilities: Vec<String>,
}

pub struct McpManager {
    agent_id: String,
    config: McpConfig,
    servers: BTreeMap<String, ServerHandle>,
    /// Keyed by `{server}_{tool}`.
    tools: BTreeMap<String, McpTool>,
}

fn tool_key(server: &str, tool: &str) -> String {
    format!("{server}_{tool}")
}

impl McpManager {
    pub fn new(agent_id: impl Into<String>, config: McpConfig) -> Self {
        let servers = config
            .servers
            .iter()
            .map(|s| (s.name.clone(), ServerHandle::new(s.clone())))
            .collect();
        Self {
            agent_id: agent_id.into(),
            config,
            servers,
            tools: BTreeMap::new(),
        }
    }

    fn config_file(&self) -> PathBuf {
        expand_tilde(&self.config.config_dir).join(CONFIG_FILE)
    }

    /// Merge servers from `mcp_servers.json` (writing a default file when absent),
    /// then start the autostart servers. Autostart failures are logged only.
    pub async fn initialize(&mut self) -> Result<(), McpError> {
        let path = self.config_file();
        if tokio::fs::try_exists(&path).await? {
            self.load_servers_file(&path).await?;
        } else if let Err(e) = self.write_servers_file(&path).await {
            warn!(path = %path.display(), error = %e, "could not write default MCP config");
        }

        for server in self.config.autostart.clone() {
            if let Err(e) = self.start_server(&server).await {
                warn!(server = %server, error = %e, "autostart failed");
            }
        }

        info!(
            servers = self.servers.len(),
            running = self.running_count(),
            "MCP client initialized"
        );
        Ok(())
    }

    async fn load_servers_file(&mut self, path: &Path) -> Result<(), McpError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let file: ServersFile = serde_json::from_str(&raw).map_err(|e| McpError::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        for (name, entry) in file.servers {
            let config = McpServerConfig {
                name: name.clone(),
                command: entry.command,
                args: entry.args,
                env: entry.env,
                capabilities: entry.capabilities,
            };
            self.servers.insert(name, ServerHandle::new(config));
        }
        debug!(path = %path.display(), "loaded MCP server config");
        Ok(())
    }

    async fn write_servers_file(&self, path: &Path) -> Result<(), McpError> {
        let file = ServersFile {
            servers: self
                .servers
                .values()
                .map(|h| {
                    let c = &h.config;
                    let entry = FileServerEntry {
                        command: c.command.clone(),
                        args: c.args.clone(),
                        env: c.env.clone(),
                        capabilities: c.capabilities.clone(),
                    };
                    (c.name.clone(), entry)
                })
                .collect(),
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_string_pretty(&file)?).await?;
        info!(path = %path.display(), "wrote default MCP config");
        Ok(())
    }

    /// Register a server at runtime. Replaces any stopped entry with the same name.
    pub fn add_server(&mut self, config: McpServerConfig) {
        self.servers
            .insert(config.name.clone(), ServerHandle::new(config));
    }

    /// Spawn the server process and attach to its stdio.
    pub async fn start_server(&mut self, server_id: &str) -> Result<(), McpError> {
        let handle = self
            .servers
            .get_mut(server_id)
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
        if handle.status == ServerStatus::Running {
            return Ok(());
        }

        let cfg = handle.config.clone();
        let spawned = Command::new(&cfg.command)
            .args(&cfg.args)
            .envs(&cfg.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                handle.status = ServerStatus::Failed;
                return Err(McpError::Spawn {
                    server: server_id.to_string(),
                    source,
                });
            }
        };

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            handle.status = ServerStatus::Failed;
            let _ = child.start_kill();
            return Err(McpError::Closed);
        };

        match self.connect_stream(server_id, stdout, stdin).await {
            Ok(_) => {
                if let Some(handle) = self.servers.get_mut(server_id) {
                    handle.child = Some(child);
                }
                Ok(())
            }
            Err(e) => {
                let _ = child.start_kill();
                Err(e)
            }
        }
    }

    /// Handshake with a server over an already-open stream and discover its tools.
    /// When `tools/list` is unavailable, the server's declared capabilities become
    /// its tools. Returns the number of tools registered.
    pub async fn connect_stream<R, W>(
        &mut self,
        server_id: &str,
        reader: R,
        writer: W,
    ) -> Result<usize, McpError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let cfg = self
            .servers
            .get(server_id)
            .map(|h| h.config.clone())
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
        let secs = self.config.request_timeout_secs;
        let limit = Duration::from_secs(secs);
        let mut conn = RpcConnection::new(reader, writer);

        let handshake = match tokio::time::timeout(limit, conn.initialize(&self.agent_id)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                method: "initialize".into(),
                secs,
            }),
        };
        let server_info = match handshake {
            Ok(info) => info,
            Err(e) => {
                if let Some(h) = self.servers.get_mut(server_id) {
                    h.status = ServerStatus::Failed;
                }
                warn!(server = server_id, error = %e, "MCP handshake failed");
                return Err(e);
            }
        };

        let listed = tokio::time::timeout(limit, conn.request("tools/list", json!({}))).await;
        let mut tools = match listed {
            Ok(Ok(result)) => parse_tools(server_id, &result),
            Ok(Err(e)) => {
                debug!(server = server_id, error = %e, "tools/list failed, using declared capabilities");
                Vec::new()
            }
            Err(_) => {
                debug!(server = server_id, "tools/list timed out, using declared capabilities");
                Vec::new()
            }
        };
        if tools.is_empty() {
            tools = fallback_tools(&cfg);
        }

        self.tools.retain(|_, t| t.server != server_id);
        let count = tools.len();
        for tool in tools {
            self.tools.insert(tool_key(server_id, &tool.name), tool);
        }

        if let Some(h) = self.servers.get_mut(server_id) {
            h.conn = Some(conn);
            h.status = ServerStatus::Running;
        }
        info!(
            server = server_id,
            tools = count,
            server_name = server_info["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            "MCP server started"
        );
        Ok(count)
    }

    /// Stop a server and drop its tools. Returns whether it was running.
    pub async fn stop_server(&mut self, server_id: &str) -> Result<bool, McpError> {
        let handle = self
            .servers
            .get_mut(server_id)
            .ok_or_else(|| McpError::UnknownServer(server_id.to_string()))?;
        let was_running = handle.status == ServerStatus::Running;
        handle.conn = None;
        if let Some(mut child) = handle.child.take() {
            if let Err(e) = child.kill().await {
                warn!(server = server_id, error = %e, "failed to kill MCP server");
            }
        }
        handle.status = ServerStatus::Stopped;
        self.tools.retain(|_, t| t.server != server_id);
        info!(server = server_id, "MCP server stopped");
        Ok(was_running)
    }

    /// Start the filesystem and git servers where configured.
    pub async fn start_essential_servers(&mut self) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        for name in ESSENTIAL_SERVERS {
            if !self.servers.contains_key(name) {
                continue;
            }
            let ok = match self.start_server(name).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(server = name, error = %e, "essential server failed to start");
                    false
                }
            };
            results.insert(name.to_string(), ok);
        }
        results
    }

    pub fn discover_tools(&self, server_id: &str) -> Vec<McpTool> {
        self.tools
            .values()
            .filter(|t| t.server == server_id)
            .cloned()
            .collect()
    }

    /// Call a tool on a running server. `tool` may carry the `{server}_` prefix.
    pub async fn execute_tool(
        &mut self,
        server_id: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpError> {
        let prefix = format!("{server_id}_");
        let name = if self.tools.contains_key(&tool_key(server_id, tool)) {
            tool
        } else {
            tool.strip_prefix(&prefix).unwrap_or(tool)
        };
        if !self.tools.contains_key(&tool_key(server_id, name)) {
            if !self.servers.contains_key(server_id) {
                return Err(McpError::UnknownServer(server_id.to_string()));
            }
            if self.servers[server_id].status != ServerStatus::Running {
                return Err(McpError::NotRunning(server_id.to_string()));
            }
            return Err(McpError::UnknownTool {
                server: server_id.to_string(),
                tool: tool.to_string(),
            });
        }

        let secs = self.config.request_timeout_secs;
        let conn = self
            .servers
            .get_mut(server_id)
            .filter(|h| h.status == ServerStatus::Running)
            .and_then(|h| h.conn.as_mut())
            .ok_or_else(|| McpError::NotRunning(server_id.to_string()))?;

        let call = conn.request("tools/call", json!({"name": name, "arguments": arguments}));
        let result = tokio::time::timeout(Duration::from_secs(secs), call)
            .await
            .map_err(|_| McpError::Timeout {
                method: "tools/call".into(),
                secs,
            })??;
        debug!(server = server_id, tool = name, "MCP tool executed");
        Ok(result)
    }

    pub fn list_available_tools(&self) -> BTreeMap<String, McpTool> {
        self.tools.clone()
    }

    pub fn server_status(&self) -> BTreeMap<String, ServerStatusInfo> {
        self.servers
            .iter()
            .map(|(name, h)| {
                let info = ServerStatusInfo {
                    name: name.clone(),
                    status: h.status,
                    command: h.config.command.clone(),
                    capabilities: h.config.capabilities.clone(),
                    tools_count: self.tools.values().filter(|t| &t.server == name).count(),
                };
                (name.clone(), info)
            })
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.servers
            .values()
            .filter(|h| h.status == ServerStatus::Running)
            .count()
    }

    pub fn is_running(&self, server_id: &str) -> bool {
        self.servers
            .get(server_id)
            .is_some_and(|h| h.status == ServerStatus::Running)
    }

    pub fn health_check(&self) -> McpHealth {
        McpHealth {
            agent_id: self.agent_id.clone(),
            servers_configured: self.servers.len(),
            servers_running: self.running_count(),
            tools_available: self.tools.len(),
            protocol_version: "MCP-2025-06-18",
            timestamp: Utc::now(),
        }
    }

    pub async fn disconnect_all(&mut self) {
        let names: Vec<String> = self.servers.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop_server(&name).await {
                warn!(server = %name, error = %e, "failed to stop MCP server");
            }
        }
        info!("all MCP servers disconnected");
    }
}

fn parse_tools(server: &str, result: &Value) -> Vec<McpTool> {
    result["tools"]
        .as_array()
        .map(|tools| {
            tools
                .iter()
                .filter_map(|t| {
                    Some(McpTool {
                        name: t["name"].as_str()?.to_string(),
                        description: t["description"].as_str().unwrap_or_default().to_string(),
                        input_schema: t
                            .get("inputSchema")
                            .cloned()
                            .unwrap_or_else(|| json!({"type": "object"})),
                        server: server.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn fallback_tools(config: &McpServerConfig) -> Vec<McpTool> {
    config
        .capabilities
        .iter()
        .map(|cap| McpTool {
            name: cap.clone(),
            description: format!("{cap} via {}", config.name),
            input_schema: json!({
                "type": "object",
                "properties": {"input": {"type": "string"}}
            }),
            server: config.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Minimal MCP server: answers initialize, tools/list and tools/call, and
    /// emits a log notification before every response.
    async fn fake_server(stream: DuplexStream, list_tools: bool) {
        let (r, mut w) = tokio::io::split(stream);
        let mut lines = BufReader::new(r).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let msg: Value = serde_json::from_str(&line).unwrap();
            let Some(id) = msg.get("id").cloned() else {
                continue;
            };
            let reply = match msg["method"].as_str().unwrap() {
                "initialize" => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "protocolVersion": msg["params"]["protocolVersion"],
                    "serverInfo": {"name": "fake-fs"},
                    "capabilities": {"tools": {}}
                }}),
                "tools/list" if list_tools => json!({"jsonrpc": "2.0", "id": id, "result": {
                    "tools": [{
                        "name": "read_file",
                        "description": "Read a file",
                        "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
                    }]
                }}),
                "tools/call" if msg["params"]["name"] == "read_file" => {
                    let path = msg["params"]["arguments"]["path"].as_str().unwrap_or("?");
                    json!({"jsonrpc": "2.0", "id": id, "result": {
                        "content": [{"type": "text", "text": format!("contents of {path}")}]
                    }})
                }
                _ => json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": "Method not found"}}),
            };
            w.write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",\"params\":{}}\n")
                .await
                .unwrap();
            w.write_all(format!("{reply}\n").as_bytes()).await.unwrap();
        }
    }

    fn manager(dir: &Path) -> McpManager {
        let config = McpConfig {
            config_dir: dir.to_string_lossy().into_owned(),
            request_timeout_secs: 1,
            ..McpConfig::default()
        };
        McpManager::new("tester", config)
    }

    async fn attach(mgr: &mut McpManager, server: &str, list_tools: bool) -> usize {
        let (client, remote) = tokio::io::duplex(16 * 1024);
        tokio::spawn(fake_server(remote, list_tools));
        let (r, w) = tokio::io::split(client);
        mgr.connect_stream(server, r, w).await.unwrap()
    }

    #[tokio::test]
    async fn initialize_writes_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        mgr.initialize().await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        let file: Value = serde_json::from_str(&raw).unwrap();
        assert!(file["mcpServers"]["filesystem"]["command"].is_string());
        assert!(file["mcpServers"]["git"].is_object());
        assert_eq!(mgr.running_count(), 0);
    }

    #[tokio::test]
    async fn initialize_reads_user_servers() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            r#"{"mcpServers": {"notes": {"command": "notes-mcp", "capabilities": ["search_notes"]}}}"#,
        )
        .unwrap();
        let mut mgr = manager(tmp.path());
        mgr.initialize().await.unwrap();

        let status = mgr.server_status();
        assert_eq!(status.len(), 3);
        assert_eq!(status["notes"].command, "notes-mcp");
        assert_eq!(status["notes"].status, ServerStatus::Stopped);
    }

    #[tokio::test]
    async fn malformed_config_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "{not json").unwrap();
        let mut mgr = manager(tmp.path());
        assert!(matches!(mgr.initialize().await, Err(McpError::Config { .. })));
    }

    #[tokio::test]
    async fn handshake_discovers_and_calls_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        assert_eq!(attach(&mut mgr, "filesystem", true).await, 1);
        assert!(mgr.is_running("filesystem"));

        let tools = mgr.discover_tools("filesystem");
        assert_eq!(tools[0].name, "read_file");
        assert_eq!(mgr.server_status()["filesystem"].tools_count, 1);

        let result = mgr
            .execute_tool("filesystem", "read_file", json!({"path": "notes.md"}))
            .await
            .unwrap();
        assert_eq!(tool_result_text(&result), "contents of notes.md");

        // Prefixed names resolve to the same tool.
        let result = mgr
            .execute_tool("filesystem", "filesystem_read_file", json!({"path": "a"}))
            .await
            .unwrap();
        assert_eq!(tool_result_text(&result), "contents of a");

        let health = mgr.health_check();
        assert_eq!(health.servers_running, 1);
        assert_eq!(health.tools_available, 1);
        assert_eq!(health.protocol_version, "MCP-2025-06-18");
    }

    #[tokio::test]
    async fn falls_back_to_declared_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        assert_eq!(attach(&mut mgr, "git", false).await, 4);
        let tools = mgr.list_available_tools();
        assert!(tools.contains_key("git_git_log"));
        assert_eq!(tools["git_git_log"].input_schema["properties"]["input"]["type"], "string");
    }

    #[tokio::test]
    async fn rpc_errors_surface() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        attach(&mut mgr, "git", false).await;
        // Declared but unimplemented on the fake server.
        let err = mgr
            .execute_tool("git", "git_status", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Rpc { code: -32601, .. }));

        let err = mgr.execute_tool("git", "rebase", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
        let err = mgr
            .execute_tool("filesystem", "read_file", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::NotRunning(_)));
    }

    #[tokio::test]
    async fn stop_server_removes_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        attach(&mut mgr, "filesystem", true).await;
        attach(&mut mgr, "git", false).await;
        assert!(mgr.stop_server("filesystem").await.unwrap());
        assert!(mgr.discover_tools("filesystem").is_empty());
        assert_eq!(mgr.discover_tools("git").len(), 4);
        assert!(!mgr.stop_server("filesystem").await.unwrap());

        mgr.disconnect_all().await;
        assert_eq!(mgr.running_count(), 0);
        assert!(mgr.list_available_tools().is_empty());
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        let (client, _remote) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(client);
        let err = mgr.connect_stream("filesystem", r, w).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
        assert_eq!(mgr.server_status()["filesystem"].status, ServerStatus::Failed);
    }

    #[tokio::test]
    async fn missing_binary_marks_server_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        mgr.add_server(McpServerConfig {
            name: "broken".into(),
            command: "persona-no-such-mcp-binary".into(),
            args: vec![],
            env: HashMap::new(),
            capabilities: vec![],
        });
        assert!(matches!(
            mgr.start_server("broken").await,
            Err(McpError::Spawn { .. })
        ));
        assert_eq!(mgr.server_status()["broken"].status, ServerStatus::Failed);
        assert!(matches!(
            mgr.start_server("nope").await,
            Err(McpError::UnknownServer(_))
        ));
    }

    fn missing_binary(name: &str) -> McpServerConfig {
        McpServerConfig {
            name: name.into(),
            command: format!("persona-no-such-{name}-binary"),
            args: vec![],
            env: HashMap::new(),
            capabilities: vec![],
        }
    }

    #[tokio::test]
    async fn essential_servers_fail_independently() {
        let tmp = tempfile::tempdir().unwrap();
        let mut bare = McpManager::new(
            "tester",
            McpConfig {
                servers: vec![],
                ..McpConfig::default()
            },
        );
        assert!(bare.start_essential_servers().await.is_empty());

        let mut mgr = manager(tmp.path());
        mgr.add_server(missing_binary("filesystem"));
        mgr.add_server(missing_binary("git"));
        mgr.add_server(missing_binary("notes"));
        let results = mgr.start_essential_servers().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results.get("filesystem"), Some(&false));
        assert_eq!(results.get("git"), Some(&false));

        let status = mgr.server_status();
        assert_eq!(status["filesystem"].status, ServerStatus::Failed);
        assert_eq!(status["git"].status, ServerStatus::Failed);
        assert_eq!(status["notes"].status, ServerStatus::Stopped);
        assert_eq!(mgr.running_count(), 0);
    }

    #[tokio::test]
    async fn essential_servers_skip_running_ones() {
        let tmp = tempfile::tempdir().unwrap();
        let mut mgr = manager(tmp.path());
        mgr.add_server(missing_binary("git"));
        attach(&mut mgr, "filesystem", true).await;

        let results = mgr.start_essential_servers().await;
        assert_eq!(results.get("filesystem"), Some(&true));
        assert_eq!(results.get("git"), Some(&false));
        assert!(mgr.is_running("filesystem"));
    }
}
