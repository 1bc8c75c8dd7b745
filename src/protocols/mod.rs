pub mod a2a;
pub mod mcp;

pub use a2a::{A2aError, A2aManager, A2aTask, AgentCard, TaskStatus};
pub use mcp::{McpError, McpManager, McpServerConfig, McpTool, ServerStatus};
