//! MCP `process_message` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `process_message` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProcessMessageParams {
    #[schemars(description = "The message text to route through the agent")]
    pub content: String,

    #[schemars(description = "Where the message came from (user, notion, mcp, ...). Defaults to 'mcp'.")]
    pub source: Option<String>,

    #[schemars(
        description = "Whether the message feeds the knowledge graph and is written to memory. Defaults to true."
    )]
    pub remember: Option<bool>,

    #[schemars(description = "Priority 1-10. Defaults to 5.")]
    pub priority: Option<u8>,
}
