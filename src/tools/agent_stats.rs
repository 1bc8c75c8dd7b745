//! MCP `agent_stats` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `agent_stats` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AgentStatsParams {
    #[schemars(description = "Also include component health. Defaults to false.")]
    pub include_health: Option<bool>,
}
