//! MCP `search_memories` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_memories` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoriesParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Only return these memory types (e.g. ['episodic', 'preference'])")]
    pub types: Option<Vec<String>>,

    #[schemars(description = "Maximum number of results. Defaults to the configured search limit.")]
    pub limit: Option<usize>,

    #[schemars(description = "Minimum store score (0.0-1.0). Defaults to the configured minimum.")]
    pub min_score: Option<f64>,
}
