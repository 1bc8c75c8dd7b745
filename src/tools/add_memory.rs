//! MCP `add_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `add_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    #[schemars(description = "The natural language content of the memory")]
    pub content: String,

    #[schemars(description = "Optional assistant reply stored alongside the content")]
    pub response: Option<String>,

    #[schemars(
        description = "Memory type: 'episodic', 'semantic', 'procedural', 'working', 'preference', 'behavioral'. Defaults to 'episodic'."
    )]
    pub r#type: Option<String>,

    #[schemars(
        description = "Importance: 'critical', 'high', 'medium', 'low', 'transient'. High and critical go to long-term memory. Defaults to 'medium'."
    )]
    pub importance: Option<String>,

    #[schemars(description = "Optional JSON object of extra metadata")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}
