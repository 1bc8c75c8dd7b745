//! MCP `related_entities` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `related_entities` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RelatedEntitiesParams {
    #[schemars(description = "Entity id (e.g. 'person_1a2b...') or exact entity name")]
    pub entity: String,

    #[schemars(description = "Traversal depth (1-4). Defaults to 2.")]
    pub max_depth: Option<usize>,
}
