//! MCP `query_entities` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `query_entities` MCP tool.
///
/// With `type`, lists entities of that kind; with `text`, finds entities named in it.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct QueryEntitiesParams {
    #[schemars(
        description = "Entity type: 'person', 'project', 'task', 'meeting', 'document', 'concept', 'preference', 'skill', 'goal', 'location', 'organization', 'tool'"
    )]
    pub r#type: Option<String>,

    #[schemars(description = "Free text; returns entities whose names appear in it")]
    pub text: Option<String>,

    #[schemars(description = "Maximum number of entities. Defaults to 10.")]
    pub limit: Option<usize>,
}
