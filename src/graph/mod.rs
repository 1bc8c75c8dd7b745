pub mod engine;
pub mod extract;
pub mod types;

pub use engine::{episode_sync_metadata, GraphEngine, GraphStats, RelatedEntities, RelatedEntity};
pub use extract::{entity_id, EntityExtractor, Mention};
pub use types::{Entity, EntityType, Episode, RelationType, TemporalEdge};

/// Graph handle shared between the memory engine, the agent loop and the Notion bridge.
/// Never held across an `.await`.
pub type SharedGraph = std::sync::Arc<std::sync::Mutex<GraphEngine>>;
