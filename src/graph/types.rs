//! Knowledge-graph type definitions.
//!
//! Defines [`EntityType`] and [`RelationType`] (the fixed category sets), [`Entity`]
//! (a merged node), [`TemporalEdge`] (a time-stamped inferred link) and [`Episode`]
//! (one extraction pass).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Categories of entities recognized in free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Project,
    Task,
    Meeting,
    Document,
    Concept,
    Preference,
    Skill,
    Goal,
    Location,
    Organization,
    Tool,
}

impl EntityType {
    pub const ALL: [EntityType; 12] = [
        Self::Person,
        Self::Project,
        Self::Task,
        Self::Meeting,
        Self::Document,
        Self::Concept,
        Self::Preference,
        Self::Skill,
        Self::Goal,
        Self::Location,
        Self::Organization,
        Self::Tool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Person => "person",
            Self::Project => "project",
            Self::Task => "task",
            Self::Meeting => "meeting",
            Self::Document => "document",
            Self::Concept => "concept",
            Self::Preference => "preference",
            Self::Skill => "skill",
            Self::Goal => "goal",
            Self::Location => "location",
            Self::Organization => "organization",
            Self::Tool => "tool",
        }
    }

    /// Entity kinds that form `temporal_follows` chains when several appear in one episode.
    pub fn is_sequential(&self) -> bool {
        matches!(self, Self::Task | Self::Meeting | Self::Project)
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Labels for inferred edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    WorksOn,
    CollaboratesWith,
    DependsOn,
    RelatesTo,
    Owns,
    Prefers,
    LocatedAt,
    Uses,
    Learns,
    Creates,
    Mentions,
    TemporalFollows,
}

impl RelationType {
    pub const ALL: [RelationType; 12] = [
        Self::WorksOn,
        Self::CollaboratesWith,
        Self::DependsOn,
        Self::RelatesTo,
        Self::Owns,
        Self::Prefers,
        Self::LocatedAt,
        Self::Uses,
        Self::Learns,
        Self::Creates,
        Self::Mentions,
        Self::TemporalFollows,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorksOn => "works_on",
            Self::CollaboratesWith => "collaborates_with",
            Self::DependsOn => "depends_on",
            Self::RelatesTo => "relates_to",
            Self::Owns => "owns",
            Self::Prefers => "prefers",
            Self::LocatedAt => "located_at",
            Self::Uses => "uses",
            Self::Learns => "learns",
            Self::Creates => "creates",
            Self::Mentions => "mentions",
            Self::TemporalFollows => "temporal_follows",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named thing recognized in text, merged across episodes by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// `{type}_{hash}` of the type and lower-cased name.
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub name: String,
    pub description: Option<String>,
    pub properties: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Episodes that mention this entity, in ingestion order.
    pub episode_ids: Vec<String>,
}

/// A directed, weighted, time-stamped link between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalEdge {
    pub source_id: String,
    pub target_id: String,
    pub relation: RelationType,
    /// Weight in `[0.0, 1.0]`; closer co-mentions score higher.
    pub weight: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub episode_ids: Vec<String>,
    pub metadata: serde_json::Value,
}

impl TemporalEdge {
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation: RelationType,
        weight: f64,
        episode_id: &str,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation,
            weight,
            valid_from: now,
            valid_to: None,
            created_at: now,
            episode_ids: vec![episode_id.to_string()],
            metadata,
        }
    }

    /// Whether the edge holds at `at`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.valid_from && self.valid_to.map_or(true, |end| at < end)
    }
}

/// One extraction pass over a piece of text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub content: String,
    /// Where the text came from (`user`, `notion`, `memory_engine`, ...).
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub entities: Vec<Entity>,
    pub relations: Vec<TemporalEdge>,
    pub processed: bool,
}

impl Episode {
    pub fn entity_names(&self) -> Vec<String> {
        self.entities.iter().map(|e| e.name.clone()).collect()
    }

    /// `(source_id, relation, target_id)` triples for memory context.
    pub fn relation_triples(&self) -> Vec<(String, String, String)> {
        self.relations
            .iter()
            .map(|r| {
                (
                    r.source_id.clone(),
                    r.relation.as_str().to_string(),
                    r.target_id.clone(),
                )
            })
            .collect()
    }
}
