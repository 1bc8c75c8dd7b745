//! In-process temporal knowledge graph.
//!
//! [`GraphEngine::ingest_episode`] is the single write entry point: extract mentions,
//! merge them into the entity map, infer co-occurrence and sequence edges, and record
//! the episode. Reads (type search, neighbourhood traversal, stats) never mutate.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::extract::{EntityExtractor, Mention};
use super::types::{Entity, EntityType, Episode, RelationType, TemporalEdge};

/// Weight given to `temporal_follows` edges.
const SEQUENCE_WEIGHT: f64 = 0.8;
/// Weight used when a name cannot be located in the text.
const DEFAULT_WEIGHT: f64 = 0.5;
const MIN_WEIGHT: f64 = 0.1;

/// A neighbour reached during traversal.
#[derive(Debug, Clone, Serialize)]
pub struct RelatedEntity {
    pub entity: Entity,
    pub relation: RelationType,
    pub weight: f64,
    pub depth: usize,
    /// Entity this one was reached through; `None` for direct neighbours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelatedEntities {
    pub direct: Vec<RelatedEntity>,
    pub indirect: Vec<RelatedEntity>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub total_episodes: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
    pub last_update: Option<DateTime<Utc>>,
    pub user_id: String,
}

pub struct GraphEngine {
    user_id: String,
    extractor: EntityExtractor,
    entities: HashMap<String, Entity>,
    edges: Vec<TemporalEdge>,
    episodes: HashMap<String, Episode>,
    episode_seq: u64,
}

impl GraphEngine {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            extractor: EntityExtractor::new(),
            entities: HashMap::new(),
            edges: Vec::new(),
            episodes: HashMap::new(),
            episode_seq: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Extract entities and relations from `content` and merge them into the graph.
    pub fn ingest_episode(
        &mut self,
        content: &str,
        source: &str,
        metadata: serde_json::Value,
    ) -> Episode {
        self.episode_seq += 1;
        let now = Utc::now();
        let episode_id = format!(
            "ep_{}_{}_{}",
            now.format("%Y%m%d_%H%M%S"),
            source,
            self.episode_seq
        );
        tracing::debug!(episode = %episode_id, source, "processing episode");

        let mentions = self.extractor.extract(content);
        let entities: Vec<Entity> = mentions
            .iter()
            .map(|m| self.merge_mention(m, content, &episode_id, now))
            .collect();

        let positioned: Vec<(&Entity, usize)> = entities
            .iter()
            .zip(mentions.iter().map(|m| m.position))
            .collect();
        let relations = infer_relations(&positioned, content, &episode_id);
        self.edges.extend(relations.iter().cloned());

        let episode = Episode {
            id: episode_id.clone(),
            content: content.to_string(),
            source: source.to_string(),
            timestamp: now,
            metadata,
            entities,
            relations,
            processed: true,
        };
        self.episodes.insert(episode_id.clone(), episode.clone());

        tracing::info!(
            episode = %episode_id,
            entities = episode.entities.len(),
            relations = episode.relations.len(),
            graph_entities = self.entities.len(),
            graph_edges = self.edges.len(),
            "episode ingested"
        );

        episode
    }

    /// Insert a new entity or fold the mention into the existing one. Returns a snapshot.
    fn merge_mention(
        &mut self,
        mention: &Mention,
        content: &str,
        episode_id: &str,
        now: DateTime<Utc>,
    ) -> Entity {
        let properties = self.extractor.properties(mention.entity_type, content);

        let entity = self
            .entities
            .entry(mention.id.clone())
            .and_modify(|existing| {
                existing.last_seen = now;
                existing.updated_at = now;
                if !existing.episode_ids.iter().any(|e| e == episode_id) {
                    existing.episode_ids.push(episode_id.to_string());
                }
                existing.properties.extend(properties.clone());
            })
            .or_insert_with(|| Entity {
                id: mention.id.clone(),
                entity_type: mention.entity_type,
                name: mention.name.clone(),
                description: None,
                properties,
                created_at: now,
                updated_at: now,
                first_seen: now,
                last_seen: now,
                confidence: 1.0,
                episode_ids: vec![episode_id.to_string()],
            });

        entity.clone()
    }

    pub fn get_entity(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.get(entity_id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn edges(&self) -> &[TemporalEdge] {
        &self.edges
    }

    pub fn episode(&self, episode_id: &str) -> Option<&Episode> {
        self.episodes.get(episode_id)
    }

    /// Entities of one type, most recently seen first.
    pub fn search_entities_by_type(&self, entity_type: EntityType, limit: usize) -> Vec<Entity> {
        let mut found: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| e.entity_type == entity_type)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.name.cmp(&b.name)));
        found.truncate(limit);
        found
    }

    /// Case-insensitive exact-name lookup.
    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        let wanted = name.trim().to_lowercase();
        self.entities
            .values()
            .filter(|e| e.name.to_lowercase() == wanted)
            .max_by_key(|e| e.last_seen)
    }

    /// Entities whose name occurs (case-insensitively) in `text`, most recently seen first.
    pub fn entities_named_in(&self, text: &str, limit: usize) -> Vec<Entity> {
        let lower = text.to_lowercase();
        let mut found: Vec<Entity> = self
            .entities
            .values()
            .filter(|e| lower.contains(&e.name.to_lowercase()))
            .cloned()
            .collect();
        found.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.name.cmp(&b.name)));
        found.truncate(limit);
        found
    }

    /// Breadth-first neighbourhood of `entity_id`, following edges in both directions.
    ///
    /// Depth-1 neighbours are `direct`; anything reached at depth 2..=`max_depth` is
    /// `indirect` and records the entity it was reached through.
    pub fn find_related_entities(&self, entity_id: &str, max_depth: usize) -> Result<RelatedEntities> {
        if !self.entities.contains_key(entity_id) {
            bail!("entity not found: {entity_id}");
        }

        let mut visited: HashSet<&str> = HashSet::from([entity_id]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(entity_id, 0)]);
        let mut related = RelatedEntities {
            direct: Vec::new(),
            indirect: Vec::new(),
        };

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for edge in &self.edges {
                let other = if edge.source_id == current {
                    edge.target_id.as_str()
                } else if edge.target_id == current {
                    edge.source_id.as_str()
                } else {
                    continue;
                };
                if visited.contains(other) {
                    continue;
                }
                let Some(entity) = self.entities.get(other) else {
                    continue;
                };
                visited.insert(other);
                queue.push_back((other, depth + 1));

                let hit = RelatedEntity {
                    entity: entity.clone(),
                    relation: edge.relation,
                    weight: edge.weight,
                    depth: depth + 1,
                    via: (depth > 0).then(|| current.to_string()),
                };
                if depth == 0 {
                    related.direct.push(hit);
                } else {
                    related.indirect.push(hit);
                }
            }
        }

        Ok(related)
    }

    pub fn stats(&self) -> GraphStats {
        let mut entity_types: BTreeMap<String, usize> = EntityType::ALL
            .iter()
            .map(|t| (t.as_str().to_string(), 0))
            .collect();
        for e in self.entities.values() {
            *entity_types.entry(e.entity_type.as_str().to_string()).or_default() += 1;
        }

        let mut relation_types: BTreeMap<String, usize> = RelationType::ALL
            .iter()
            .map(|r| (r.as_str().to_string(), 0))
            .collect();
        for r in &self.edges {
            *relation_types.entry(r.relation.as_str().to_string()).or_default() += 1;
        }

        GraphStats {
            total_entities: self.entities.len(),
            total_relationships: self.edges.len(),
            total_episodes: self.episodes.len(),
            entity_types,
            relation_types,
            last_update: self.entities.values().map(|e| e.updated_at).max(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Metadata attached when an episode is mirrored into the memory store.
pub fn episode_sync_metadata(episode: &Episode) -> serde_json::Value {
    let mut types: Vec<&str> = episode
        .entities
        .iter()
        .map(|e| e.entity_type.as_str())
        .collect();
    types.sort_unstable();
    types.dedup();

    let mut meta = serde_json::json!({
        "episode_id": episode.id,
        "source": episode.source,
        "entities_count": episode.entities.len(),
        "relationships_count": episode.relations.len(),
        "graph_processed": true,
        "entity_types": types,
    });
    if let (Some(target), Some(extra)) = (meta.as_object_mut(), episode.metadata.as_object()) {
        for (k, v) in extra {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    meta
}

/// Relation implied by an ordered pair of entity types, if a rule covers it.
fn relation_rule(a: EntityType, b: EntityType) -> Option<RelationType> {
    use EntityType::*;
    match (a, b) {
        (Person, Project) => Some(RelationType::WorksOn),
        (Person, Person) => Some(RelationType::CollaboratesWith),
        (Task, Project) => Some(RelationType::DependsOn),
        (Person, Skill) => Some(RelationType::Learns),
        (Person, Preference) => Some(RelationType::Prefers),
        (Person, Tool) => Some(RelationType::Uses),
        (Meeting, Person) => Some(RelationType::RelatesTo),
        (Document, Project) => Some(RelationType::RelatesTo),
        _ => None,
    }
}

/// Proximity weight: `max(0.1, 1 - |pos1 - pos2| / len)`, two decimals.
/// Falls back to 0.5 when either name is absent from the text.
pub fn relation_weight(name1: &str, name2: &str, content: &str) -> f64 {
    let lower = content.to_lowercase();
    let position = |name: &str| {
        lower
            .find(&name.to_lowercase())
            .map(|byte| lower[..byte].chars().count())
    };

    let (Some(p1), Some(p2)) = (position(name1), position(name2)) else {
        return DEFAULT_WEIGHT;
    };
    let len = lower.chars().count();
    if len == 0 {
        return DEFAULT_WEIGHT;
    }

    let distance = p1.abs_diff(p2) as f64;
    let weight = (1.0 - distance / len as f64).max(MIN_WEIGHT);
    (weight * 100.0).round() / 100.0
}

/// Co-occurrence edges for every pair, then `temporal_follows` chains for sequential
/// types ordered by first appearance.
fn infer_relations(entities: &[(&Entity, usize)], content: &str, episode_id: &str) -> Vec<TemporalEdge> {
    let mut edges = Vec::new();

    for (i, (a, _)) in entities.iter().enumerate() {
        for (b, _) in &entities[i + 1..] {
            let (source, target, relation) = match relation_rule(a.entity_type, b.entity_type) {
                Some(rel) => (a, b, rel),
                None => match relation_rule(b.entity_type, a.entity_type) {
                    Some(rel) => (b, a, rel),
                    None => (a, b, RelationType::RelatesTo),
                },
            };
            let weight = relation_weight(&a.name, &b.name, content);
            let context: String = content.chars().take(100).collect();
            edges.push(TemporalEdge::new(
                &source.id,
                &target.id,
                relation,
                weight,
                episode_id,
                serde_json::json!({
                    "context": context,
                    "confidence": weight,
                    "inferred_from": "co_occurrence",
                }),
            ));
        }
    }

    for entity_type in EntityType::ALL.iter().filter(|t| t.is_sequential()) {
        let mut chain: Vec<&(&Entity, usize)> = entities
            .iter()
            .filter(|(e, _)| e.entity_type == *entity_type)
            .collect();
        if chain.len() < 2 {
            continue;
        }
        chain.sort_by_key(|(_, pos)| *pos);
        for (i, pair) in chain.windows(2).enumerate() {
            edges.push(TemporalEdge::new(
                &pair[0].0.id,
                &pair[1].0.id,
                RelationType::TemporalFollows,
                SEQUENCE_WEIGHT,
                episode_id,
                serde_json::json!({
                    "inferred_from": "temporal_sequence",
                    "sequence_position": i,
                }),
            ));
        }
    }

    edges
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weight_is_proximity_based() {
        let text = "Alice met Bob";
        // positions 0 and 10 over 13 chars
        assert_eq!(relation_weight("Alice", "Bob", text), 0.23);
        assert_eq!(relation_weight("alice", "ALICE", text), 1.0);
        assert_eq!(relation_weight("Alice", "Carol", text), 0.5);
    }

    #[test]
    fn weight_has_a_floor() {
        let text = format!("a{}b", " ".repeat(200));
        assert_eq!(relation_weight("a", "b", &text), 0.1);
    }

    #[test]
    fn repeat_mentions_merge() {
        let mut graph = GraphEngine::new("u1");
        let first = graph.ingest_episode("Meeting with Marie Dupont", "user", serde_json::json!({}));
        let second = graph.ingest_episode("Marie Dupont approved it", "user", serde_json::json!({}));

        let person = second
            .entities
            .iter()
            .find(|e| e.entity_type == EntityType::Person)
            .unwrap();
        assert_eq!(person.episode_ids, vec![first.id.clone(), second.id.clone()]);
        assert_eq!(
            graph.search_entities_by_type(EntityType::Person, 10).len(),
            1
        );
    }

    #[test]
    fn rule_direction_is_normalized() {
        let mut graph = GraphEngine::new("u1");
        let ep = graph.ingest_episode(
            "Task: ship beta, working on Apollo",
            "user",
            serde_json::json!({}),
        );
        let dep = ep
            .relations
            .iter()
            .find(|r| r.relation == RelationType::DependsOn)
            .unwrap();
        assert!(dep.source_id.starts_with("task_"));
        assert!(dep.target_id.starts_with("project_"));
    }

    #[test]
    fn sequential_types_chain_in_text_order() {
        let mut graph = GraphEngine::new("u1");
        let ep = graph.ingest_episode(
            "need to draft the plan\nneed to send the invoice",
            "user",
            serde_json::json!({}),
        );
        let seq: Vec<&TemporalEdge> = ep
            .relations
            .iter()
            .filter(|r| r.relation == RelationType::TemporalFollows)
            .collect();
        assert_eq!(seq.len(), 1);
        let first = graph.get_entity(&seq[0].source_id).unwrap();
        assert_eq!(first.name, "draft the plan");
        assert_eq!(seq[0].weight, 0.8);
    }

    #[test]
    fn traversal_reports_direct_and_indirect() {
        let mut graph = GraphEngine::new("u1");
        graph.ingest_episode("Marie Dupont is working on Atlas", "user", serde_json::json!({}));
        graph.ingest_episode("Task: audit logs, projet Atlas", "user", serde_json::json!({}));

        let marie = graph.search_entities_by_type(EntityType::Person, 1).remove(0);
        let related = graph.find_related_entities(&marie.id, 2).unwrap();
        assert_eq!(related.direct.len(), 1);
        assert_eq!(related.direct[0].entity.name, "Atlas");
        assert!(related
            .indirect
            .iter()
            .any(|r| r.entity.name == "audit logs" && r.via.is_some()));

        let shallow = graph.find_related_entities(&marie.id, 1).unwrap();
        assert!(shallow.indirect.is_empty());
        assert!(graph.find_related_entities("person_missing", 2).is_err());
    }

    #[test]
    fn stats_list_every_category() {
        let mut graph = GraphEngine::new("u1");
        graph.ingest_episode("I prefer green tea", "user", serde_json::json!({}));
        let stats = graph.stats();
        assert_eq!(stats.entity_types.len(), 12);
        assert_eq!(stats.relation_types.len(), 12);
        assert_eq!(stats.entity_types["preference"], 1);
        assert_eq!(stats.total_episodes, 1);
        assert!(stats.last_update.is_some());
    }

    #[test]
    fn sync_metadata_carries_episode_fields() {
        let mut graph = GraphEngine::new("u1");
        let ep = graph.ingest_episode("I prefer tea", "notion", serde_json::json!({"page_id": "p1"}));
        let meta = episode_sync_metadata(&ep);
        assert_eq!(meta["source"], "notion");
        assert_eq!(meta["page_id"], "p1");
        assert_eq!(meta["entity_types"][0], "preference");
    }
}
