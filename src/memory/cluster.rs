//! Greedy keyword-overlap clustering.
//!
//! A record joins the first cluster (in creation order) whose keyword set shares an
//! entity name with it; otherwise it seeds a new cluster.

use chrono::Utc;
use std::collections::BTreeSet;

use super::types::{Importance, MemoryCluster, MemoryRecord};

const SEED_IMPORTANCE_MEDIUM: f64 = 0.5;
const SEED_IMPORTANCE_OTHER: f64 = 0.8;

#[derive(Debug, Default)]
pub struct ClusterIndex {
    clusters: Vec<MemoryCluster>,
}

/// Outcome of placing a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Placement {
    Joined(String),
    Seeded(String),
}

impl ClusterIndex {
    pub fn assign(&mut self, record: &MemoryRecord) -> Placement {
        let entities = &record.context.entities;
        let now = Utc::now();

        if let Some(cluster) = self
            .clusters
            .iter_mut()
            .find(|c| entities.iter().any(|e| c.keywords.contains(e)))
        {
            cluster.memory_ids.push(record.id.clone());
            cluster.keywords.extend(entities.iter().cloned());
            cluster.updated_at = now;
            return Placement::Joined(cluster.id.clone());
        }

        let id = format!("cluster_{}", self.clusters.len());
        let importance = if record.context.importance == Importance::Medium {
            SEED_IMPORTANCE_MEDIUM
        } else {
            SEED_IMPORTANCE_OTHER
        };
        self.clusters.push(MemoryCluster {
            id: id.clone(),
            theme: record.context.memory_type.as_str().to_string(),
            memory_ids: vec![record.id.clone()],
            keywords: entities.iter().cloned().collect::<BTreeSet<_>>(),
            created_at: now,
            updated_at: now,
            importance,
        });
        Placement::Seeded(id)
    }

    /// `importance = min(0.1 × members, 1.0)` for every cluster.
    pub fn rescore(&mut self) -> usize {
        for cluster in &mut self.clusters {
            cluster.importance = (0.1 * cluster.memory_ids.len() as f64).min(1.0);
        }
        self.clusters.len()
    }

    pub fn clusters(&self) -> &[MemoryCluster] {
        &self.clusters
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{MemoryContext, MemoryType};

    fn record(id: &str, entities: &[&str], importance: Importance) -> MemoryRecord {
        MemoryRecord {
            id: id.into(),
            content: String::new(),
            context: MemoryContext {
                session_id: "s".into(),
                user_id: "u".into(),
                timestamp: Utc::now(),
                source: "direct".into(),
                confidence: 1.0,
                importance,
                memory_type: MemoryType::Semantic,
                entities: entities.iter().map(|e| e.to_string()).collect(),
                relations: vec![],
                metadata: Default::default(),
                ttl_hours: None,
            },
            summary: None,
            facts: vec![],
            created_at: Utc::now(),
            access_count: 0,
            last_accessed: None,
        }
    }

    #[test]
    fn overlapping_entities_join() {
        let mut index = ClusterIndex::default();
        assert_eq!(
            index.assign(&record("m1", &["Atlas", "Marie Dupont"], Importance::Medium)),
            Placement::Seeded("cluster_0".into())
        );
        assert_eq!(
            index.assign(&record("m2", &["Atlas", "Kubernetes"], Importance::Low)),
            Placement::Joined("cluster_0".into())
        );
        assert_eq!(
            index.assign(&record("m3", &["Lyon"], Importance::High)),
            Placement::Seeded("cluster_1".into())
        );

        let first = &index.clusters()[0];
        assert_eq!(first.memory_ids, vec!["m1", "m2"]);
        assert!(first.keywords.contains("Kubernetes"));
        assert_eq!(first.theme, "semantic");
        assert_eq!(first.importance, 0.5);
        assert_eq!(index.clusters()[1].importance, 0.8);
    }

    #[test]
    fn rescore_scales_with_members() {
        let mut index = ClusterIndex::default();
        for i in 0..12 {
            index.assign(&record(&format!("m{i}"), &["Atlas"], Importance::Medium));
        }
        index.assign(&record("solo", &["Lyon"], Importance::Medium));
        index.rescore();
        assert_eq!(index.clusters()[0].importance, 1.0);
        assert!((index.clusters()[1].importance - 0.1).abs() < 1e-9);
    }
}
