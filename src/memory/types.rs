//! Memory record definitions.
//!
//! Defines [`MemoryType`] and [`Importance`] (the fixed category sets),
//! [`MemoryContext`] (where a record came from and how it is routed),
//! [`MemoryRecord`] (one stored memory) and [`MemoryCluster`] (a keyword-overlap group).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Per-day retention factor in the recency decay.
const DAILY_DECAY: f64 = 0.95;
const ACCESS_BOOST_STEP: f64 = 0.1;
const ACCESS_BOOST_CAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Specific events.
    Episodic,
    /// General knowledge.
    Semantic,
    /// How to do things.
    Procedural,
    /// Current working set.
    Working,
    Preference,
    Behavioral,
}

impl MemoryType {
    pub const ALL: [MemoryType; 6] = [
        Self::Episodic,
        Self::Semantic,
        Self::Procedural,
        Self::Working,
        Self::Preference,
        Self::Behavioral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Working => "working",
            Self::Preference => "preference",
            Self::Behavioral => "behavioral",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown memory type: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    /// Never forgotten.
    Critical,
    High,
    Medium,
    Low,
    /// Expires after its TTL.
    Transient,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Transient => "transient",
        }
    }

    /// Multiplier applied to the recency decay.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.9,
            Self::Medium => 0.7,
            Self::Low => 0.5,
            Self::Transient => 0.1,
        }
    }

    /// Records at this level belong in the primary (long-term) session.
    pub fn is_long_term(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl std::fmt::Display for Importance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Importance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "transient" => Ok(Self::Transient),
            _ => Err(format!("unknown importance: {s}")),
        }
    }
}

/// Provenance and routing for a record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryContext {
    pub session_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub confidence: f64,
    pub importance: Importance,
    pub memory_type: MemoryType,
    /// Names of graph entities mentioned in the content.
    pub entities: Vec<String>,
    /// `(source_id, relation, target_id)` triples inferred from the content.
    pub relations: Vec<(String, String, String)>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Hours after which the record is dropped at consolidation.
    pub ttl_hours: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub content: String,
    pub context: MemoryContext,
    pub summary: Option<String>,
    pub facts: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub access_count: u32,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl MemoryRecord {
    /// `0.95^days × importance weight + min(0.1 × accesses, 0.5)`, capped at 1.0.
    pub fn relevance(&self, days_old: i64) -> f64 {
        let decay = DAILY_DECAY.powi(days_old.max(0) as i32);
        let access = (ACCESS_BOOST_STEP * self.access_count as f64).min(ACCESS_BOOST_CAP);
        (decay * self.context.importance.weight() + access).min(1.0)
    }

    /// Relevance at the current time, using whole days of age.
    pub fn relevance_now(&self) -> f64 {
        self.relevance(self.age_days(Utc::now()))
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 3600.0
    }

    /// True once the record has outlived its TTL.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.context
            .ttl_hours
            .is_some_and(|ttl| self.age_hours(now) > ttl)
    }

    pub fn touch(&mut self) {
        self.access_count += 1;
        self.last_accessed = Some(Utc::now());
    }
}

/// Memories grouped by shared entity names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCluster {
    pub id: String,
    /// Memory type of the seeding record.
    pub theme: String,
    pub memory_ids: Vec<String>,
    pub keywords: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub importance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(importance: Importance, access_count: u32) -> MemoryRecord {
        MemoryRecord {
            id: "m".into(),
            content: "c".into(),
            context: MemoryContext {
                session_id: "s".into(),
                user_id: "u".into(),
                timestamp: Utc::now(),
                source: "direct".into(),
                confidence: 1.0,
                importance,
                memory_type: MemoryType::Episodic,
                entities: vec![],
                relations: vec![],
                metadata: Default::default(),
                ttl_hours: None,
            },
            summary: None,
            facts: vec![],
            created_at: Utc::now(),
            access_count,
            last_accessed: None,
        }
    }

    #[test]
    fn relevance_decays_with_age() {
        let r = record(Importance::Medium, 0);
        assert!((r.relevance(0) - 0.7).abs() < 1e-9);
        assert!((r.relevance(10) - 0.95f64.powi(10) * 0.7).abs() < 1e-9);
        assert!(r.relevance(10) < r.relevance(1));
    }

    #[test]
    fn access_boost_is_capped() {
        let r = record(Importance::Low, 3);
        assert!((r.relevance(0) - 0.8).abs() < 1e-9);
        let r = record(Importance::Low, 40);
        assert!((r.relevance(0) - 1.0).abs() < 1e-9);
        let r = record(Importance::Transient, 40);
        assert!((r.relevance(0) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn relevance_never_exceeds_one() {
        let r = record(Importance::Critical, 5);
        assert_eq!(r.relevance(0), 1.0);
    }

    #[test]
    fn expiry_follows_ttl() {
        let mut r = record(Importance::Transient, 0);
        r.context.ttl_hours = Some(24.0);
        assert!(!r.is_expired(Utc::now()));
        r.created_at = Utc::now() - Duration::hours(25);
        assert!(r.is_expired(Utc::now()));

        r.context.ttl_hours = None;
        assert!(!r.is_expired(Utc::now()));
    }

    #[test]
    fn enums_parse() {
        for t in MemoryType::ALL {
            assert_eq!(t.as_str().parse::<MemoryType>().unwrap(), t);
        }
        assert_eq!("high".parse::<Importance>().unwrap(), Importance::High);
        assert!("urgent".parse::<Importance>().is_err());
        assert!(Importance::Critical.is_long_term());
        assert!(!Importance::Medium.is_long_term());
    }
}
