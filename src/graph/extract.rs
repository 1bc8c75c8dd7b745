//! Regex-driven entity extraction.
//!
//! Each [`EntityType`] owns a fixed list of patterns whose first capture group is the
//! entity name. Matches are cleaned, length-checked, and assigned a stable id derived
//! from the type and lower-cased name, so repeat mentions land on the same entity.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};

use super::types::EntityType;

const MIN_NAME_CHARS: usize = 2;
const MAX_NAME_CHARS: usize = 100;
const CONTEXT_CHARS: usize = 200;

/// `(type, patterns)` in extraction order. The first capture group is the name.
const PATTERNS: &[(EntityType, &[&str])] = &[
    (
        EntityType::Person,
        &[
            r"\b([A-Z][a-z]+ [A-Z][a-z]+)\b",
            r"(?:^|\s)@([A-Za-z0-9_][A-Za-z0-9_.+-]*)",
        ],
    ),
    (
        EntityType::Project,
        &[r"(?i)\bprojet\s+([^,.\n]+)", r"(?i)\bworking on\s+([^,.\n]+)"],
    ),
    (
        EntityType::Task,
        &[
            r"(?i)(?:\btask|\btâche|\btodo)\s*:?\s*([^,.\n]+)",
            r"(?i)\bneed to\s+([^,.\n]+)",
        ],
    ),
    (
        EntityType::Meeting,
        &[
            r"(?i)\b(?:meeting|réunion)\s+(?:with\s+|avec\s+)?([^,.\n]+)",
            r"(?i)\b(?:call|appel)\s+(?:with\s+|avec\s+)?([^,.\n]+)",
        ],
    ),
    (
        EntityType::Document,
        &[
            r"(?i)\b([\w-]+\.(?:pdf|docx?|md|txt|xlsx?|pptx?))\b",
            r#"(?i)\b(?:document|report|rapport)\s+"([^"\n]+)""#,
        ],
    ),
    (
        EntityType::Concept,
        &[
            r"(?i)\bconcept\s+(?:of\s+|de\s+)?([^,.\n]+)",
            r"(?i)\blearning about\s+([^,.\n]+)",
        ],
    ),
    (
        EntityType::Preference,
        &[
            r"(?i)\b(?:prefer|préfère|like|aime)\s+([^,.\n]+)",
            r"(?i)(?:don't like|n'aime pas)\s+([^,.\n]+)",
        ],
    ),
    (
        EntityType::Skill,
        &[r"(?i)\b(?:skilled in|expert in|good at|proficient in|compétent en)\s+([^,.\n]+)"],
    ),
    (
        EntityType::Goal,
        &[r"(?i)\b(?:my goal is to|goal is to|objectif est de|goal\s*:)\s*([^,.\n]+)"],
    ),
    (
        EntityType::Location,
        &[r"(?i)\b(?:located in|based in|lives in|live in|habite à)\s+([^,.\n]+)"],
    ),
    (
        EntityType::Organization,
        &[
            r"\b([A-Z][A-Za-z0-9&]*(?: [A-Z][A-Za-z0-9&]*)* (?:Inc|Corp|Ltd|LLC|GmbH|SAS|SA))\b",
            r"(?i)\b(?:works at|work at|travaille chez)\s+([^,.\n]+)",
        ],
    ),
    (EntityType::Tool, &[r"(?i)\b(?:using|utilise)\s+([^,.\n]+)"]),
];

/// One recognized mention, before it is merged into the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub id: String,
    pub entity_type: EntityType,
    pub name: String,
    /// Character offset of the captured name in the source text.
    pub position: usize,
}

/// Compiled pattern table.
pub struct EntityExtractor {
    patterns: Vec<(EntityType, Vec<Regex>)>,
    email: Regex,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityExtractor {
    pub fn new() -> Self {
        let patterns = PATTERNS
            .iter()
            .map(|(entity_type, sources)| {
                let compiled = sources
                    .iter()
                    .map(|p| Regex::new(p).expect("valid entity pattern"))
                    .collect();
                (*entity_type, compiled)
            })
            .collect();
        Self {
            patterns,
            email: Regex::new(r"[\w.-]+@[\w.-]+\.\w+").expect("valid email pattern"),
        }
    }

    /// Run every pattern over `content`. Each entity id is reported once, at its
    /// first match in category-then-pattern order.
    pub fn extract(&self, content: &str) -> Vec<Mention> {
        let mut seen = HashSet::new();
        let mut mentions = Vec::new();

        for (entity_type, regexes) in &self.patterns {
            for regex in regexes {
                for caps in regex.captures_iter(content) {
                    let Some(m) = caps.get(1) else { continue };
                    let name = clean_name(m.as_str());
                    let len = name.chars().count();
                    if !(MIN_NAME_CHARS..=MAX_NAME_CHARS).contains(&len) {
                        continue;
                    }

                    let id = entity_id(*entity_type, &name);
                    if !seen.insert(id.clone()) {
                        continue;
                    }

                    mentions.push(Mention {
                        id,
                        entity_type: *entity_type,
                        name,
                        position: content[..m.start()].chars().count(),
                    });
                }
            }
        }

        mentions
    }

    /// Type-specific properties derived from the surrounding text.
    pub fn properties(
        &self,
        entity_type: EntityType,
        content: &str,
    ) -> HashMap<String, serde_json::Value> {
        let mut props = HashMap::new();
        let context: String = content.chars().take(CONTEXT_CHARS).collect();
        props.insert("extraction_context".into(), context.into());
        props.insert("entity_type".into(), entity_type.as_str().into());

        let lower = content.to_lowercase();
        match entity_type {
            EntityType::Person => {
                if let Some(m) = self.email.find(content) {
                    props.insert("email".into(), m.as_str().into());
                }
            }
            EntityType::Project => {
                if lower.contains("urgent") {
                    props.insert("priority".into(), "high".into());
                }
                if lower.contains("completed") {
                    props.insert("status".into(), "completed".into());
                }
            }
            EntityType::Preference => {
                let strength = if ["love", "adore", "favorite"].iter().any(|w| lower.contains(w)) {
                    "strong"
                } else if ["hate", "dislike", "don't like", "n'aime pas"]
                    .iter()
                    .any(|w| lower.contains(w))
                {
                    "strong_negative"
                } else {
                    "moderate"
                };
                props.insert("strength".into(), strength.into());
            }
            _ => {}
        }

        props
    }
}

/// Stable id: `{type}_{first 8 bytes of sha256(type:lowercase name)}`.
pub fn entity_id(entity_type: EntityType, name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(name.to_lowercase().as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
    format!("{}_{hex}", entity_type.as_str())
}

fn clean_name(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(['.', ',', ';', ':', '!', '?'])
        .trim()
        .to_string()
}
