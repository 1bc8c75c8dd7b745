//! Keyword intent classification.
//!
//! Buckets are checked in a fixed order and the first match wins. Keywords match
//! as plain substrings of the lowercased message, so "document" counts as "do".

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TaskExecution,
    KnowledgeQuery,
    FileOperation,
    MemoryQuery,
    GeneralConversation,
}

const BUCKETS: &[(Intent, &[&str])] = &[
    (Intent::TaskExecution, &["do", "execute", "run", "perform", "task"]),
    (Intent::KnowledgeQuery, &["who", "what", "when", "where", "tell me about"]),
    (Intent::FileOperation, &["file", "folder", "directory", "read", "write"]),
    (Intent::MemoryQuery, &["remember", "recall", "memory", "did i"]),
];

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskExecution => "task_execution",
            Self::KnowledgeQuery => "knowledge_query",
            Self::FileOperation => "file_operation",
            Self::MemoryQuery => "memory_query",
            Self::GeneralConversation => "general_conversation",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn detect_intent(content: &str) -> Intent {
    let lower = content.to_lowercase();
    BUCKETS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map_or(Intent::GeneralConversation, |(intent, _)| *intent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_in_order() {
        assert_eq!(detect_intent("Please run the backup"), Intent::TaskExecution);
        assert_eq!(detect_intent("Who is Marie Curie?"), Intent::KnowledgeQuery);
        assert_eq!(detect_intent("read the notes folder"), Intent::FileOperation);
        assert_eq!(detect_intent("Do you remember Paris?"), Intent::TaskExecution);
        assert_eq!(detect_intent("Remember my dentist appointment"), Intent::MemoryQuery);
        assert_eq!(detect_intent("Hello there"), Intent::GeneralConversation);
    }

    #[test]
    fn phrases() {
        assert_eq!(detect_intent("Tell me about Atlas"), Intent::KnowledgeQuery);
        assert_eq!(detect_intent("Did I call Bob"), Intent::MemoryQuery);
    }

    #[test]
    fn keywords_match_inside_words() {
        assert_eq!(detect_intent("Show me the document"), Intent::TaskExecution);
        assert_eq!(detect_intent("I don't know"), Intent::TaskExecution);
        assert_eq!(detect_intent("running late again"), Intent::TaskExecution);
        assert_eq!(detect_intent("Somewhere nice for lunch"), Intent::KnowledgeQuery);
        assert_eq!(detect_intent("the profile picture"), Intent::FileOperation);
        // "there" does not contain "where"
        assert_eq!(detect_intent("over there"), Intent::GeneralConversation);
    }
}
