//! Sentence-level fact extraction and one-line summaries.

const FACT_WORDS: &[&str] = &[
    "is", "are", "was", "were", "has", "have", "can", "will", "prefers", "likes", "works",
    "lives", "knows",
];
const MAX_FACTS: usize = 5;
const SUMMARY_CHARS: usize = 100;
const MIN_LEAD_SENTENCE_CHARS: usize = 20;

/// Sentences of 11..=199 characters containing a stative or preference verb, at most five.
pub fn extract_facts(content: &str) -> Vec<String> {
    content
        .split('.')
        .map(str::trim)
        .filter(|s| {
            let len = s.chars().count();
            len > 10 && len < 200
        })
        .filter(|s| {
            s.to_lowercase()
                .split(|c: char| !c.is_alphanumeric() && c != '\'')
                .any(|word| FACT_WORDS.contains(&word))
        })
        .take(MAX_FACTS)
        .map(String::from)
        .collect()
}

/// The content itself when short, else its first sentence, else a truncated prefix.
pub fn summarize(content: &str) -> String {
    if content.chars().count() <= SUMMARY_CHARS {
        return content.to_string();
    }

    let first = content.split('.').next().unwrap_or_default();
    if first.chars().count() > MIN_LEAD_SENTENCE_CHARS {
        return format!("{first}.");
    }

    let prefix: String = content.chars().take(SUMMARY_CHARS).collect();
    format!("{prefix}...")
}
