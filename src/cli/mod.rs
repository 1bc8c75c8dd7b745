pub mod chat;
pub mod export;
pub mod ingest;
pub mod notion_sync;
pub mod search;

use anyhow::Result;
use std::sync::Arc;

use persona::agent::PersonalAgent;
use persona::config::PersonaConfig;

/// Bring up an agent for a one-shot command: memory store and graph only, no
/// protocol clients.
pub async fn offline_agent(mut config: PersonaConfig) -> Result<Arc<PersonalAgent>> {
    config.agent.enable_a2a = false;
    config.agent.enable_mcp = false;
    persona::server::start_agent(config).await
}

/// Shorten `text` to `max` characters, on a char boundary.
pub(crate) fn preview(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_respects_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("réunion avec Sophie", 7), "réunion...");
    }
}
