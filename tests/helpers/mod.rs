#![allow(dead_code)]

use persona::agent::PersonalAgent;
use persona::config::PersonaConfig;
use persona::notion::NotionPage;
use std::path::Path;
use std::sync::Arc;

/// Config with a local SQLite store under `dir` and no protocol clients.
pub fn test_config(dir: &Path) -> PersonaConfig {
    let mut config = PersonaConfig::default();
    config.agent.user_id = "ada".into();
    config.agent.enable_a2a = false;
    config.agent.enable_mcp = false;
    config.store.backend = "local".into();
    config.store.db_path = dir.join("memory.db").to_string_lossy().into_owned();
    config
}

/// Open the configured store and initialize an agent on it.
pub async fn start_agent(config: PersonaConfig) -> Arc<PersonalAgent> {
    persona::server::start_agent(config).await.unwrap()
}

/// A page long enough to pass the minimum content length.
pub fn meeting_page(id: &str) -> NotionPage {
    NotionPage::new(
        id,
        "Atlas kickoff meeting",
        "Meeting with Sophie Martin about the Atlas launch. Agenda: scope, risks and \
         action items. Participants agreed to ship the beta next month.",
    )
}
