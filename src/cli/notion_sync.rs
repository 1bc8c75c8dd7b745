use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use persona::config::PersonaConfig;
use persona::notion::{load_pages, NotionBridge, SyncStatus};

/// Sync a JSON export of Notion pages into memory and the knowledge graph.
pub async fn notion_sync(config: PersonaConfig, path: &Path) -> Result<()> {
    let pages = load_pages(path)?;
    println!("Loaded {} page(s) from {}.", pages.len(), path.display());

    let notion_config = config.notion.clone();
    let agent = super::offline_agent(config).await?;
    let bridge = NotionBridge::new(
        agent.memory().user_id(),
        notion_config,
        Some(Arc::clone(agent.memory())),
        agent.graph().cloned(),
    );

    let result = bridge.sync_pages(pages).await;
    agent.shutdown().await;

    println!("Sync {:?} in {:.2}s", result.status, result.duration_seconds);
    println!("  Pages processed:     {}", result.pages_processed);
    println!("  Pages skipped:       {}", result.pages_skipped);
    println!("  Entities extracted:  {}", result.entities_extracted);
    println!("  Memories created:    {}", result.memories_created);
    for error in &result.errors {
        eprintln!("  error: {error}");
    }

    anyhow::ensure!(
        result.status != SyncStatus::Failed,
        "notion sync failed ({} error(s))",
        result.errors.len()
    );
    Ok(())
}
