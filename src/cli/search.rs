use anyhow::{anyhow, Result};

use persona::config::PersonaConfig;
use persona::memory::MemoryType;

/// Run a memory search from the terminal.
pub async fn search(
    config: PersonaConfig,
    query: &str,
    types: &[String],
    limit: Option<usize>,
) -> Result<()> {
    let types = types
        .iter()
        .map(|t| t.parse::<MemoryType>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| anyhow!(e))?;
    let limit = limit.unwrap_or(config.memory.search_limit);
    let min_score = config.memory.min_search_score;

    let agent = super::offline_agent(config).await?;
    let results = agent
        .memory()
        .search_memories(query, &types, limit, min_score)
        .await;
    agent.shutdown().await;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", results.len());
    for (i, record) in results.iter().enumerate() {
        println!(
            "  {}. [{}/{}] {} (relevance: {:.2})",
            i + 1,
            record.context.memory_type,
            record.context.importance,
            record.id,
            record.relevance_now(),
        );
        println!("     {}", super::preview(&record.content, 120));
        if !record.context.entities.is_empty() {
            println!("     entities: {}", record.context.entities.join(", "));
        }
        println!();
    }

    Ok(())
}
