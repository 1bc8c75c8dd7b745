use anyhow::{anyhow, Result};

use persona::config::PersonaConfig;
use persona::memory::ExportFormat;

/// Export stored memories to stdout as JSON or Markdown.
pub async fn export(config: PersonaConfig, format: &str, limit: usize) -> Result<()> {
    let format: ExportFormat = format.parse().map_err(|e: String| anyhow!(e))?;

    let agent = super::offline_agent(config).await?;
    let memory = agent.memory();
    memory.load_recent(limit).await?;
    let output = memory.export(format);
    let count = memory.stats().cache_size;
    agent.shutdown().await;

    println!("{}", output?);
    eprintln!("Exported {count} memories.");
    Ok(())
}
