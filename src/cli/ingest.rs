use anyhow::{Context, Result};
use std::path::Path;

use persona::agent::AgentMessage;
use persona::config::PersonaConfig;

/// Split a text file on blank lines and feed each paragraph through the agent.
pub async fn ingest(config: PersonaConfig, path: &Path, source: &str) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let chunks = paragraphs(&text);
    if chunks.is_empty() {
        println!("Nothing to ingest in {}.", path.display());
        return Ok(());
    }

    let agent = super::offline_agent(config).await?;

    let mut failed = 0usize;
    for chunk in &chunks {
        let response = agent
            .process_message(AgentMessage::new(chunk.as_str(), source))
            .await;
        if response.confidence == 0.0 {
            failed += 1;
            eprintln!("  failed: {}", super::preview(chunk, 60));
        }
    }

    let stats = agent.get_stats().await;
    agent.shutdown().await;

    println!(
        "Ingested {} paragraph(s) from {} ({} failed).",
        chunks.len() - failed,
        path.display(),
        failed
    );
    if let Some(graph) = stats.knowledge_graph {
        println!(
            "Knowledge graph: {} entities, {} relationships.",
            graph.total_entities, graph.total_relationships
        );
    }
    Ok(())
}

fn paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::paragraphs;

    #[test]
    fn splits_on_blank_lines() {
        let text = "Met Sarah Chen\nabout Atlas.\n\n\n  \nNeed to file the report.\n";
        assert_eq!(
            paragraphs(text),
            vec!["Met Sarah Chen about Atlas.", "Need to file the report."]
        );
    }
}
