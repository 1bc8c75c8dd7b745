mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use persona::config::PersonaConfig;

#[derive(Parser)]
#[command(name = "persona", version, about = "Personal agent with long-term memory and a knowledge graph")]
struct Cli {
    /// Config file (defaults to ~/.persona/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio unless configured or flagged otherwise)
    Serve {
        /// Serve Streamable HTTP on server.host:server.port instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Talk to the agent interactively
    Chat,
    /// Feed a text file through the agent, one paragraph per message
    Ingest {
        path: PathBuf,
        /// Source recorded on each message
        #[arg(long, default_value = "ingest")]
        source: String,
    },
    /// Search stored memories
    Search {
        query: String,
        /// Restrict to a memory type (repeatable)
        #[arg(long = "type")]
        types: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Sync a JSON export of Notion pages
    NotionSync { path: PathBuf },
    /// Export memories to stdout
    Export {
        /// json or markdown
        #[arg(long, default_value = "json")]
        format: String,
        /// Records loaded per session
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PersonaConfig::load_from(path)?,
        None => PersonaConfig::load()?,
    };

    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http {
                config.server.transport = "http".into();
            }
            persona::server::serve(config).await?;
        }
        Command::Chat => cli::chat::chat(config).await?,
        Command::Ingest { path, source } => cli::ingest::ingest(config, &path, &source).await?,
        Command::Search { query, types, limit } => {
            cli::search::search(config, &query, &types, limit).await?
        }
        Command::NotionSync { path } => cli::notion_sync::notion_sync(config, &path).await?,
        Command::Export { format, limit } => cli::export::export(config, &format, limit).await?,
    }

    Ok(())
}
