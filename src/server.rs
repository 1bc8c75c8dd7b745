//! MCP server initialization for stdio and HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that open the memory
//! store, bring up the agent, and expose it through [`PersonaTools`].

use crate::agent::PersonalAgent;
use crate::config::PersonaConfig;
use crate::store;
use crate::tools::PersonaTools;
use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;

/// Shared setup: open the configured store and initialize one agent for all sessions.
pub async fn start_agent(config: PersonaConfig) -> Result<Arc<PersonalAgent>> {
    let store = store::open_store(&config)?;
    match &store {
        Some(s) => tracing::info!(store = s.name(), "memory store ready"),
        None => tracing::warn!("no memory store configured, memories live in process only"),
    }

    let agent = PersonalAgent::new(config, store);
    agent
        .initialize()
        .await
        .context("agent failed to initialize")?;
    tracing::info!(agent = %agent.agent_id(), "agent ready");
    Ok(agent)
}

/// Start the MCP server on the transport named in `config.server.transport`.
pub async fn serve(config: PersonaConfig) -> Result<()> {
    match config.server.transport.as_str() {
        "http" => serve_http(config).await,
        "stdio" => serve_stdio(config).await,
        other => anyhow::bail!("unknown transport: {other} (expected 'stdio' or 'http')"),
    }
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: PersonaConfig) -> Result<()> {
    tracing::info!("starting Persona MCP server on stdio");

    let agent = start_agent(config).await?;

    let tools = PersonaTools::new(Arc::clone(&agent));
    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    let result = server.waiting().await;
    agent.shutdown().await;
    tracing::info!("MCP server shut down");

    result?;
    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: PersonaConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    tracing::info!(addr = %bind_addr, "starting Persona MCP server on HTTP");

    let agent = start_agent(config).await?;

    let shared = Arc::clone(&agent);
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(PersonaTools::new(Arc::clone(&shared))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    agent.shutdown().await;
    Ok(())
}
