//! A personal agent with long-term memory, a temporal knowledge graph, and
//! inter-agent protocol clients, served over MCP.
//!
//! Incoming messages are classified by intent and routed to the knowledge graph,
//! an A2A peer, an MCP tool server, or a memory-backed reply. Every message can be
//! written back to memory, where it is summarized, clustered, and persisted to a
//! session store (local SQLite or a Zep server).
//!
//! # Modules
//!
//! - [`config`]: TOML configuration with environment overrides
//! - [`db`]: SQLite schema and migrations for the local store
//! - [`store`]: the [`store::MemoryStore`] seam with SQLite and Zep backends
//! - [`graph`]: regex entity extraction and the in-process temporal graph
//! - [`memory`]: the memory engine (routing, caching, clustering, consolidation)
//! - [`protocols`]: A2A and MCP clients
//! - [`agent`]: the message loop tying it together
//! - [`notion`]: Notion page classification and sync
//! - [`tools`] and [`server`]: the MCP tool server

pub mod agent;
pub mod config;
pub mod db;
pub mod graph;
pub mod memory;
pub mod notion;
pub mod protocols;
pub mod server;
pub mod store;
pub mod tools;
