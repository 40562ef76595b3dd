//! # MCP Deliberation Server
//!
//! A Model Context Protocol (MCP) server that lets an automated reasoning
//! client record a deliberation as a graph of typed thoughts connected by
//! dependency edges, and later invalidate an assumption so that everything
//! logically resting on it is marked unreliable.
//!
//! ## Features
//!
//! - **Thought Graph**: append-only typed nodes with ordered dependency
//!   edges, kept acyclic by insertion-time validation
//! - **Cascade Invalidation**: invalidating an assumption transitively
//!   stales its dependents and appends a critique recording the reason
//! - **Query Engine**: conjunctive filters, five sort modes, and pagination
//!   over the live node set
//! - **Admission Control**: per-operation token buckets with an
//!   observational request-window counter
//! - **Durable Sessions**: SQLite persistence of sessions and thoughts,
//!   fire-and-forget relative to the in-memory graph
//!
//! ## Architecture
//!
//! ```text
//! MCP Client → MCP Server (stdio JSON-RPC) → Thought Graph (in memory)
//!                        ↓
//!                  SQLite (durability)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mcp_deliberation::{AppState, Config, McpServer};
//! use mcp_deliberation::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage));
//!     let server = McpServer::new(state);
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Token-bucket admission control per operation class.
pub mod admission;
/// Configuration management for the MCP server.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// The deliberation graph: node model, cycle guard, cascade, queries.
pub mod graph;
/// MCP server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
