//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers, validation, and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::admission::{AdmissionController, AdmissionSettings};
use crate::config::Config;
use crate::graph::ThoughtGraph;
use crate::storage::SqliteStorage;

/// Mutable per-session state behind one coarse lock.
///
/// Cycle detection and cascade invalidation both need a stable, non-moving
/// view of the whole node set while they traverse it, so the graph and the
/// admission buckets share a single mutex that is held for the full
/// in-memory duration of each operation. No await happens under the lock;
/// persistence runs after it is released.
pub struct EngineState {
    /// The live deliberation graph.
    pub graph: ThoughtGraph,
    /// Token buckets and the observational request counter.
    pub admission: AdmissionController,
}

/// Application state shared across handlers.
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// The session id the engine state belongs to.
    pub session_id: String,
    /// Graph plus admission controller, coarse-locked.
    pub engine: Mutex<EngineState>,
}

impl AppState {
    /// Create application state with a fresh session graph
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        Self::with_graph(config, storage, ThoughtGraph::new())
    }

    /// Create application state around an existing (e.g. reloaded) graph
    pub fn with_graph(config: Config, storage: SqliteStorage, graph: ThoughtGraph) -> Self {
        let admission = AdmissionController::new(admission_settings(&config));
        let session_id = graph.session_id().to_string();
        Self {
            config,
            storage,
            session_id,
            engine: Mutex::new(EngineState { graph, admission }),
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

/// Map the configured write/read limits onto the served operation classes.
///
/// Anything not named here (including operation names probed through
/// `admission_stats`) falls back to the default limits lazily.
fn admission_settings(config: &Config) -> AdmissionSettings {
    let mut operations = HashMap::new();
    for op in [TOOL_INSERT_THOUGHT, TOOL_INVALIDATE] {
        operations.insert(op.to_string(), config.admission.write);
    }
    for op in [TOOL_GET_GRAPH, TOOL_QUERY, TOOL_ADMISSION_STATS] {
        operations.insert(op.to_string(), config.admission.read);
    }
    AdmissionSettings {
        operations,
        default_limits: config.admission.fallback,
        window_secs: config.admission.window_secs,
    }
}
