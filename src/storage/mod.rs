//! Storage layer for deliberation session persistence.
//!
//! Persistence is at-least-once and best-effort relative to the in-memory
//! graph: callers apply mutations in memory first and treat storage failures
//! as log-and-continue, never as a rollback.

mod sqlite;

pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::graph::{Thought, ThoughtGraph};

/// A stored deliberation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last written to.
    pub updated_at: DateTime<Utc>,
    /// Optional metadata for the session.
    pub metadata: Option<serde_json::Value>,
}

impl Session {
    /// Create a new session with a fresh id
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            metadata: None,
        }
    }

    /// Create the session row matching an in-memory graph
    pub fn for_graph(graph: &ThoughtGraph) -> Self {
        Self {
            id: graph.session_id().to_string(),
            created_at: graph.created_at(),
            updated_at: graph.created_at(),
            metadata: None,
        }
    }

    /// Set metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Invocation log entry for debugging and tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique invocation identifier.
    pub id: String,
    /// The session the call ran against.
    pub session_id: String,
    /// Name of the MCP tool invoked.
    pub tool_name: String,
    /// Input arguments as JSON.
    pub input: serde_json::Value,
    /// Output result as JSON (if successful).
    pub output: Option<serde_json::Value>,
    /// Latency in milliseconds.
    pub latency_ms: Option<i64>,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Error message (if failed).
    pub error: Option<String>,
    /// When the invocation occurred.
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    /// Create a new invocation log entry
    pub fn new(
        session_id: impl Into<String>,
        tool_name: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            tool_name: tool_name.into(),
            input,
            output: None,
            latency_ms: None,
            success: true,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// Mark as successful with output
    pub fn success(mut self, output: serde_json::Value, latency_ms: i64) -> Self {
        self.success = true;
        self.output = Some(output);
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Mark as failed with error
    pub fn failure(mut self, error: impl Into<String>, latency_ms: i64) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// Storage trait for database operations.
///
/// Defines the persistence surface for sessions, thoughts, and the
/// invocation audit trail, keyed by session id and able to reload a full
/// graph.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Session operations

    /// Create a new session row.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Bump a session's updated-at timestamp.
    async fn touch_session(&self, id: &str, updated_at: DateTime<Utc>) -> StorageResult<()>;

    // Thought operations

    /// Persist an accepted thought at its insertion position.
    async fn save_thought(
        &self,
        session_id: &str,
        position: i64,
        thought: &Thought,
    ) -> StorageResult<()>;
    /// Mark the given thoughts stale.
    async fn mark_thoughts_stale(
        &self,
        session_id: &str,
        thought_ids: &[String],
    ) -> StorageResult<()>;
    /// Get all thoughts in a session, in insertion order.
    async fn get_session_thoughts(&self, session_id: &str) -> StorageResult<Vec<Thought>>;
    /// Reload a full graph for a session, or None if the session is unknown.
    async fn load_graph(&self, session_id: &str) -> StorageResult<Option<ThoughtGraph>>;

    // Invocation logging

    /// Log a tool invocation for debugging.
    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()>;
}
