use thiserror::Error;

use crate::graph::ThoughtKind;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// A graph invariant or lookup failed.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// An operation was rejected by the admission controller.
    #[error("Admission error: {0}")]
    Admission(#[from] AdmissionError),

    /// The storage layer failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// The MCP protocol layer failed.
    #[error("MCP protocol error: {0}")]
    Mcp(#[from] McpError),

    /// Unexpected internal failure.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal failure.
        message: String,
    },
}

/// Deliberation graph errors.
///
/// `DanglingDependency` and `Cycle` are the two insertion-time failures and
/// stay distinct variants so callers can tell them apart. `NotFound` and
/// `TypeMismatch` are the invalidation precondition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The referenced thought does not exist in the graph.
    #[error("Thought not found: {thought_id}")]
    NotFound {
        /// The id that was looked up.
        thought_id: String,
    },

    /// The thought exists but has the wrong semantic type for the operation.
    #[error("Thought {thought_id} has type {actual}, expected {expected}")]
    TypeMismatch {
        /// The id of the offending thought.
        thought_id: String,
        /// The type the operation requires.
        expected: ThoughtKind,
        /// The type the thought actually has.
        actual: ThoughtKind,
    },

    /// A candidate dependency references an id absent from the graph.
    #[error("Dependency references a missing thought: {dependency_id}")]
    DanglingDependency {
        /// The missing dependency id.
        dependency_id: String,
    },

    /// Accepting the candidate dependencies would close a dependency cycle.
    #[error("Dependency cycle detected through thought: {thought_id}")]
    Cycle {
        /// A thought on the detected cycle.
        thought_id: String,
    },
}

/// Admission controller errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The operation's token bucket had insufficient tokens.
    #[error("Rate limited on {operation}, retry after {retry_after_ms}ms")]
    RateLimited {
        /// The throttled operation class.
        operation: String,
        /// Advisory wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Could not open or connect to the database.
    #[error("Database connection failed: {message}")]
    Connection {
        /// Description of the connection failure.
        message: String,
    },

    /// A query failed or returned malformed data.
    #[error("Query failed: {message}")]
    Query {
        /// Description of the query failure.
        message: String,
    },

    /// No session row exists for the given id.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The session id that was looked up.
        session_id: String,
    },

    /// Embedded migrations could not be applied.
    #[error("Migration failed: {message}")]
    Migration {
        /// Description of the migration failure.
        message: String,
    },

    /// Underlying SQLx error.
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    /// The JSON-RPC request was malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what was malformed.
        message: String,
    },

    /// The requested tool is not served here.
    #[error("Unknown tool: {tool_name}")]
    UnknownTool {
        /// The unrecognized tool name.
        tool_name: String,
    },

    /// Tool arguments failed validation before reaching the core.
    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters {
        /// The tool whose arguments were rejected.
        tool_name: String,
        /// Why the arguments were rejected.
        message: String,
    },

    /// The tool ran but its operation failed.
    #[error("Tool execution failed: {message}")]
    ExecutionFailed {
        /// The underlying failure, stringified.
        message: String,
    },

    /// JSON serialization failed.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for graph operations
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;
