use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::SharedState;
use crate::error::{McpError, McpResult};
use crate::graph::{
    ActionRequest, QueryFilters, SortMode, Thought, ThoughtKind, ThoughtStatus,
};
use crate::storage::Storage;

/// Tool name for inserting a thought.
pub const TOOL_INSERT_THOUGHT: &str = "insert_thought";
/// Tool name for reading the graph in full or summary form.
pub const TOOL_GET_GRAPH: &str = "get_graph";
/// Tool name for invalidating an assumption.
pub const TOOL_INVALIDATE: &str = "invalidate";
/// Tool name for querying the node set.
pub const TOOL_QUERY: &str = "query";
/// Tool name for reading admission controller state.
pub const TOOL_ADMISSION_STATS: &str = "admission_stats";

/// Page size used when the caller does not pass one.
const DEFAULT_LIMIT: usize = 20;
/// Largest accepted page size.
const MAX_LIMIT: usize = 100;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        TOOL_INSERT_THOUGHT => handle_insert_thought(state, arguments).await,
        TOOL_GET_GRAPH => handle_get_graph(state, arguments).await,
        TOOL_INVALIDATE => handle_invalidate(state, arguments).await,
        TOOL_QUERY => handle_query(state, arguments).await,
        TOOL_ADMISSION_STATS => handle_admission_stats(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// insert_thought
// ============================================================================

#[derive(Debug, Deserialize)]
struct InsertThoughtParams {
    content: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    dependencies: Vec<String>,
    confidence: Option<f64>,
    action_request: Option<ActionRequest>,
}

#[derive(Debug, Serialize)]
struct InsertThoughtResult {
    id: String,
    total_count: usize,
}

async fn handle_insert_thought(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: InsertThoughtParams = parse_arguments(TOOL_INSERT_THOUGHT, arguments)?;

    // Validation happens entirely ahead of the core call.
    let kind = parse_kind(TOOL_INSERT_THOUGHT, &params.kind)?;
    require_non_empty(TOOL_INSERT_THOUGHT, "content", &params.content)?;
    validate_confidence(TOOL_INSERT_THOUGHT, "confidence", params.confidence)?;

    let mut thought = Thought::new(params.content, kind, params.dependencies);
    if let Some(confidence) = params.confidence {
        thought = thought.with_confidence(confidence);
    }
    if let Some(action_request) = params.action_request {
        thought = thought.with_action_request(action_request);
    }
    let record = thought.clone();

    let total_count = {
        let mut engine = state.engine.lock().await;
        engine
            .admission
            .check(TOOL_INSERT_THOUGHT, None)
            .map_err(execution_failed)?;
        engine.graph.insert(thought).map_err(execution_failed)?;
        engine.graph.len()
    };

    persist_insert(
        &state.storage,
        &state.session_id,
        total_count as i64 - 1,
        &record,
    )
    .await;

    info!(
        thought_id = %record.id,
        kind = %record.kind,
        total = total_count,
        "Thought inserted"
    );

    serde_json::to_value(InsertThoughtResult {
        id: record.id,
        total_count,
    })
    .map_err(McpError::Json)
}

// ============================================================================
// get_graph
// ============================================================================

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum GraphFormat {
    #[default]
    Full,
    Summary,
}

#[derive(Debug, Deserialize, Default)]
struct GetGraphParams {
    #[serde(default)]
    format: GraphFormat,
}

#[derive(Debug, Serialize)]
struct GraphFullResult {
    session_id: String,
    created_at: DateTime<Utc>,
    thoughts: Vec<Thought>,
    total: usize,
}

#[derive(Debug, Serialize)]
struct GraphSummaryResult {
    session_id: String,
    total: usize,
    counts_by_type: BTreeMap<String, usize>,
    stale_count: usize,
}

async fn handle_get_graph(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: GetGraphParams = parse_arguments_opt(TOOL_GET_GRAPH, arguments)?;

    let mut engine = state.engine.lock().await;
    engine
        .admission
        .check(TOOL_GET_GRAPH, None)
        .map_err(execution_failed)?;

    let graph = &engine.graph;
    let result = match params.format {
        GraphFormat::Full => serde_json::to_value(GraphFullResult {
            session_id: graph.session_id().to_string(),
            created_at: graph.created_at(),
            thoughts: graph.thoughts().cloned().collect(),
            total: graph.len(),
        }),
        GraphFormat::Summary => serde_json::to_value(GraphSummaryResult {
            session_id: graph.session_id().to_string(),
            total: graph.len(),
            counts_by_type: graph.counts_by_kind(),
            stale_count: graph.stale_count(),
        }),
    };

    result.map_err(McpError::Json)
}

// ============================================================================
// invalidate
// ============================================================================

#[derive(Debug, Deserialize)]
struct InvalidateParams {
    id: String,
    reason: String,
}

async fn handle_invalidate(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: InvalidateParams = parse_arguments(TOOL_INVALIDATE, arguments)?;
    require_non_empty(TOOL_INVALIDATE, "id", &params.id)?;
    require_non_empty(TOOL_INVALIDATE, "reason", &params.reason)?;

    let (outcome, critique, critique_position) = {
        let mut engine = state.engine.lock().await;
        engine
            .admission
            .check(TOOL_INVALIDATE, None)
            .map_err(execution_failed)?;
        let outcome = engine
            .graph
            .invalidate(&params.id, &params.reason)
            .map_err(execution_failed)?;
        let critique = outcome
            .critique_id
            .as_ref()
            .and_then(|id| engine.graph.get(id).cloned());
        (outcome, critique, engine.graph.len() as i64 - 1)
    };

    persist_invalidation(
        &state.storage,
        &state.session_id,
        &outcome.invalidated_ids,
        critique.as_ref().map(|c| (critique_position, c)),
    )
    .await;

    info!(
        thought_id = %params.id,
        staled = outcome.invalidated_ids.len(),
        "Assumption invalidated"
    );

    serde_json::to_value(&outcome).map_err(McpError::Json)
}

// ============================================================================
// query
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    #[serde(rename = "type")]
    kind: Option<String>,
    status: Option<String>,
    content: Option<String>,
    min_confidence: Option<f64>,
    max_confidence: Option<f64>,
    dependency_of: Option<String>,
    depends_on: Option<String>,
    sort: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn handle_query(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: QueryParams = parse_arguments_opt(TOOL_QUERY, arguments)?;

    let kind = params
        .kind
        .as_deref()
        .map(|raw| parse_kind(TOOL_QUERY, raw))
        .transpose()?;
    let status = params
        .status
        .as_deref()
        .map(|raw| parse_status(TOOL_QUERY, raw))
        .transpose()?;
    let sort = params
        .sort
        .as_deref()
        .map(|raw| parse_sort(TOOL_QUERY, raw))
        .transpose()?
        .unwrap_or_default();
    validate_confidence(TOOL_QUERY, "min_confidence", params.min_confidence)?;
    validate_confidence(TOOL_QUERY, "max_confidence", params.max_confidence)?;
    if let (Some(min), Some(max)) = (params.min_confidence, params.max_confidence) {
        if min > max {
            return Err(invalid_params(
                TOOL_QUERY,
                format!("min_confidence {} exceeds max_confidence {}", min, max),
            ));
        }
    }
    let limit = validate_limit(TOOL_QUERY, params.limit)?;
    let offset = params.offset.unwrap_or(0);

    let filters = QueryFilters {
        kind,
        status,
        content: params.content,
        min_confidence: params.min_confidence,
        max_confidence: params.max_confidence,
        dependency_of: params.dependency_of,
        depends_on: params.depends_on,
    };

    let mut engine = state.engine.lock().await;
    engine
        .admission
        .check(TOOL_QUERY, None)
        .map_err(execution_failed)?;
    let outcome = engine.graph.query(&filters, sort, limit, offset);

    serde_json::to_value(outcome).map_err(McpError::Json)
}

// ============================================================================
// admission_stats
// ============================================================================

#[derive(Debug, Deserialize)]
struct AdmissionStatsParams {
    operation: String,
}

async fn handle_admission_stats(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AdmissionStatsParams = parse_arguments(TOOL_ADMISSION_STATS, arguments)?;
    require_non_empty(TOOL_ADMISSION_STATS, "operation", &params.operation)?;

    let mut engine = state.engine.lock().await;
    engine
        .admission
        .check(TOOL_ADMISSION_STATS, None)
        .map_err(execution_failed)?;
    let stats = engine.admission.stats(&params.operation, None);

    serde_json::to_value(stats).map_err(McpError::Json)
}

// ============================================================================
// Fire-and-forget persistence
// ============================================================================

/// Persist a newly inserted thought.
///
/// Failures are logged and swallowed: the in-memory mutation has already
/// been applied and is never rolled back.
pub(crate) async fn persist_insert(
    storage: &dyn Storage,
    session_id: &str,
    position: i64,
    thought: &Thought,
) {
    if let Err(e) = storage.save_thought(session_id, position, thought).await {
        warn!(
            error = %e,
            thought_id = %thought.id,
            "Failed to persist thought; in-memory state retained"
        );
    }
    touch_session(storage, session_id).await;
}

/// Persist the effects of a cascade: staled rows plus the appended critique.
pub(crate) async fn persist_invalidation(
    storage: &dyn Storage,
    session_id: &str,
    staled_ids: &[String],
    critique: Option<(i64, &Thought)>,
) {
    if staled_ids.is_empty() && critique.is_none() {
        return;
    }
    if let Err(e) = storage.mark_thoughts_stale(session_id, staled_ids).await {
        warn!(
            error = %e,
            count = staled_ids.len(),
            "Failed to persist staleness; in-memory state retained"
        );
    }
    if let Some((position, thought)) = critique {
        if let Err(e) = storage.save_thought(session_id, position, thought).await {
            warn!(
                error = %e,
                thought_id = %thought.id,
                "Failed to persist critique; in-memory state retained"
            );
        }
    }
    touch_session(storage, session_id).await;
}

async fn touch_session(storage: &dyn Storage, session_id: &str) {
    if let Err(e) = storage.touch_session(session_id, Utc::now()).await {
        warn!(error = %e, session_id, "Failed to touch session");
    }
}

// ============================================================================
// Validation helpers (the gate in front of the core)
// ============================================================================

fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Like [`parse_arguments`] but for tools whose fields are all optional.
fn parse_arguments_opt<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    let args = arguments.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: e.to_string(),
    })
}

fn invalid_params(tool_name: &str, message: impl Into<String>) -> McpError {
    McpError::InvalidParameters {
        tool_name: tool_name.to_string(),
        message: message.into(),
    }
}

fn execution_failed<E: std::fmt::Display>(err: E) -> McpError {
    McpError::ExecutionFailed {
        message: err.to_string(),
    }
}

fn parse_kind(tool_name: &str, raw: &str) -> McpResult<ThoughtKind> {
    raw.parse().map_err(|e| invalid_params(tool_name, e))
}

fn parse_status(tool_name: &str, raw: &str) -> McpResult<ThoughtStatus> {
    raw.parse().map_err(|e| invalid_params(tool_name, e))
}

fn parse_sort(tool_name: &str, raw: &str) -> McpResult<SortMode> {
    raw.parse().map_err(|e| invalid_params(tool_name, e))
}

fn require_non_empty(tool_name: &str, field: &str, value: &str) -> McpResult<()> {
    if value.trim().is_empty() {
        return Err(invalid_params(
            tool_name,
            format!("{} cannot be empty", field),
        ));
    }
    Ok(())
}

fn validate_confidence(tool_name: &str, field: &str, value: Option<f64>) -> McpResult<()> {
    if let Some(confidence) = value {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(invalid_params(
                tool_name,
                format!("{} must be within [0, 1], got {}", field, confidence),
            ));
        }
    }
    Ok(())
}

fn validate_limit(tool_name: &str, limit: Option<usize>) -> McpResult<usize> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(limit) if (1..=MAX_LIMIT).contains(&limit) => Ok(limit),
        Some(limit) => Err(invalid_params(
            tool_name,
            format!("limit must be within 1..={}, got {}", MAX_LIMIT, limit),
        )),
    }
}
