//! End-to-end dispatch tests: tool calls routed through `handle_tool_call`
//! against in-memory storage, covering validation, the happy paths, and
//! rate-limit surfacing.

use std::path::PathBuf;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use mcp_deliberation::admission::BucketLimits;
use mcp_deliberation::config::{AdmissionConfig, Config, DatabaseConfig, LogFormat, LoggingConfig};
use mcp_deliberation::server::{
    handle_tool_call, AppState, SharedState, TOOL_ADMISSION_STATS, TOOL_GET_GRAPH,
    TOOL_INSERT_THOUGHT, TOOL_INVALIDATE, TOOL_QUERY,
};
use mcp_deliberation::storage::{Session, SqliteStorage, Storage};

fn test_config(admission: AdmissionConfig) -> Config {
    Config {
        database: DatabaseConfig {
            path: PathBuf::from(":memory:"),
            max_connections: 1,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
        },
        admission,
    }
}

async fn test_state_with(admission: AdmissionConfig) -> SharedState {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let state = Arc::new(AppState::new(test_config(admission), storage));
    // Persist the session row the way main does at startup.
    let session = {
        let engine = state.engine.lock().await;
        Session::for_graph(&engine.graph)
    };
    state.storage.create_session(&session).await.unwrap();
    state
}

async fn test_state() -> SharedState {
    test_state_with(AdmissionConfig::default()).await
}

async fn insert(state: &SharedState, content: &str, kind: &str, deps: Vec<&str>) -> String {
    let result = handle_tool_call(
        state,
        TOOL_INSERT_THOUGHT,
        Some(json!({
            "content": content,
            "type": kind,
            "dependencies": deps,
        })),
    )
    .await
    .expect("insert should succeed");
    result["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn unknown_tool_is_rejected() {
    let state = test_state().await;
    let err = handle_tool_call(&state, "reasoning_linear", Some(json!({})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Unknown tool"));
}

#[tokio::test]
async fn insert_validates_before_touching_the_graph() {
    let state = test_state().await;

    let err = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({"content": "x", "type": "musing"})),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Unknown thought type"));

    let err = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({"content": "  ", "type": "objective"})),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("content cannot be empty"));

    let err = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({"content": "x", "type": "objective", "confidence": 1.5})),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("within [0, 1]"));

    // Nothing was inserted by the rejected calls.
    let graph = handle_tool_call(&state, TOOL_GET_GRAPH, Some(json!({"format": "summary"})))
        .await
        .unwrap();
    assert_eq!(graph["total"], 0);
}

#[tokio::test]
async fn insert_reports_id_and_running_total() {
    let state = test_state().await;

    let first = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({"content": "goal", "type": "objective"})),
    )
    .await
    .unwrap();
    assert_eq!(first["total_count"], 1);

    let id = first["id"].as_str().unwrap();
    let second = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({
            "content": "premise",
            "type": "assumption",
            "dependencies": [id],
            "confidence": 0.9,
        })),
    )
    .await
    .unwrap();
    assert_eq!(second["total_count"], 2);
}

#[tokio::test]
async fn dangling_and_cycle_failures_are_distinguishable() {
    let state = test_state().await;

    let err = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({
            "content": "floating",
            "type": "hypothesis",
            "dependencies": ["no-such-id"],
        })),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("missing thought"));
    assert!(!err.to_string().contains("cycle"));
}

#[tokio::test]
async fn scenario_a_through_the_dispatch_layer() {
    let state = test_state().await;

    let o = insert(&state, "O", "objective", vec![]).await;
    let h = insert(&state, "H", "hypothesis", vec![&o]).await;
    let a = insert(&state, "A", "assumption", vec![&h]).await;
    let s = insert(&state, "S", "sub_problem", vec![&a]).await;

    let outcome = handle_tool_call(
        &state,
        TOOL_INVALIDATE,
        Some(json!({"id": a, "reason": "R"})),
    )
    .await
    .unwrap();

    let invalidated: Vec<&str> = outcome["invalidated_ids"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(invalidated, vec![a.as_str(), s.as_str()]);
    assert!(outcome["critique_id"].is_string());

    let summary = handle_tool_call(&state, TOOL_GET_GRAPH, Some(json!({"format": "summary"})))
        .await
        .unwrap();
    assert_eq!(summary["stale_count"], 2);
    assert_eq!(summary["total"], 5);
    assert_eq!(summary["counts_by_type"]["critique"], 1);

    // The critique depends only on the assumption.
    let critique_id = outcome["critique_id"].as_str().unwrap();
    let full = handle_tool_call(&state, TOOL_GET_GRAPH, None).await.unwrap();
    let critique = full["thoughts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|t| t["id"] == critique_id)
        .unwrap();
    assert_eq!(critique["dependencies"], json!([a]));
    assert_eq!(critique["type"], "critique");
}

#[tokio::test]
async fn invalidation_survives_in_memory_and_in_storage() {
    let state = test_state().await;
    let a = insert(&state, "premise", "assumption", vec![]).await;
    insert(&state, "rests on it", "hypothesis", vec![&a]).await;

    handle_tool_call(
        &state,
        TOOL_INVALIDATE,
        Some(json!({"id": a, "reason": "measured otherwise"})),
    )
    .await
    .unwrap();

    let stored = state
        .storage
        .get_session_thoughts(&state.session_id)
        .await
        .unwrap();
    let stale = stored.iter().filter(|t| !t.is_active()).count();
    assert_eq!(stale, 2);
    // Two originals plus the critique row.
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn query_filters_and_paginates_through_dispatch() {
    let state = test_state().await;
    let o = insert(&state, "target", "objective", vec![]).await;
    insert(&state, "alpha idea", "hypothesis", vec![&o]).await;
    insert(&state, "beta idea", "hypothesis", vec![&o]).await;

    let outcome = handle_tool_call(
        &state,
        TOOL_QUERY,
        Some(json!({
            "type": "hypothesis",
            "content": "IDEA",
            "sort": "by_content",
            "limit": 1,
            "offset": 1,
        })),
    )
    .await
    .unwrap();

    assert_eq!(outcome["total_matching"], 2);
    let returned = outcome["returned"].as_array().unwrap();
    assert_eq!(returned.len(), 1);
    assert_eq!(returned[0]["content"], "beta idea");
    assert_eq!(returned[0]["dependency_count"], 1);
}

#[tokio::test]
async fn query_rejects_out_of_bounds_paging() {
    let state = test_state().await;
    let err = handle_tool_call(&state, TOOL_QUERY, Some(json!({"limit": 0})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("limit"));

    let err = handle_tool_call(&state, TOOL_QUERY, Some(json!({"limit": 500})))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("limit"));
}

#[tokio::test]
async fn admission_stats_reports_bucket_state() {
    let state = test_state().await;
    insert(&state, "goal", "objective", vec![]).await;

    let stats = handle_tool_call(
        &state,
        TOOL_ADMISSION_STATS,
        Some(json!({"operation": TOOL_INSERT_THOUGHT})),
    )
    .await
    .unwrap();

    assert_eq!(stats["operation"], TOOL_INSERT_THOUGHT);
    assert_eq!(stats["capacity"], 20.0);
    assert!(stats["tokens_remaining"].as_f64().unwrap() < 20.0);
    assert!(stats["requests_in_current_window"].as_u64().unwrap() >= 2);
}

#[tokio::test]
async fn exhausted_write_bucket_surfaces_rate_limit() {
    let admission = AdmissionConfig {
        write: BucketLimits::new(2.0, 0.001),
        ..Default::default()
    };
    let state = test_state_with(admission).await;

    insert(&state, "one", "objective", vec![]).await;
    insert(&state, "two", "objective", vec![]).await;

    let err = handle_tool_call(
        &state,
        TOOL_INSERT_THOUGHT,
        Some(json!({"content": "three", "type": "objective"})),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Rate limited"));
    assert!(err.to_string().contains("retry after"));

    // Reads ride a separate bucket and still work.
    let summary = handle_tool_call(&state, TOOL_GET_GRAPH, Some(json!({"format": "summary"})))
        .await
        .unwrap();
    assert_eq!(summary["total"], 2);
}

#[tokio::test]
async fn get_graph_full_lists_thoughts_in_insertion_order() {
    let state = test_state().await;
    let first = insert(&state, "first", "objective", vec![]).await;
    let second = insert(&state, "second", "question", vec![&first]).await;

    let full: Value = handle_tool_call(&state, TOOL_GET_GRAPH, None).await.unwrap();
    assert_eq!(full["total"], 2);
    let ids: Vec<&str> = full["thoughts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    assert_eq!(full["session_id"], state.session_id);
}
