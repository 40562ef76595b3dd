//! Integration tests for the SQLite storage layer: session rows, thought
//! round-trips, staleness updates, graph reloads, and the invocation log.

use pretty_assertions::assert_eq;
use tempfile::tempdir;

use mcp_deliberation::config::DatabaseConfig;
use mcp_deliberation::error::StorageError;
use mcp_deliberation::graph::{
    ActionRequest, Thought, ThoughtGraph, ThoughtKind, ThoughtStatus,
};
use mcp_deliberation::storage::{Invocation, Session, SqliteStorage, Storage};

async fn file_storage(dir: &tempfile::TempDir) -> SqliteStorage {
    let config = DatabaseConfig {
        path: dir.path().join("deliberation.db"),
        max_connections: 1,
    };
    SqliteStorage::new(&config)
        .await
        .expect("Failed to create storage")
}

fn sample_graph() -> ThoughtGraph {
    let mut graph = ThoughtGraph::new();
    let o = graph
        .insert(Thought::new("objective", ThoughtKind::Objective, vec![]))
        .unwrap();
    let a = graph
        .insert(
            Thought::new("premise", ThoughtKind::Assumption, vec![o.clone()])
                .with_confidence(0.7),
        )
        .unwrap();
    graph
        .insert(
            Thought::new("act on it", ThoughtKind::Action, vec![a]).with_action_request(
                ActionRequest {
                    tool: "web_search".to_string(),
                    params: serde_json::from_str(r#"{"query": "fuel prices", "top_k": 3}"#)
                        .unwrap(),
                },
            ),
        )
        .unwrap();
    graph
}

async fn persist_graph(storage: &SqliteStorage, graph: &ThoughtGraph) {
    storage
        .create_session(&Session::for_graph(graph))
        .await
        .unwrap();
    for (position, thought) in graph.thoughts().enumerate() {
        storage
            .save_thought(graph.session_id(), position as i64, thought)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn session_round_trip() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let session = Session::new().with_metadata(serde_json::json!({"label": "test"}));

    storage.create_session(&session).await.unwrap();
    let loaded = storage.get_session(&session.id).await.unwrap().unwrap();

    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.metadata, session.metadata);
}

#[tokio::test]
async fn missing_session_is_none() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    assert!(storage.get_session("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn touch_unknown_session_fails() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let err = storage
        .touch_session("ghost", chrono::Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::SessionNotFound { .. }));
}

#[tokio::test]
async fn thoughts_round_trip_in_insertion_order() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let graph = sample_graph();
    persist_graph(&storage, &graph).await;

    let loaded = storage
        .get_session_thoughts(graph.session_id())
        .await
        .unwrap();

    let original: Vec<&Thought> = graph.thoughts().collect();
    assert_eq!(loaded.len(), original.len());
    for (stored, expected) in loaded.iter().zip(original) {
        assert_eq!(stored.id, expected.id);
        assert_eq!(stored.kind, expected.kind);
        assert_eq!(stored.dependencies, expected.dependencies);
        assert_eq!(stored.confidence, expected.confidence);
        assert_eq!(stored.action_request, expected.action_request);
        assert_eq!(stored.status, expected.status);
    }
}

#[tokio::test]
async fn action_request_parameter_order_survives_storage() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let graph = sample_graph();
    persist_graph(&storage, &graph).await;

    let loaded = storage
        .get_session_thoughts(graph.session_id())
        .await
        .unwrap();
    let action = loaded
        .iter()
        .find_map(|t| t.action_request.as_ref())
        .expect("action thought present");
    let keys: Vec<&str> = action.params.keys().map(|k| k.as_str()).collect();
    assert_eq!(keys, vec!["query", "top_k"]);
}

#[tokio::test]
async fn staleness_updates_are_persisted() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let graph = sample_graph();
    persist_graph(&storage, &graph).await;

    let ids: Vec<String> = graph.thoughts().map(|t| t.id.clone()).collect();
    storage
        .mark_thoughts_stale(graph.session_id(), &ids[1..])
        .await
        .unwrap();

    let loaded = storage
        .get_session_thoughts(graph.session_id())
        .await
        .unwrap();
    assert_eq!(loaded[0].status, ThoughtStatus::Active);
    assert_eq!(loaded[1].status, ThoughtStatus::Stale);
    assert_eq!(loaded[2].status, ThoughtStatus::Stale);
}

#[tokio::test]
async fn load_graph_rebuilds_the_full_session() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir).await;
    let graph = sample_graph();
    persist_graph(&storage, &graph).await;

    let reloaded = storage
        .load_graph(graph.session_id())
        .await
        .unwrap()
        .expect("session exists");

    assert_eq!(reloaded.session_id(), graph.session_id());
    assert_eq!(reloaded.len(), graph.len());
    let original: Vec<&str> = graph.thoughts().map(|t| t.id.as_str()).collect();
    let restored: Vec<&str> = reloaded.thoughts().map(|t| t.id.as_str()).collect();
    assert_eq!(original, restored);
}

#[tokio::test]
async fn load_graph_for_unknown_session_is_none() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    assert!(storage.load_graph("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn reloaded_graph_accepts_further_operations() {
    let dir = tempdir().unwrap();
    let storage = file_storage(&dir).await;
    let graph = sample_graph();
    persist_graph(&storage, &graph).await;

    let mut reloaded = storage
        .load_graph(graph.session_id())
        .await
        .unwrap()
        .unwrap();

    let assumption_id = reloaded
        .thoughts()
        .find(|t| t.kind == ThoughtKind::Assumption)
        .map(|t| t.id.clone())
        .unwrap();
    let outcome = reloaded.invalidate(&assumption_id, "stale data").unwrap();
    // Assumption plus the dependent action thought.
    assert_eq!(outcome.invalidated_ids.len(), 2);
}

#[tokio::test]
async fn invocations_are_logged() {
    let storage = SqliteStorage::new_in_memory().await.unwrap();
    let invocation = Invocation::new("sess-1", "query", serde_json::json!({"limit": 5}))
        .success(serde_json::json!({"total_matching": 0}), 4);

    storage.log_invocation(&invocation).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invocations")
        .fetch_one(storage.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}
