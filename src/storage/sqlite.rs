use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{Invocation, Session, Storage};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::graph::{ActionRequest, Thought, ThoughtGraph, ThoughtKind, ThoughtStatus};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory storage instance, mainly for tests
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration {
                message: format!("Failed to run migrations: {}", e),
            })?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        let metadata = session
            .metadata
            .as_ref()
            .map(|m| serde_json::to_string(m).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO sessions (id, created_at, updated_at, metadata)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(&metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, created_at, updated_at, metadata
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn touch_session(&self, id: &str, updated_at: DateTime<Utc>) -> StorageResult<()> {
        let result = sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(updated_at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound {
                session_id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn save_thought(
        &self,
        session_id: &str,
        position: i64,
        thought: &Thought,
    ) -> StorageResult<()> {
        let dependencies =
            serde_json::to_string(&thought.dependencies).map_err(|e| StorageError::Query {
                message: format!("Failed to encode dependencies: {}", e),
            })?;
        let action_request = thought
            .action_request
            .as_ref()
            .map(|a| serde_json::to_string(a))
            .transpose()
            .map_err(|e| StorageError::Query {
                message: format!("Failed to encode action request: {}", e),
            })?;

        sqlx::query(
            r#"
            INSERT INTO thoughts
                (id, session_id, position, content, kind, dependencies,
                 confidence, action_request, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&thought.id)
        .bind(session_id)
        .bind(position)
        .bind(&thought.content)
        .bind(thought.kind.as_str())
        .bind(&dependencies)
        .bind(thought.confidence)
        .bind(&action_request)
        .bind(thought.status.to_string())
        .bind(thought.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_thoughts_stale(
        &self,
        session_id: &str,
        thought_ids: &[String],
    ) -> StorageResult<()> {
        for id in thought_ids {
            sqlx::query("UPDATE thoughts SET status = 'stale' WHERE session_id = ? AND id = ?")
                .bind(session_id)
                .bind(id)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    async fn get_session_thoughts(&self, session_id: &str) -> StorageResult<Vec<Thought>> {
        let rows: Vec<ThoughtRow> = sqlx::query_as(
            r#"
            SELECT id, content, kind, dependencies, confidence,
                   action_request, status, created_at
            FROM thoughts
            WHERE session_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Thought::try_from).collect()
    }

    async fn load_graph(&self, session_id: &str) -> StorageResult<Option<ThoughtGraph>> {
        let Some(session) = self.get_session(session_id).await? else {
            return Ok(None);
        };
        let thoughts = self.get_session_thoughts(session_id).await?;

        Ok(Some(ThoughtGraph::from_parts(
            session.id,
            session.created_at,
            thoughts,
        )))
    }

    async fn log_invocation(&self, invocation: &Invocation) -> StorageResult<()> {
        let input = serde_json::to_string(&invocation.input).unwrap_or_default();
        let output = invocation
            .output
            .as_ref()
            .map(|o| serde_json::to_string(o).unwrap_or_default());

        sqlx::query(
            r#"
            INSERT INTO invocations
                (id, session_id, tool_name, input, output, latency_ms,
                 success, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&invocation.id)
        .bind(&invocation.session_id)
        .bind(&invocation.tool_name)
        .bind(&input)
        .bind(&output)
        .bind(invocation.latency_ms)
        .bind(invocation.success)
        .bind(&invocation.error)
        .bind(invocation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// Internal row types for SQLx mapping

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    created_at: String,
    updated_at: String,
    metadata: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ThoughtRow {
    id: String,
    content: String,
    kind: String,
    dependencies: String,
    confidence: Option<f64>,
    action_request: Option<String>,
    status: String,
    created_at: String,
}

fn parse_timestamp(raw: &str, column: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Query {
            message: format!("Invalid {} timestamp '{}': {}", column, raw, e),
        })
}

impl TryFrom<SessionRow> for Session {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let metadata = row
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::Query {
                message: format!("Invalid session metadata: {}", e),
            })?;

        Ok(Session {
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            updated_at: parse_timestamp(&row.updated_at, "updated_at")?,
            id: row.id,
            metadata,
        })
    }
}

impl TryFrom<ThoughtRow> for Thought {
    type Error = StorageError;

    fn try_from(row: ThoughtRow) -> Result<Self, Self::Error> {
        let kind: ThoughtKind = row.kind.parse().map_err(|e| StorageError::Query {
            message: format!("Invalid thought kind: {}", e),
        })?;
        let status: ThoughtStatus = row.status.parse().map_err(|e| StorageError::Query {
            message: format!("Invalid thought status: {}", e),
        })?;
        let dependencies: Vec<String> =
            serde_json::from_str(&row.dependencies).map_err(|e| StorageError::Query {
                message: format!("Invalid dependency list: {}", e),
            })?;
        let action_request: Option<ActionRequest> = row
            .action_request
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| StorageError::Query {
                message: format!("Invalid action request: {}", e),
            })?;

        Ok(Thought {
            created_at: parse_timestamp(&row.created_at, "created_at")?,
            id: row.id,
            content: row.content,
            kind,
            dependencies,
            confidence: row.confidence,
            action_request,
            status,
        })
    }
}
