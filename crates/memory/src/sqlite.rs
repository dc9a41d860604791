//! SQLite memory backend.
//!
//! One `memories` table holds every memory; embeddings are stored as
//! little-endian `f32` blobs. Timestamps are fixed-width RFC 3339 strings
//! (UTC, microseconds) so they compare correctly as text.

use async_trait::async_trait;
use cadence_core::error::MemoryError;
use cadence_core::memory::{Memory, MemoryBackend, MemoryFilter, MemoryMetadata, ScopeFilter};
use cadence_core::workflow::WorkflowId;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed [`MemoryBackend`].
pub struct SqliteBackend {
    pool: SqlitePool,
}

fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
}

impl SqliteBackend {
    /// Open (or create) a database.
    ///
    /// `path` is a file path, a `sqlite:` URL, or `":memory:"` for an
    /// ephemeral single-connection database.
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let in_memory = path == ":memory:" || path == "sqlite::memory:";
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
        } else if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path)
                .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        MemoryError::Storage(format!("Cannot create {}: {e}", parent.display()))
                    })?;
                }
            }
            SqliteConnectOptions::new().filename(path)
        };

        let options = options
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // every pooled connection to :memory: would see its own empty database
        let max_connections = if in_memory { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let backend = Self { pool };
        backend.run_migrations().await?;
        info!("SQLite memory backend initialized at {path}");
        Ok(backend)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let backend = Self { pool };
        backend.run_migrations().await?;
        Ok(backend)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id           TEXT PRIMARY KEY NOT NULL,
                memory_type  TEXT NOT NULL,
                content      TEXT NOT NULL,
                workflow_id  TEXT,
                importance   REAL NOT NULL DEFAULT 0.5,
                expires_at   TEXT,
                tags         TEXT NOT NULL DEFAULT '[]',
                source       TEXT,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                embedding    BLOB
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("memories table: {e}")))?;

        for (name, ddl) in [
            (
                "workflow index",
                "CREATE INDEX IF NOT EXISTS idx_memories_workflow ON memories(workflow_id)",
            ),
            (
                "type index",
                "CREATE INDEX IF NOT EXISTS idx_memories_type ON memories(memory_type)",
            ),
            (
                "created_at index",
                "CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at DESC)",
            ),
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| MemoryError::MigrationFailed(format!("{name}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `Memory` from a SQLite row.
    fn row_to_memory(row: &sqlx::sqlite::SqliteRow) -> Result<Memory, MemoryError> {
        let col = |name: &str, e: sqlx::Error| MemoryError::QueryFailed(format!("{name} column: {e}"));

        let id: String = row.try_get("id").map_err(|e| col("id", e))?;
        let memory_type: String = row.try_get("memory_type").map_err(|e| col("memory_type", e))?;
        let content: String = row.try_get("content").map_err(|e| col("content", e))?;
        let workflow_id: Option<String> = row.try_get("workflow_id").map_err(|e| col("workflow_id", e))?;
        let importance: f64 = row.try_get("importance").map_err(|e| col("importance", e))?;
        let expires_at: Option<String> = row.try_get("expires_at").map_err(|e| col("expires_at", e))?;
        let tags_json: String = row.try_get("tags").map_err(|e| col("tags", e))?;
        let source: Option<String> = row.try_get("source").map_err(|e| col("source", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| col("created_at", e))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| col("updated_at", e))?;
        let embedding: Option<Vec<u8>> = row.try_get("embedding").map_err(|e| col("embedding", e))?;

        let tags: Vec<String> = serde_json::from_str(&tags_json)
            .map_err(|e| MemoryError::QueryFailed(format!("tags column for {id}: {e}")))?;

        Ok(Memory {
            id,
            memory_type: memory_type.parse()?,
            content,
            workflow_id: workflow_id.map(WorkflowId::from),
            importance: importance as f32,
            expires_at: expires_at.as_deref().map(|s| parse_ts("expires_at", s)).transpose()?,
            metadata: MemoryMetadata { tags, source },
            created_at: parse_ts("created_at", &created_at)?,
            updated_at: parse_ts("updated_at", &updated_at)?,
            embedding: embedding.map(|blob| Self::blob_to_embedding(&blob)),
        })
    }

    /// Serialize an embedding vector to bytes.
    fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
        blob.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    /// Translate a filter into a WHERE clause and its bind values.
    ///
    /// Returns `None` when the filter cannot match anything.
    fn where_clause(filter: &MemoryFilter) -> Option<(String, Vec<String>)> {
        if !filter.scope_is_satisfiable() {
            return None;
        }

        let mut clauses: Vec<&str> = Vec::new();
        let mut binds: Vec<String> = Vec::new();

        if let Some(t) = filter.memory_type {
            clauses.push("memory_type = ?");
            binds.push(t.as_str().to_string());
        }

        if let Some(now) = filter.not_expired_at {
            clauses.push("(expires_at IS NULL OR expires_at > ?)");
            binds.push(ts(now));
        }

        match (filter.scope, &filter.workflow_id) {
            (ScopeFilter::Workflow, Some(w)) => {
                clauses.push("workflow_id = ?");
                binds.push(w.to_string());
            }
            (ScopeFilter::Both, Some(w)) => {
                clauses.push("(workflow_id IS NULL OR workflow_id = ?)");
                binds.push(w.to_string());
            }
            (ScopeFilter::General, _) | (ScopeFilter::Both, None) => {
                clauses.push("workflow_id IS NULL");
            }
            (ScopeFilter::Workflow, None) => return None,
        }

        Some((clauses.join(" AND "), binds))
    }

    async fn write(&self, sql: &str, memory: &Memory) -> Result<u64, MemoryError> {
        let tags_json = serde_json::to_string(&memory.metadata.tags)
            .map_err(|e| MemoryError::Storage(format!("Tags serialization: {e}")))?;
        let embedding_blob: Option<Vec<u8>> = memory.embedding.as_deref().map(Self::embedding_to_blob);

        let result = sqlx::query(sql)
            .bind(&memory.id)
            .bind(memory.memory_type.as_str())
            .bind(&memory.content)
            .bind(memory.workflow_id.as_ref().map(|w| w.to_string()))
            .bind(memory.importance as f64)
            .bind(memory.expires_at.map(ts))
            .bind(&tags_json)
            .bind(&memory.metadata.source)
            .bind(ts(memory.created_at))
            .bind(ts(memory.updated_at))
            .bind(embedding_blob.as_deref())
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("write failed: {e}")))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl MemoryBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert(&self, memory: Memory) -> Result<(), MemoryError> {
        self.write(
            r#"
            INSERT INTO memories
                (id, memory_type, content, workflow_id, importance, expires_at,
                 tags, source, created_at, updated_at, embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            &memory,
        )
        .await?;
        debug!("Stored memory {}", memory.id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Memory>, MemoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("GET by ID: {e}")))?;

        match row {
            Some(ref r) => Ok(Some(Self::row_to_memory(r)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, memory: Memory) -> Result<bool, MemoryError> {
        let affected = self
            .write(
                r#"
                UPDATE memories SET
                    memory_type = ?2, content = ?3, workflow_id = ?4, importance = ?5,
                    expires_at = ?6, tags = ?7, source = ?8, created_at = ?9,
                    updated_at = ?10, embedding = ?11
                WHERE id = ?1
                "#,
                &memory,
            )
            .await?;
        Ok(affected > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn query(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, MemoryError> {
        let Some((clause, binds)) = Self::where_clause(filter) else {
            return Ok(vec![]);
        };
        let sql = format!("SELECT * FROM memories WHERE {clause} ORDER BY created_at DESC");
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("query: {e}")))?;

        rows.iter().map(Self::row_to_memory).collect()
    }

    async fn delete_matching(&self, filter: &MemoryFilter) -> Result<usize, MemoryError> {
        let Some((clause, binds)) = Self::where_clause(filter) else {
            return Ok(0);
        };
        let sql = format!("DELETE FROM memories WHERE {clause}");
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("DELETE matching failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, MemoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1")
            .bind(ts(now))
            .execute(&self.pool)
            .await
            .map_err(|e| MemoryError::Storage(format!("purge failed: {e}")))?;
        Ok(result.rows_affected() as usize)
    }

    async fn count(&self) -> Result<usize, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM memories")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| MemoryError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(cnt as usize)
    }
}
