//! Relational persistence for sessions and conversation history.
//!
//! Plain CRUD over SQLite. A chat response must succeed even when history
//! cannot be written, so callers log and swallow failures from this store.

use std::path::PathBuf;
use std::time::Instant;

use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::llm::ChatMessage;
use crate::models::HistoryEntryBody;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: Uuid,
    pub created_at: String,
    pub last_active: String,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub async fn new(db_path: PathBuf) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                sources JSON DEFAULT '[]',
                metadata JSON DEFAULT '{}',
                FOREIGN KEY(session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_conversations_session
             ON conversations(session_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<Option<SessionRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT session_id, created_at, last_active FROM sessions WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SessionRow {
            session_id,
            created_at: row.try_get("created_at").unwrap_or_default(),
            last_active: row.try_get("last_active").unwrap_or_default(),
        }))
    }

    /// Creates the session on first reference; refreshes `last_active` on
    /// every subsequent one. Last-writer-wins is fine for advisory metadata.
    pub async fn get_or_create_session(&self, session_id: Uuid) -> Result<SessionRow, sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT OR IGNORE INTO sessions (session_id, created_at, last_active)
             VALUES (?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        sqlx::query("UPDATE sessions SET last_active = ? WHERE session_id = ?")
            .bind(&now)
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        self.get_session(session_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    /// Appends one completed exchange. One row per exchange with a non-null
    /// answer; rows are never updated afterwards.
    pub async fn save_conversation(
        &self,
        session_id: Uuid,
        query: &str,
        response: &str,
        sources: &Value,
        metadata: &Value,
    ) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO conversations (session_id, timestamp, query, response, sources, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(now)
        .bind(query)
        .bind(response)
        .bind(sources)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stored exchanges for a session, oldest first.
    pub async fn get_history(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<HistoryEntryBody>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT timestamp, query, response, sources
             FROM conversations
             WHERE session_id = ?
             ORDER BY id ASC
             LIMIT ?",
        )
        .bind(session_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| HistoryEntryBody {
                timestamp: row.try_get("timestamp").unwrap_or_default(),
                query: row.try_get("query").unwrap_or_default(),
                response: row.try_get("response").unwrap_or_default(),
                sources: row
                    .try_get::<Option<Value>, _>("sources")
                    .ok()
                    .flatten()
                    .unwrap_or(Value::Array(Vec::new())),
            })
            .collect())
    }

    /// Recent exchanges as alternating user/assistant messages for the
    /// agent's prompt, chronological order.
    pub async fn recent_context(
        &self,
        session_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT query, response
             FROM conversations
             WHERE session_id = ?
             ORDER BY id DESC
             LIMIT ?",
        )
        .bind(session_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut context = Vec::with_capacity(rows.len() * 2);
        for row in rows.into_iter().rev() {
            let query: String = row.try_get("query").unwrap_or_default();
            let response: String = row.try_get("response").unwrap_or_default();
            context.push(ChatMessage::user(query));
            context.push(ChatMessage::assistant(response));
        }

        Ok(context)
    }

    /// Connectivity probe for the health endpoint.
    pub async fn health_check(&self) -> (bool, f64, Option<String>) {
        let started = Instant::now();
        let result = sqlx::query("SELECT 1").fetch_one(&self.pool).await;
        let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
        match result {
            Ok(_) => (true, latency_ms, None),
            Err(err) => (false, latency_ms, Some(err.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn test_store() -> (HistoryStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.db"))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn unknown_session_is_none() {
        let (store, _dir) = test_store().await;
        assert!(store.get_session(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();

        let first = store.get_or_create_session(id).await.unwrap();
        let second = store.get_or_create_session(id).await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(first.created_at, second.created_at);
        assert!(store.get_session(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn history_is_oldest_first() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();
        store.get_or_create_session(id).await.unwrap();

        for i in 0..3 {
            store
                .save_conversation(
                    id,
                    &format!("question {}", i),
                    &format!("answer {}", i),
                    &json!([]),
                    &json!({}),
                )
                .await
                .unwrap();
        }

        let entries = store.get_history(id, 50).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].query, "question 0");
        assert_eq!(entries[2].query, "question 2");
    }

    #[tokio::test]
    async fn history_respects_limit() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();
        store.get_or_create_session(id).await.unwrap();

        for i in 0..5 {
            store
                .save_conversation(id, &format!("q{}", i), "a", &json!([]), &json!({}))
                .await
                .unwrap();
        }

        let entries = store.get_history(id, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn recent_context_alternates_roles_chronologically() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();
        store.get_or_create_session(id).await.unwrap();

        store
            .save_conversation(id, "first q", "first a", &json!([]), &json!({}))
            .await
            .unwrap();
        store
            .save_conversation(id, "second q", "second a", &json!([]), &json!({}))
            .await
            .unwrap();

        let context = store.recent_context(id, 5).await.unwrap();
        assert_eq!(context.len(), 4);
        assert_eq!(context[0].role, "user");
        assert_eq!(context[0].content, "first q");
        assert_eq!(context[1].role, "assistant");
        assert_eq!(context[3].content, "second a");
    }

    #[tokio::test]
    async fn sources_round_trip_as_json() {
        let (store, _dir) = test_store().await;
        let id = Uuid::new_v4();
        store.get_or_create_session(id).await.unwrap();

        let sources = json!([{"source_url": "/docs/a", "chunk_position": 0}]);
        store
            .save_conversation(id, "q", "a", &sources, &json!({"mode": "full"}))
            .await
            .unwrap();

        let entries = store.get_history(id, 10).await.unwrap();
        assert_eq!(entries[0].sources, sources);
    }

    #[tokio::test]
    async fn health_check_reports_latency() {
        let (store, _dir) = test_store().await;
        let (healthy, latency_ms, error) = store.health_check().await;
        assert!(healthy);
        assert!(latency_ms >= 0.0);
        assert!(error.is_none());
    }
}
