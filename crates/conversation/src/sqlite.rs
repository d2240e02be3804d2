//! SQLite turn log.
//!
//! One table, `turns`, keyed by `turn_id` with a unique
//! `(conversation_id, sequence)` pair. The turn body is stored as JSON; the
//! answer embedding is stored separately as a little-endian `f32` blob.

use async_trait::async_trait;
use greenlight_core::error::StoreError;
use greenlight_core::turn::{ConversationId, Turn, TurnStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A durable, append-only turn log in a single SQLite file.
pub struct SqliteTurnStore {
    pool: SqlitePool,
}

impl SqliteTurnStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `":memory:"` for an ephemeral single-connection database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let (options, max_connections) = if path == ":memory:" {
            let options = SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?;
            (options, 1)
        } else {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::Storage(format!("Cannot create {}: {e}", parent.display()))
                    })?;
                }
            }
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            (options, 4)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite turn store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS turns (
                turn_id          TEXT PRIMARY KEY NOT NULL,
                conversation_id  TEXT NOT NULL,
                sequence         INTEGER NOT NULL,
                created_at       TEXT NOT NULL,
                body             TEXT NOT NULL,
                answer_embedding BLOB,
                UNIQUE (conversation_id, sequence)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("turns table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(conversation_id, sequence)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::MigrationFailed(format!("conversation index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, StoreError> {
        let turn_id: String = row
            .try_get("turn_id")
            .map_err(|e| StoreError::QueryFailed(format!("turn_id column: {e}")))?;
        let body: String = row
            .try_get("body")
            .map_err(|e| StoreError::QueryFailed(format!("body column: {e}")))?;
        let blob: Option<Vec<u8>> = row
            .try_get("answer_embedding")
            .map_err(|e| StoreError::QueryFailed(format!("answer_embedding column: {e}")))?;

        let mut turn: Turn = serde_json::from_str(&body).map_err(|e| StoreError::Corrupt {
            turn_id: turn_id.clone(),
            reason: e.to_string(),
        })?;

        turn.answer_embedding = match blob {
            Some(bytes) if bytes.len() % 4 != 0 => {
                return Err(StoreError::Corrupt {
                    turn_id,
                    reason: format!("embedding blob of {} bytes", bytes.len()),
                });
            }
            Some(bytes) => Some(blob_to_embedding(&bytes)),
            None => None,
        };
        Ok(turn)
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn blob_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl TurnStore for SqliteTurnStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn append(&self, turn: &Turn) -> Result<(), StoreError> {
        let mut body_turn = turn.clone();
        let blob = body_turn.answer_embedding.take().map(|e| embedding_to_blob(&e));
        let body = serde_json::to_string(&body_turn)
            .map_err(|e| StoreError::Storage(format!("Turn serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO turns (turn_id, conversation_id, sequence, created_at, body, answer_embedding)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&turn.turn_id)
        .bind(turn.conversation_id.as_str())
        .bind(i64::from(turn.sequence))
        .bind(turn.created_at.to_rfc3339())
        .bind(&body)
        .bind(blob.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT failed: {e}")))?;

        debug!(
            conversation_id = %turn.conversation_id,
            sequence = turn.sequence,
            "Appended turn"
        );
        Ok(())
    }

    async fn turns(&self, conversation_id: &ConversationId) -> Result<Vec<Turn>, StoreError> {
        let rows = sqlx::query(
            "SELECT turn_id, body, answer_embedding FROM turns WHERE conversation_id = ?1 ORDER BY sequence ASC",
        )
        .bind(conversation_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("turns: {e}")))?;

        rows.iter().map(Self::row_to_turn).collect()
    }

    async fn count(&self, conversation_id: &ConversationId) -> Result<usize, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM turns WHERE conversation_id = ?1")
            .bind(conversation_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("COUNT: {e}")))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| StoreError::QueryFailed(format!("cnt column: {e}")))?;

        Ok(usize::try_from(cnt).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::turn;
    use greenlight_core::entity::EntityId;
    use greenlight_core::turn::QuestionType;

    async fn file_store(dir: &tempfile::TempDir) -> SqliteTurnStore {
        let path = dir.path().join("turns.db");
        SqliteTurnStore::open(&path.to_string_lossy()).await.unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;

        let mut first = turn("c1", 0, &["maja", "ola"]);
        first.question_type = QuestionType::Compare;
        store.append(&first).await.unwrap();
        store.append(&turn("c1", 1, &["ola"])).await.unwrap();

        let turns = store.turns(&ConversationId::from("c1")).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].question_type, QuestionType::Compare);
        assert_eq!(
            turns[0].entities_covered,
            vec![EntityId::new("maja"), EntityId::new("ola")]
        );
        assert_eq!(turns[1].sequence, 1);
    }

    #[tokio::test]
    async fn embedding_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        let mut t = turn("c1", 0, &[]);
        t.answer_embedding = Some(vec![0.25, -1.5, 3.0]);
        store.append(&t).await.unwrap();

        let read = store.turns(&ConversationId::from("c1")).await.unwrap();
        assert_eq!(read[0].answer_embedding, Some(vec![0.25, -1.5, 3.0]));
    }

    #[tokio::test]
    async fn missing_embedding_stays_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        let mut t = turn("c1", 0, &[]);
        t.answer_embedding = None;
        store.append(&t).await.unwrap();

        let read = store.turns(&ConversationId::from("c1")).await.unwrap();
        assert!(read[0].answer_embedding.is_none());
    }

    #[tokio::test]
    async fn duplicate_sequence_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        store.append(&turn("c1", 0, &[])).await.unwrap();
        let mut dup = turn("c1", 0, &[]);
        dup.turn_id = "another".into();
        assert!(store.append(&dup).await.is_err());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = file_store(&dir).await;
            store.append(&turn("c1", 0, &["maja"])).await.unwrap();
        }
        let reopened = file_store(&dir).await;
        assert_eq!(reopened.count(&ConversationId::from("c1")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn in_memory_database() {
        let store = SqliteTurnStore::open(":memory:").await.unwrap();
        store.append(&turn("c1", 0, &[])).await.unwrap();
        assert_eq!(store.count(&ConversationId::from("c1")).await.unwrap(), 1);
        assert_eq!(store.name(), "sqlite");
    }

    #[tokio::test]
    async fn corrupt_body_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir).await;
        sqlx::query(
            "INSERT INTO turns (turn_id, conversation_id, sequence, created_at, body) VALUES ('bad', 'c1', 0, 'now', '{not json')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        let err = store.turns(&ConversationId::from("c1")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { turn_id, .. } if turn_id == "bad"));
    }
}
