//! SQLite history store
//!
//! One `turns` table. JSON payloads (operation, result sample) live in text
//! columns. Timestamps are RFC 3339 with microseconds in UTC so text order
//! matches time order; `rowid` breaks ties.

use crate::error::HistoryError;
use crate::store::{HistoryPage, HistoryStore};
use crate::turn::{ConversationId, Turn, TurnId, TurnOrigin, TurnOutcome};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use nlq_policy::UserId;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS turns (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT,
    natural_query TEXT NOT NULL,
    operation TEXT,
    collection TEXT NOT NULL,
    success INTEGER NOT NULL,
    error TEXT,
    explanation TEXT NOT NULL,
    result_count INTEGER NOT NULL,
    result_sample TEXT NOT NULL,
    execution_time_ms INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    origin TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_turns_user ON turns(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_turns_conversation ON turns(user_id, conversation_id, created_at);
";

const COLUMNS: &str = "id, user_id, conversation_id, natural_query, operation, collection, \
     success, error, explanation, result_count, result_sample, execution_time_ms, created_at, origin";

/// Row as stored, before JSON and id decoding
struct TurnRow {
    id: String,
    user_id: String,
    conversation_id: Option<String>,
    natural_query: String,
    operation: Option<String>,
    collection: String,
    success: bool,
    error: Option<String>,
    explanation: String,
    result_count: i64,
    result_sample: String,
    execution_time_ms: i64,
    created_at: String,
    origin: String,
}

impl TurnRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            conversation_id: row.get(2)?,
            natural_query: row.get(3)?,
            operation: row.get(4)?,
            collection: row.get(5)?,
            success: row.get(6)?,
            error: row.get(7)?,
            explanation: row.get(8)?,
            result_count: row.get(9)?,
            result_sample: row.get(10)?,
            execution_time_ms: row.get(11)?,
            created_at: row.get(12)?,
            origin: row.get(13)?,
        })
    }

    fn into_turn(self) -> Result<Turn, HistoryError> {
        let id = self
            .id
            .parse::<TurnId>()
            .map_err(|e| HistoryError::Storage(format!("bad turn id '{}': {e}", self.id)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| HistoryError::Storage(format!("bad timestamp '{}': {e}", self.created_at)))?
            .with_timezone(&Utc);
        let operation = self
            .operation
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let outcome = if self.success {
            TurnOutcome::Success
        } else {
            TurnOutcome::Failure {
                error: self.error.unwrap_or_default(),
            }
        };
        let origin = if self.origin == TurnOrigin::Direct.as_str() {
            TurnOrigin::Direct
        } else {
            TurnOrigin::Confirmed
        };

        Ok(Turn {
            id,
            user_id: UserId::new(self.user_id),
            conversation_id: self.conversation_id.map(ConversationId::from_string),
            natural_query: self.natural_query,
            operation,
            collection: self.collection,
            outcome,
            explanation: self.explanation,
            result_count: u64::try_from(self.result_count).unwrap_or(0),
            result_sample: serde_json::from_str(&self.result_sample)?,
            execution_time_ms: u64::try_from(self.execution_time_ms).unwrap_or(0),
            created_at,
            origin,
        })
    }
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn collect_turns(rows: Vec<TurnRow>) -> Result<Vec<Turn>, HistoryError> {
    rows.into_iter().map(TurnRow::into_turn).collect()
}

/// SQLite-backed store
///
/// The connection is shared behind a mutex and every call runs on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    /// Open (or create) a database file
    ///
    /// # Errors
    /// Open or schema failure.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let conn = Connection::open(path.as_ref())?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
        Self::init(conn)
    }

    /// Private in-memory database
    ///
    /// # Errors
    /// Schema failure.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, HistoryError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, HistoryError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, HistoryError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, turn: Turn) -> Result<TurnId, HistoryError> {
        let id = turn.id;
        let operation = turn.operation.as_ref().map(serde_json::to_string).transpose()?;
        let sample = serde_json::to_string(&turn.result_sample)?;

        self.with_conn(move |conn| {
            conn.execute(
                &format!("INSERT INTO turns ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"),
                params![
                    turn.id.to_string(),
                    turn.user_id.as_str(),
                    turn.conversation_id.as_ref().map(ConversationId::as_str),
                    turn.natural_query,
                    operation,
                    turn.collection,
                    turn.outcome.is_success(),
                    turn.outcome.error(),
                    turn.explanation,
                    to_sql_int(turn.result_count),
                    sample,
                    to_sql_int(turn.execution_time_ms),
                    timestamp(&turn.created_at),
                    turn.origin.as_str(),
                ],
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(turn = %id, "turn persisted");
        Ok(id)
    }

    async fn page_for_user(
        &self,
        user: &UserId,
        limit: u64,
        skip: u64,
    ) -> Result<HistoryPage, HistoryError> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE user_id = ?1",
                params![user],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM turns WHERE user_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt
                .query_map(params![user, to_sql_int(limit), to_sql_int(skip)], TurnRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(HistoryPage::new(
                collect_turns(rows)?,
                u64::try_from(total).unwrap_or(0),
                skip,
            ))
        })
        .await
    }

    async fn conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, HistoryError> {
        let user = user.as_str().to_string();
        let conversation = conversation.as_str().to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM turns WHERE user_id = ?1 AND conversation_id = ?2 \
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map(params![user, conversation], TurnRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collect_turns(rows)
        })
        .await
    }

    async fn recent_in_conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        n: usize,
    ) -> Result<Vec<Turn>, HistoryError> {
        let user = user.as_str().to_string();
        let conversation = conversation.as_str().to_string();
        let n = i64::try_from(n).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM turns WHERE user_id = ?1 AND conversation_id = ?2 \
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![user, conversation, n], TurnRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            collect_turns(rows)
        })
        .await
    }

    async fn get(&self, user: &UserId, id: TurnId) -> Result<Option<Turn>, HistoryError> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM turns WHERE id = ?1 AND user_id = ?2"),
                    params![id.to_string(), user],
                    TurnRow::read,
                )
                .optional()?;
            row.map(TurnRow::into_turn).transpose()
        })
        .await
    }

    async fn delete(&self, user: &UserId, id: TurnId) -> Result<(), HistoryError> {
        let user = user.as_str().to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM turns WHERE id = ?1 AND user_id = ?2",
                params![id.to_string(), user],
            )?;
            if deleted == 0 {
                return Err(HistoryError::NotFound(id));
            }
            Ok(())
        })
        .await
    }
}
