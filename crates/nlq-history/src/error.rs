//! History errors

use crate::turn::TurnId;

/// History store errors
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Generic backend failure
    #[error("history storage error: {0}")]
    Storage(String),

    /// SQLite failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Column payload could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Turn missing or owned by someone else
    #[error("history record not found: {0}")]
    NotFound(TurnId),

    /// Blocking task panicked or was cancelled
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl HistoryError {
    /// Whether retrying may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Join(_))
            || matches!(
                self,
                Self::Sqlite(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::DatabaseBusy
                        || e.code == rusqlite::ErrorCode::DatabaseLocked
            )
    }
}
