//! Storage trait for turns

use crate::error::HistoryError;
use crate::turn::{ConversationId, Turn, TurnId};
use async_trait::async_trait;
use nlq_policy::UserId;
use serde::Serialize;

/// One page of a user's history, most recent first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Records on this page
    pub records: Vec<Turn>,
    /// Total records for the user
    pub total: u64,
    /// More records after this page
    pub has_more: bool,
}

impl HistoryPage {
    /// Build a page from a slice position
    #[must_use]
    pub fn new(records: Vec<Turn>, total: u64, skip: u64) -> Self {
        let has_more = skip + (records.len() as u64) < total;
        Self {
            records,
            total,
            has_more,
        }
    }
}

/// Append-only turn log
///
/// Ordering ties on `created_at` are broken by insertion order.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist a new turn
    async fn append(&self, turn: Turn) -> Result<TurnId, HistoryError>;

    /// User's turns, most recent first
    async fn page_for_user(
        &self,
        user: &UserId,
        limit: u64,
        skip: u64,
    ) -> Result<HistoryPage, HistoryError>;

    /// Every turn of a conversation owned by the user, oldest first
    async fn conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, HistoryError>;

    /// Last `n` turns of a conversation, most recent first
    async fn recent_in_conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        n: usize,
    ) -> Result<Vec<Turn>, HistoryError>;

    /// Single turn owned by the user
    async fn get(&self, user: &UserId, id: TurnId) -> Result<Option<Turn>, HistoryError>;

    /// Delete a turn owned by the user
    ///
    /// `HistoryError::NotFound` when missing or owned by someone else.
    async fn delete(&self, user: &UserId, id: TurnId) -> Result<(), HistoryError>;
}
