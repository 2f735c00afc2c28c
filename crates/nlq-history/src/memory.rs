//! In-memory history store

use crate::error::HistoryError;
use crate::store::{HistoryPage, HistoryStore};
use crate::turn::{ConversationId, Turn, TurnId};
use async_trait::async_trait;
use nlq_policy::UserId;
use parking_lot::RwLock;

/// Vec-backed store, insertion ordered
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    turns: RwLock<Vec<Turn>>,
}

impl InMemoryHistoryStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored turns across all users
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.read().len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.read().is_empty()
    }

    /// User's turns, oldest first
    fn owned_by(&self, user: &UserId) -> Vec<Turn> {
        let mut turns: Vec<Turn> = self
            .turns
            .read()
            .iter()
            .filter(|t| &t.user_id == user)
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order
        turns.sort_by_key(|t| t.created_at);
        turns
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, turn: Turn) -> Result<TurnId, HistoryError> {
        let id = turn.id;
        self.turns.write().push(turn);
        Ok(id)
    }

    async fn page_for_user(
        &self,
        user: &UserId,
        limit: u64,
        skip: u64,
    ) -> Result<HistoryPage, HistoryError> {
        let mut turns = self.owned_by(user);
        turns.reverse();
        let total = turns.len() as u64;
        let records: Vec<Turn> = turns
            .into_iter()
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect();
        Ok(HistoryPage::new(records, total, skip))
    }

    async fn conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Vec<Turn>, HistoryError> {
        Ok(self
            .owned_by(user)
            .into_iter()
            .filter(|t| t.in_conversation(conversation))
            .collect())
    }

    async fn recent_in_conversation(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        n: usize,
    ) -> Result<Vec<Turn>, HistoryError> {
        let mut turns = self.conversation(user, conversation).await?;
        turns.reverse();
        turns.truncate(n);
        Ok(turns)
    }

    async fn get(&self, user: &UserId, id: TurnId) -> Result<Option<Turn>, HistoryError> {
        Ok(self
            .turns
            .read()
            .iter()
            .find(|t| t.id == id && &t.user_id == user)
            .cloned())
    }

    async fn delete(&self, user: &UserId, id: TurnId) -> Result<(), HistoryError> {
        let mut turns = self.turns.write();
        let pos = turns
            .iter()
            .position(|t| t.id == id && &t.user_id == user)
            .ok_or(HistoryError::NotFound(id))?;
        turns.remove(pos);
        Ok(())
    }
}
