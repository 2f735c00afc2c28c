//! Turn recording with bounded result samples

use crate::error::HistoryError;
use crate::store::HistoryStore;
use crate::turn::{ConversationId, Turn, TurnId, TurnOrigin, TurnOutcome};
use chrono::Utc;
use nlq_policy::{ProposedOperation, UserId};
use serde_json::Value;
use std::sync::Arc;

/// Records kept per turn unless configured otherwise
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

/// Everything known about an attempt before it is persisted
#[derive(Debug, Clone)]
pub struct TurnDraft {
    /// Owner
    pub user_id: UserId,
    /// Conversation, if any
    pub conversation_id: Option<ConversationId>,
    /// Text the user typed
    pub natural_query: String,
    /// Operation attempted
    pub operation: Option<ProposedOperation>,
    /// Outcome
    pub outcome: TurnOutcome,
    /// Explanation shown to the user
    pub explanation: String,
    /// Full result set, sampled on record
    pub results: Vec<Value>,
    /// Wall time
    pub execution_time_ms: u64,
    /// Trigger
    pub origin: TurnOrigin,
}

impl TurnDraft {
    /// Draft for a failed attempt
    #[must_use]
    pub fn failure(
        user_id: UserId,
        natural_query: impl Into<String>,
        operation: Option<ProposedOperation>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            conversation_id: None,
            natural_query: natural_query.into(),
            operation,
            outcome: TurnOutcome::Failure {
                error: error.into(),
            },
            explanation: String::new(),
            results: Vec::new(),
            execution_time_ms: 0,
            origin: TurnOrigin::Confirmed,
        }
    }

    /// Draft for a successful attempt
    #[must_use]
    pub fn success(
        user_id: UserId,
        natural_query: impl Into<String>,
        operation: ProposedOperation,
        results: Vec<Value>,
    ) -> Self {
        Self {
            user_id,
            conversation_id: None,
            natural_query: natural_query.into(),
            operation: Some(operation),
            outcome: TurnOutcome::Success,
            explanation: String::new(),
            results,
            execution_time_ms: 0,
            origin: TurnOrigin::Confirmed,
        }
    }

    /// In conversation
    #[inline]
    #[must_use]
    pub fn in_conversation(mut self, conversation: Option<ConversationId>) -> Self {
        self.conversation_id = conversation;
        self
    }

    /// With explanation
    #[inline]
    #[must_use]
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = explanation.into();
        self
    }

    /// With timing
    #[inline]
    #[must_use]
    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = ms;
        self
    }

    /// With origin
    #[inline]
    #[must_use]
    pub fn with_origin(mut self, origin: TurnOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Writes turns, bounding the stored result sample
#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    sample_limit: usize,
}

impl HistoryRecorder {
    /// Create recorder
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
        }
    }

    /// With sample cap
    #[inline]
    #[must_use]
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Persist a draft
    ///
    /// # Errors
    /// Store failure.
    pub async fn record(&self, draft: TurnDraft) -> Result<TurnId, HistoryError> {
        let turn = self.build(draft);
        let success = turn.is_success();
        let id = self.store.append(turn).await?;
        tracing::info!(turn = %id, success, "turn recorded");
        Ok(id)
    }

    /// Persist a draft, logging instead of failing
    pub async fn record_best_effort(&self, draft: TurnDraft) -> Option<TurnId> {
        match self.record(draft).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::error!(error = %e, "failed to record turn");
                None
            }
        }
    }

    fn build(&self, draft: TurnDraft) -> Turn {
        let result_count = draft.results.len() as u64;
        let mut result_sample = draft.results;
        result_sample.truncate(self.sample_limit);

        let collection = draft
            .operation
            .as_ref()
            .map(|op| op.collection.clone())
            .unwrap_or_default();

        Turn {
            id: TurnId::new(),
            user_id: draft.user_id,
            conversation_id: draft.conversation_id.filter(|c| !c.is_blank()),
            natural_query: draft.natural_query,
            operation: draft.operation,
            collection,
            outcome: draft.outcome,
            explanation: draft.explanation,
            result_count,
            result_sample,
            execution_time_ms: draft.execution_time_ms,
            created_at: Utc::now(),
            origin: draft.origin,
        }
    }
}
