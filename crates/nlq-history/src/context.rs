//! Conversation context for the translator
//!
//! The last `max_turns` turns are fetched most-recent-first, then reversed
//! so the output is always chronological. Each turn becomes a user message
//! and an assistant message.

use crate::error::HistoryError;
use crate::store::HistoryStore;
use crate::turn::{ConversationId, Turn, TurnOutcome};
use nlq_policy::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Turns included when not configured
pub const DEFAULT_CONTEXT_TURNS: usize = 5;

/// Speaker of a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// The person asking
    User,
    /// The gateway's reply
    Assistant,
}

/// Role-tagged message sent to the translator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    /// Speaker
    pub role: MessageRole,
    /// Text
    pub content: String,
}

impl HistoryMessage {
    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Builds bounded chronological history
#[derive(Clone)]
pub struct ContextAssembler {
    store: Arc<dyn HistoryStore>,
    max_turns: usize,
}

impl ContextAssembler {
    /// Create assembler
    #[must_use]
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self {
            store,
            max_turns: DEFAULT_CONTEXT_TURNS,
        }
    }

    /// With turn window
    #[inline]
    #[must_use]
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Messages for a conversation, oldest first
    ///
    /// A missing or blank conversation id yields no messages.
    ///
    /// # Errors
    /// Store failure.
    pub async fn assemble(
        &self,
        user: &UserId,
        conversation: Option<&ConversationId>,
    ) -> Result<Vec<HistoryMessage>, HistoryError> {
        let Some(conversation) = conversation.filter(|c| !c.is_blank()) else {
            return Ok(Vec::new());
        };
        if self.max_turns == 0 {
            return Ok(Vec::new());
        }

        let mut turns = self
            .store
            .recent_in_conversation(user, conversation, self.max_turns)
            .await?;
        turns.reverse();

        Ok(turns.iter().flat_map(render_turn).collect())
    }
}

fn render_turn(turn: &Turn) -> [HistoryMessage; 2] {
    let reply = match &turn.outcome {
        TurnOutcome::Failure { error } => format!("Error: {error}"),
        TurnOutcome::Success if turn.explanation.trim().is_empty() => {
            format!("Found {} results.", turn.result_count)
        }
        TurnOutcome::Success => turn.explanation.clone(),
    };
    [
        HistoryMessage::user(turn.natural_query.clone()),
        HistoryMessage::assistant(reply),
    ]
}
