//! Turn records and identifiers

use chrono::{DateTime, Utc};
use nlq_policy::{ProposedOperation, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use ulid::Ulid;

/// Turn identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub Ulid);

impl TurnId {
    /// Generate new turn ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TurnId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim()).map(Self)
    }
}

/// Client-supplied conversation grouping key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Wrap an existing id
    #[inline]
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id is blank
    #[inline]
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the execution was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnOrigin {
    /// Confirmed plan
    #[default]
    Confirmed,
    /// Direct execution, no plan
    Direct,
}

impl TurnOrigin {
    /// Storage name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnOrigin::Confirmed => "confirmed",
            TurnOrigin::Direct => "direct",
        }
    }
}

/// Result of an execution attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TurnOutcome {
    /// Operation ran
    Success,
    /// Authorization or execution failed
    Failure {
        /// Single error message
        error: String,
    },
}

impl TurnOutcome {
    /// Whether the attempt succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, TurnOutcome::Success)
    }

    /// Error message, if failed
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            TurnOutcome::Success => None,
            TurnOutcome::Failure { error } => Some(error),
        }
    }
}

/// One persisted execution attempt
///
/// Immutable after creation except for deletion by its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Record id
    pub id: TurnId,
    /// Owner
    pub user_id: UserId,
    /// Conversation grouping, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    /// Text the user typed
    pub natural_query: String,
    /// Operation that was run (or refused)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<ProposedOperation>,
    /// Target collection
    pub collection: String,
    /// Success or failure
    pub outcome: TurnOutcome,
    /// Explanation shown to the user
    #[serde(default)]
    pub explanation: String,
    /// Full result count (before sampling)
    pub result_count: u64,
    /// Bounded result sample
    #[serde(default)]
    pub result_sample: Vec<Value>,
    /// Wall time of the execution
    pub execution_time_ms: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Trigger
    #[serde(default)]
    pub origin: TurnOrigin,
}

impl Turn {
    /// Whether the attempt succeeded
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Whether the turn belongs to a conversation
    #[must_use]
    pub fn in_conversation(&self, conversation: &ConversationId) -> bool {
        self.conversation_id.as_ref() == Some(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_id_roundtrips_through_display() {
        let id = TurnId::new();
        let parsed: TurnId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-ulid".parse::<TurnId>().is_err());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(TurnOutcome::Failure { error: "boom".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failure", "error": "boom"}));
    }

    #[test]
    fn blank_conversation_id() {
        assert!(ConversationId::from_string("  ").is_blank());
        assert!(!ConversationId::generate().is_blank());
    }
}
