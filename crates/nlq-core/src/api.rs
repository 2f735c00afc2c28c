//! Request and response shapes of the gateway operations

use crate::gate::{PlanId, SessionNote};
use crate::planner::{PlanKind, VisualizationSpec};
use chrono::{DateTime, Utc};
use nlq_history::{ConversationId, Turn, TurnId};
use nlq_policy::{PolicySource, ProposedOperation};
use nlq_translator::{TranslatorHealth, VisualizationHint};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `plan` input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRequest {
    /// Natural-language text
    pub query: String,
    /// Conversation to continue; a new one is started when absent
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Database hint
    #[serde(default)]
    pub database: Option<String>,
    /// Collection hint
    #[serde(default)]
    pub collection: Option<String>,
    /// Instruction override forwarded to the translator
    #[serde(default)]
    pub custom_system_prompt: Option<String>,
    /// Chart preference
    #[serde(default)]
    pub visualization_hint: Option<VisualizationHint>,
}

impl PlanRequest {
    /// Request for a query text
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// In conversation
    #[inline]
    #[must_use]
    pub fn in_conversation(mut self, conversation: ConversationId) -> Self {
        self.conversation_id = Some(conversation);
        self
    }

    /// With collection hint
    #[inline]
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }
}

/// `plan` output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanResponse {
    /// Conversation the plan belongs to
    pub conversation_id: ConversationId,
    /// Pending plan id, absent for conversational plans
    pub plan_id: Option<PlanId>,
    /// Type tag
    #[serde(rename = "type")]
    pub kind: PlanKind,
    /// Operation awaiting confirmation
    pub proposed_operation: Option<ProposedOperation>,
    /// Explanation
    pub explanation: String,
    /// Whether confirmation is required
    pub needs_confirmation: bool,
    /// Chart metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization: Option<VisualizationSpec>,
    /// Informational plan-time authorization finding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_warning: Option<String>,
    /// Name of the policy the plan was made under
    pub policy_name: String,
    /// Where that policy came from
    pub policy_source: PolicySource,
    /// Translator metadata
    pub metadata: Map<String, Value>,
}

/// `confirm` input
///
/// The plan is identified by `planId`, or by echoing `proposedOperation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    /// Conversation holding the pending plan
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Pending plan id
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// Operation as shown to the user
    #[serde(default)]
    pub proposed_operation: Option<Value>,
    /// Natural-language text, overrides the one stored with the plan
    #[serde(default)]
    pub natural_query: Option<String>,
}

/// `cancel` input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    /// Conversation holding the pending plan
    pub conversation_id: ConversationId,
}

/// `cancel` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// Conversation
    pub conversation_id: ConversationId,
    /// Note appended to the conversation
    pub note: SessionNote,
}

/// `execute_direct` input
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRequest {
    /// Raw operation payload
    pub operation: Value,
    /// Text to record with the turn
    #[serde(default)]
    pub natural_query: Option<String>,
    /// Conversation to attribute the turn to
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    /// Database
    #[serde(default)]
    pub database: Option<String>,
}

/// Output of a confirmed or direct execution
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    /// Result documents, restricted fields removed
    pub results: Vec<Value>,
    /// Number of results
    pub result_count: u64,
    /// Explanation
    pub explanation: String,
    /// Wall time of the execution
    pub execution_time_ms: u64,
    /// Persisted turn, absent if recording failed
    pub history_id: Option<TurnId>,
    /// Conversation
    pub conversation_id: Option<ConversationId>,
}

/// `history` query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Page size
    #[serde(default)]
    pub limit: Option<u64>,
    /// Records to skip
    #[serde(default)]
    pub skip: Option<u64>,
}

/// One entry of a conversation timeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConversationEntry {
    /// Persisted execution attempt
    Turn(Turn),
    /// Session note (not persisted)
    Note(SessionNote),
}

impl ConversationEntry {
    /// Timestamp used for ordering
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            ConversationEntry::Turn(t) => t.created_at,
            ConversationEntry::Note(n) => n.created_at,
        }
    }
}

/// `conversation` output
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    /// Conversation
    pub conversation_id: ConversationId,
    /// Turns and notes, oldest first
    pub entries: Vec<ConversationEntry>,
}

/// `health` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// `healthy` or `degraded`
    pub status: String,
    /// Translator identity, when reachable
    pub translator: Option<TranslatorHealth>,
    /// Why the translator is unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translator_error: Option<String>,
    /// Default database
    pub database: Option<String>,
}
