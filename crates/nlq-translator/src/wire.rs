//! Wire shapes of the translator service

use nlq_history::HistoryMessage;
use nlq_policy::{CollectionGrant, RolePolicy};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Effective policy as the translator expects it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionsPayload {
    /// Grants
    pub collections: Vec<CollectionGrant>,
    /// Result cap
    pub max_limit: u64,
}

impl From<&RolePolicy> for PermissionsPayload {
    fn from(policy: &RolePolicy) -> Self {
        Self {
            collections: policy.grants.clone(),
            max_limit: policy.max_result_limit,
        }
    }
}

/// Caller's chart preference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationHint {
    /// Whether a chart is wanted
    #[serde(default)]
    pub enabled: bool,
    /// Preferred chart type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
}

/// `POST /plan` body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorRequest {
    /// Sanitized natural-language text
    pub query: String,
    /// Database hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Collection hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Chronological conversation history
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    /// Effective policy
    pub permissions: PermissionsPayload,
    /// Role name
    pub user_role: String,
    /// Effective policy name
    pub policy_name: String,
    /// Instruction override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_system_prompt: Option<String>,
    /// Chart preference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visualization_hint: Option<VisualizationHint>,
}

/// Translator reply, read leniently
///
/// The proposed operation may arrive as `mql_query`, `mql` or `operation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslatorReply {
    /// `false` means the translator reports an error
    #[serde(default = "default_true")]
    pub success: bool,
    /// `conversational`, `database` or `visualization`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Raw proposed operation
    #[serde(default, alias = "mql", alias = "operation", skip_serializing_if = "Option::is_none")]
    pub mql_query: Option<Value>,
    /// Collection the translator chose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Human-readable explanation
    #[serde(default)]
    pub explanation: String,
    /// Conversational answer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    /// Translator's own confirmation flag (advisory)
    #[serde(default)]
    pub needs_confirmation: bool,
    /// Chart type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_type: Option<String>,
    /// Chart title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// X axis key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_key: Option<String>,
    /// Y axis key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_key: Option<String>,
    /// Error message when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Provider/model metadata
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

fn default_true() -> bool {
    true
}

impl TranslatorReply {
    /// Text to show: explanation, else the conversational response
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        [Some(self.explanation.as_str()), self.response.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }

    /// Proposed operation, ignoring JSON `null`
    #[must_use]
    pub fn operation(&self) -> Option<&Value> {
        self.mql_query.as_ref().filter(|v| !v.is_null())
    }
}

/// `POST /execute-mql` body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ExecuteRequest<'a> {
    pub(crate) mql: &'a nlq_policy::ProposedOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) permissions: Option<PermissionsPayload>,
}

/// `POST /execute-mql` reply
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ExecuteReply {
    #[serde(default = "default_true")]
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) results: Vec<Value>,
    #[serde(default)]
    pub(crate) explanation: String,
    #[serde(default)]
    pub(crate) error: Option<String>,
    #[serde(default)]
    pub(crate) metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case() {
        let policy = RolePolicy::new("Analyst").with_grant(CollectionGrant::all_collections());
        let req = TranslatorRequest {
            query: "q".into(),
            database: Some("shop".into()),
            collection: None,
            history: vec![HistoryMessage::user("hi")],
            permissions: PermissionsPayload::from(&policy),
            user_role: "analyst".into(),
            policy_name: "Analyst".into(),
            custom_system_prompt: None,
            visualization_hint: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["userRole"], "analyst");
        assert_eq!(value["policyName"], "Analyst");
        assert_eq!(value["permissions"]["maxLimit"], 100);
        assert_eq!(value["history"][0]["role"], "user");
        assert!(value.get("collection").is_none());
    }

    #[test]
    fn reply_accepts_operation_aliases() {
        let reply: TranslatorReply = serde_json::from_value(json!({
            "type": "database",
            "mql": {"collection": "users"},
            "explanation": "Listing users"
        }))
        .unwrap();
        assert!(reply.success);
        assert_eq!(reply.operation(), Some(&json!({"collection": "users"})));
    }

    #[test]
    fn null_operation_is_none() {
        let reply: TranslatorReply =
            serde_json::from_value(json!({"mql_query": null, "response": "Hello!"})).unwrap();
        assert!(reply.operation().is_none());
        assert_eq!(reply.message(), Some("Hello!"));
    }
}
