//! Plan requester
//!
//! Sends one planning request to the translator and turns its reply into a
//! `Plan`. Confirmation rules are applied here, not trusted from the reply:
//! - `conversational` never needs confirmation and carries no operation
//! - `database` and `visualization` always need confirmation
//! - a `database`/`visualization` reply without an operation is treated as
//!   conversational
//!
//! Failures never touch gate state and never write history.

use crate::error::ServiceError;
use nlq_policy::ProposedOperation;
use nlq_translator::{Translator, TranslatorReply, TranslatorRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Plan type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    /// Answer only, nothing to run
    Conversational,
    /// Query to run
    Database,
    /// Query to run and chart
    Visualization,
}

impl PlanKind {
    fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "conversational" => Some(Self::Conversational),
            "database" => Some(Self::Database),
            "visualization" => Some(Self::Visualization),
            _ => None,
        }
    }
}

/// Chart metadata for visualization plans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationSpec {
    /// Chart type
    pub chart_type: String,
    /// Title
    pub title: String,
    /// X axis key
    pub x_key: String,
    /// Y axis key
    pub y_key: String,
}

impl VisualizationSpec {
    fn from_reply(reply: &TranslatorReply) -> Self {
        let pick = |v: &Option<String>, default: &str| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            chart_type: pick(&reply.chart_type, "bar"),
            title: pick(&reply.title, "Data Visualization"),
            x_key: pick(&reply.x_key, "label"),
            y_key: pick(&reply.y_key, "value"),
        }
    }
}

/// Normalized translator output
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Type tag
    pub kind: PlanKind,
    /// Operation to confirm, absent for conversational plans
    pub operation: Option<ProposedOperation>,
    /// Explanation shown to the user
    pub explanation: String,
    /// Whether the user must confirm before anything runs
    pub needs_confirmation: bool,
    /// Chart metadata
    pub visualization: Option<VisualizationSpec>,
    /// Provider/model metadata
    pub metadata: Map<String, Value>,
}

/// Calls the translator with a hard deadline
#[derive(Clone)]
pub struct PlanRequester {
    translator: Arc<dyn Translator>,
    timeout: Duration,
}

impl PlanRequester {
    /// Create requester
    #[must_use]
    pub fn new(translator: Arc<dyn Translator>, timeout: Duration) -> Self {
        Self {
            translator,
            timeout,
        }
    }

    /// Request and normalize a plan
    ///
    /// # Errors
    /// Translator unavailable, timeout, reported error or unusable reply.
    pub async fn request(&self, request: &TranslatorRequest) -> Result<Plan, ServiceError> {
        let started = std::time::Instant::now();
        let reply = tokio::time::timeout(self.timeout, self.translator.translate(request))
            .await
            .map_err(|_| ServiceError::TranslatorTimeout {
                secs: self.timeout.as_secs(),
            })??;

        let plan = normalize(reply, request.collection.as_deref())?;
        tracing::info!(
            kind = ?plan.kind,
            needs_confirmation = plan.needs_confirmation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "plan received"
        );
        Ok(plan)
    }
}

/// Apply plan rules to a translator reply
///
/// # Errors
/// `ServiceError::TranslatorBadResponse` for an unknown type, an operation
/// that cannot be read, or a reply with neither operation nor message.
pub fn normalize(reply: TranslatorReply, collection_hint: Option<&str>) -> Result<Plan, ServiceError> {
    let tagged = match reply.kind.as_deref() {
        Some(tag) => Some(PlanKind::parse(tag).ok_or_else(|| {
            ServiceError::TranslatorBadResponse(format!("unknown plan type '{tag}'"))
        })?),
        None => None,
    };
    let message = reply.message().map(str::to_string);

    let raw_op = match tagged {
        Some(PlanKind::Conversational) => None,
        _ => reply.operation().cloned(),
    };

    let Some(raw_op) = raw_op else {
        let explanation = message.ok_or_else(|| {
            ServiceError::TranslatorBadResponse("reply has neither an operation nor a message".to_string())
        })?;
        return Ok(Plan {
            kind: PlanKind::Conversational,
            operation: None,
            explanation,
            needs_confirmation: false,
            visualization: None,
            metadata: reply.metadata,
        });
    };

    let hint = reply.collection.as_deref().or(collection_hint);
    let operation = ProposedOperation::from_raw(raw_op, hint)
        .map_err(|e| ServiceError::TranslatorBadResponse(e.to_string()))?;
    if operation.collection.trim().is_empty() {
        return Err(ServiceError::TranslatorBadResponse(
            "proposed operation names no collection".to_string(),
        ));
    }

    let kind = tagged.unwrap_or(PlanKind::Database);
    let visualization = (kind == PlanKind::Visualization).then(|| VisualizationSpec::from_reply(&reply));
    let explanation = match (&visualization, message) {
        (_, Some(m)) => m,
        (Some(v), None) => format!("I have prepared a {} chart for your request.", v.chart_type),
        (None, None) => format!("Proposed {} on '{}'.", operation.operation, operation.collection),
    };

    Ok(Plan {
        kind,
        operation: Some(operation),
        explanation,
        needs_confirmation: true,
        visualization,
        metadata: reply.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn reply(value: Value) -> TranslatorReply {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn conversational_never_needs_confirmation() {
        let plan = normalize(
            reply(json!({
                "type": "conversational",
                "mql": {"collection": "users"},
                "needs_confirmation": true,
                "response": "Hi there"
            })),
            None,
        )
        .unwrap();
        assert_eq!(plan.kind, PlanKind::Conversational);
        assert!(!plan.needs_confirmation);
        assert!(plan.operation.is_none());
        assert_eq!(plan.explanation, "Hi there");
    }

    #[test]
    fn database_always_needs_confirmation() {
        let plan = normalize(
            reply(json!({
                "type": "database",
                "mql_query": {"operation": "find", "$limit": 5},
                "needs_confirmation": false,
                "explanation": "Five users"
            })),
            Some("users"),
        )
        .unwrap();
        assert!(plan.needs_confirmation);
        let op = plan.operation.unwrap();
        assert_eq!(op.collection, "users");
        assert_eq!(op.limit, Some(5));
    }

    #[test]
    fn database_without_operation_becomes_conversational() {
        let plan = normalize(
            reply(json!({"type": "database", "mql": null, "explanation": "I need more detail"})),
            None,
        )
        .unwrap();
        assert_eq!(plan.kind, PlanKind::Conversational);
        assert!(!plan.needs_confirmation);
    }

    #[test]
    fn visualization_defaults() {
        let plan = normalize(
            reply(json!({"type": "visualization", "mql": {"collection": "sales", "operation": "aggregate"}})),
            None,
        )
        .unwrap();
        assert_eq!(
            plan.visualization,
            Some(VisualizationSpec {
                chart_type: "bar".into(),
                title: "Data Visualization".into(),
                x_key: "label".into(),
                y_key: "value".into(),
            })
        );
        assert_eq!(plan.explanation, "I have prepared a bar chart for your request.");
    }

    #[test]
    fn unknown_type_is_bad_response() {
        let err = normalize(reply(json!({"type": "sql", "explanation": "x"})), None).unwrap_err();
        assert_eq!(err.kind(), "translator_bad_response");
    }

    #[test]
    fn empty_reply_is_bad_response() {
        let err = normalize(reply(json!({})), None).unwrap_err();
        assert_eq!(err.kind(), "translator_bad_response");
    }

    #[test]
    fn operation_without_collection_is_bad_response() {
        let err = normalize(reply(json!({"type": "database", "mql": {"operation": "find"}})), None)
            .unwrap_err();
        assert_eq!(err.kind(), "translator_bad_response");
    }
}
