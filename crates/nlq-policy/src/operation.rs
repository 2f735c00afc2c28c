//! Proposed operation payload
//!
//! The translator proposes operations as loosely-shaped JSON. This module
//! reads that JSON into a closed `ProposedOperation` and repairs the common
//! shape mistakes (top-level `$`-prefixed keys, mixed projections, missing
//! collection) before anything is shown to the user or authorized.

use crate::error::NormalizeError;
use crate::types::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key aliases, applied only when the canonical key is absent
const KEY_ALIASES: [(&str, &str); 7] = [
    ("$sort", "sort"),
    ("$limit", "limit"),
    ("$projection", "projection"),
    ("$project", "projection"),
    ("$filter", "query"),
    ("$query", "query"),
    ("$collection", "collection"),
];

/// A database operation awaiting authorization
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProposedOperation {
    /// Target collection
    #[serde(default)]
    pub collection: String,
    /// Operation kind
    #[serde(default)]
    pub operation: OperationKind,
    /// Selection filter
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub query: Map<String, Value>,
    /// Projection (find)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projection: Option<Map<String, Value>>,
    /// Sort specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<Map<String, Value>>,
    /// Explicit result limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    /// Aggregation stages
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline: Vec<Value>,
    /// Insert payload: one document or an array of documents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
    /// Update specification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<Map<String, Value>>,
}

impl ProposedOperation {
    /// Create a `find` on a collection
    #[inline]
    #[must_use]
    pub fn find(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation: OperationKind::Find,
            ..Self::default()
        }
    }

    /// Create an `aggregate` on a collection
    #[inline]
    #[must_use]
    pub fn aggregate(collection: impl Into<String>, pipeline: Vec<Value>) -> Self {
        Self {
            collection: collection.into(),
            operation: OperationKind::Aggregate,
            pipeline,
            ..Self::default()
        }
    }

    /// With operation kind
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: OperationKind) -> Self {
        self.operation = kind;
        self
    }

    /// With filter
    #[inline]
    #[must_use]
    pub fn with_query(mut self, query: Map<String, Value>) -> Self {
        self.query = query;
        self
    }

    /// With projection
    #[inline]
    #[must_use]
    pub fn with_projection(mut self, projection: Map<String, Value>) -> Self {
        self.projection = Some(projection);
        self
    }

    /// With limit
    #[inline]
    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// With insert payload
    #[inline]
    #[must_use]
    pub fn with_document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    /// With update specification
    #[inline]
    #[must_use]
    pub fn with_update(mut self, update: Map<String, Value>) -> Self {
        self.update = Some(update);
        self
    }

    /// Read a raw translator payload
    ///
    /// `collection_hint` fills in a missing collection.
    ///
    /// # Errors
    /// - `NormalizeError::NotAnObject` if the payload is not a JSON object
    /// - `NormalizeError::Malformed` if fields have the wrong shape
    pub fn from_raw(raw: Value, collection_hint: Option<&str>) -> Result<Self, NormalizeError> {
        let mut map = match raw {
            Value::Object(map) => map,
            other => return Err(NormalizeError::NotAnObject(json_type_name(&other).to_string())),
        };

        for (alias, canonical) in KEY_ALIASES {
            if !map.contains_key(canonical) {
                if let Some(value) = map.remove(alias) {
                    map.insert(canonical.to_string(), value);
                }
            }
        }

        // Some translators send `"operation": "Find"`
        if let Some(Value::String(op)) = map.get_mut("operation") {
            *op = op.trim().to_ascii_lowercase();
        }

        let mut op: ProposedOperation = serde_json::from_value(Value::Object(map))
            .map_err(|e| NormalizeError::Malformed(e.to_string()))?;

        if op.collection.trim().is_empty() {
            if let Some(hint) = collection_hint.filter(|h| !h.trim().is_empty()) {
                op.collection = hint.trim().to_string();
            }
        }

        op.fix_mixed_projection();
        Ok(op)
    }

    /// Drop exclusions from a projection that also has inclusions
    ///
    /// `_id` is the only field allowed to mix.
    pub fn fix_mixed_projection(&mut self) {
        let Some(projection) = self.projection.as_mut() else {
            return;
        };

        let has_inclusion = projection
            .iter()
            .any(|(k, v)| k != "_id" && projection_value_includes(v));
        let has_exclusion = projection
            .iter()
            .any(|(k, v)| k != "_id" && !projection_value_includes(v));

        if has_inclusion && has_exclusion {
            tracing::debug!("dropping exclusions from mixed projection");
            projection.retain(|k, v| k == "_id" || projection_value_includes(v));
        }
    }

    /// Whether the projection (if any) is inclusion-style
    #[must_use]
    pub fn is_inclusion_projection(&self) -> bool {
        self.projection.as_ref().is_some_and(|p| {
            p.iter()
                .any(|(k, v)| k != "_id" && projection_value_includes(v))
        })
    }
}

/// `1`, `true`, or a computed expression includes a field
pub(crate) fn projection_value_includes(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
