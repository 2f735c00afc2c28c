//! Error types for the policy layer
//!
//! - `PolicyError`: resolver and store failures
//! - `PolicyViolation`: an operation the effective policy does not permit
//! - `NormalizeError`: a proposed operation payload that cannot be read

use crate::authorizer::FieldLocation;
use crate::types::OperationKind;

/// Resolver / store errors
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// Policy document failed validation
    #[error("invalid policy '{name}': {reason}")]
    InvalidPolicy {
        /// Policy name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Named policy does not exist
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// Backing store failed
    #[error("policy store error: {0}")]
    Store(String),
}

impl PolicyError {
    /// Create invalid policy error
    pub fn invalid(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Authorization failures. Always blocking at execution time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// No grant covers the target collection
    #[error("access to collection '{collection}' in database '{database}' is not allowed")]
    CollectionNotCovered {
        /// Target collection
        collection: String,
        /// Target database, `*` when unspecified
        database: String,
    },

    /// Operation kind not in the matching grant
    #[error("operation '{operation}' is not allowed on collection '{collection}'. Allowed: {}", .allowed.join(", "))]
    OperationNotAllowed {
        /// Requested operation
        operation: OperationKind,
        /// Target collection
        collection: String,
        /// Operations the grant allows
        allowed: Vec<String>,
    },

    /// Explicit limit above the policy cap
    #[error("requested limit {requested} exceeds the maximum allowed limit of {max}")]
    LimitExceeded {
        /// Limit in the operation
        requested: u64,
        /// Policy cap
        max: u64,
    },

    /// Field on the deny list
    #[error("accessing restricted field '{field}' in {location} is prohibited")]
    RestrictedField {
        /// Offending path
        field: String,
        /// Where it was referenced
        location: FieldLocation,
    },

    /// Field outside an explicit allow list
    #[error("field '{field}' in {location} is not in the allowed field list")]
    FieldNotAllowed {
        /// Offending path
        field: String,
        /// Where it was referenced
        location: FieldLocation,
    },

    /// Server-side code execution or destructive operator
    #[error("operator '{0}' is not allowed")]
    UnsafeOperator(String),

    /// `$lookup` / `$unionWith` target outside the policy
    #[error("pipeline reads from collection '{0}' which is not readable under this policy")]
    ForeignCollectionNotCovered(String),

    /// Payload missing its target collection
    #[error("operation does not name a collection")]
    MissingCollection,

    /// Delete or update without a selection filter
    #[error("{0} operations must have a filter")]
    UnfilteredWrite(OperationKind),

    /// `$$ROOT` / `$$CURRENT` used while some field is restricted
    #[error("pipeline exposes whole documents while fields are restricted")]
    WholeDocument,
}

/// Proposed operation payload errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Payload is not a JSON object
    #[error("operation payload must be an object, got {0}")]
    NotAnObject(String),

    /// Payload shape does not match the operation model
    #[error("malformed operation payload: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_name_the_subject() {
        let v = PolicyViolation::RestrictedField {
            field: "email".to_string(),
            location: FieldLocation::Projection,
        };
        assert_eq!(
            v.to_string(),
            "accessing restricted field 'email' in projection is prohibited"
        );

        let v = PolicyViolation::OperationNotAllowed {
            operation: OperationKind::Delete,
            collection: "users".to_string(),
            allowed: vec!["find".to_string(), "aggregate".to_string()],
        };
        assert!(v.to_string().contains("Allowed: find, aggregate"));

        let v = PolicyViolation::UnfilteredWrite(OperationKind::Delete);
        assert_eq!(v.to_string(), "delete operations must have a filter");
    }

    #[test]
    fn invalid_policy_display() {
        let err = PolicyError::invalid("Analyst", "no grants");
        assert!(err.to_string().contains("invalid policy 'Analyst'"));
    }
}
