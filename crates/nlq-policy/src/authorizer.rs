//! Execution-time authorization
//!
//! `authorize` is called with the policy resolved at the moment of
//! execution, never with the plan-time snapshot. Checks run in order and
//! the first failure wins:
//! 1. the operation names a collection
//! 2. no unsafe operator appears anywhere in the payload
//! 3. a grant covers the collection
//! 4. the grant allows the operation kind
//! 5. deletes and updates carry a filter
//! 6. explicit limits stay under the policy cap
//! 7. no referenced field is restricted
//! 8. every referenced field is allowed
//! 9. joined collections are readable and pass the same field checks;
//!    their restricted fields are added to the redaction set under the
//!    join path
//! 10. `$$ROOT` is only used when nothing is restricted

use crate::error::PolicyViolation;
use crate::fields::FieldRefs;
use crate::grant::{is_descendant, EffectiveGrant, FieldAccess, RolePolicy};
use crate::operation::ProposedOperation;
use crate::types::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Operators rejected wherever they appear
pub const UNSAFE_OPERATORS: [&str; 6] = [
    "$where",
    "$eval",
    "$function",
    "$accumulator",
    "$drop",
    "$dropDatabase",
];

/// Part of an operation a field reference came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLocation {
    /// Selection filter
    Filter,
    /// Projection
    Projection,
    /// Sort specification
    Sort,
    /// Aggregation pipeline
    Pipeline,
    /// Insert payload
    Document,
    /// Update specification
    Update,
}

impl std::fmt::Display for FieldLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FieldLocation::Filter => "filter",
            FieldLocation::Projection => "projection",
            FieldLocation::Sort => "sort",
            FieldLocation::Pipeline => "pipeline",
            FieldLocation::Document => "document",
            FieldLocation::Update => "update",
        };
        f.write_str(s)
    }
}

/// Authorize an operation against a policy
///
/// Returns the effective grant on success so the caller can redact results
/// with the same restriction set.
///
/// # Errors
/// The first `PolicyViolation` found.
pub fn authorize(
    policy: &RolePolicy,
    database: Option<&str>,
    op: &ProposedOperation,
) -> Result<EffectiveGrant, PolicyViolation> {
    let collection = op.collection.trim();
    if collection.is_empty() {
        return Err(PolicyViolation::MissingCollection);
    }

    check_unsafe_operators(op)?;

    let grant = policy
        .grant_for(database, collection)
        .ok_or_else(|| PolicyViolation::CollectionNotCovered {
            collection: collection.to_string(),
            database: database.unwrap_or("*").to_string(),
        })?;

    if !grant.permits(op.operation) {
        return Err(PolicyViolation::OperationNotAllowed {
            operation: op.operation,
            collection: collection.to_string(),
            allowed: grant.operations.iter().map(ToString::to_string).collect(),
        });
    }

    if matches!(op.operation, OperationKind::Delete | OperationKind::Update) && op.query.is_empty() {
        return Err(PolicyViolation::UnfilteredWrite(op.operation));
    }

    check_limits(op, policy.max_result_limit)?;

    let refs = FieldRefs::collect(op);
    let mut grant = grant;
    let mut joined = BTreeSet::new();
    check_scope(policy, database, &grant, &refs, &mut joined)?;
    grant.joined_restrictions = joined;

    tracing::debug!(
        collection,
        operation = %op.operation,
        scope = %grant.scope,
        fields = refs.paths.len(),
        "operation authorized"
    );
    Ok(grant)
}

/// Check the references made against one document scope, then the joins
/// it pulls in
///
/// `joined` collects the restricted fields of joined documents, relative
/// to this scope.
fn check_scope(
    policy: &RolePolicy,
    database: Option<&str>,
    grant: &EffectiveGrant,
    refs: &FieldRefs,
    joined: &mut BTreeSet<String>,
) -> Result<(), PolicyViolation> {
    // Every restriction is checked before any allow-list miss is reported
    for (path, location) in &refs.paths {
        if grant.field_access(path) == FieldAccess::Restricted {
            return Err(PolicyViolation::RestrictedField {
                field: path.clone(),
                location: *location,
            });
        }
    }
    for (path, location) in &refs.paths {
        if grant.field_access(path) == FieldAccess::NotAllowed {
            return Err(PolicyViolation::FieldNotAllowed {
                field: path.clone(),
                location: *location,
            });
        }
    }

    let mut local = BTreeSet::new();
    for join in &refs.joins {
        let foreign = policy
            .grant_for(database, &join.collection)
            .filter(|g| g.operations.iter().any(OperationKind::is_read))
            .ok_or_else(|| PolicyViolation::ForeignCollectionNotCovered(join.collection.clone()))?;

        let mut inner = BTreeSet::new();
        check_scope(policy, database, &foreign, &join.refs, &mut inner)?;
        for field in foreign.restricted_fields.iter().chain(&inner) {
            local.insert(match &join.path {
                Some(at) => format!("{at}.{field}"),
                None => field.clone(),
            });
        }
    }

    for (path, location) in &refs.paths {
        if local.iter().any(|r| path == r || is_descendant(path, r)) {
            return Err(PolicyViolation::RestrictedField {
                field: path.clone(),
                location: *location,
            });
        }
    }
    // Copying a subtree under a new name would escape redaction
    for path in &refs.expressions {
        if let Some(restricted) = local.iter().find(|r| is_descendant(r, path)) {
            return Err(PolicyViolation::RestrictedField {
                field: restricted.clone(),
                location: FieldLocation::Pipeline,
            });
        }
    }

    if refs.whole_document && (!grant.restricted_fields.is_empty() || !local.is_empty()) {
        return Err(PolicyViolation::WholeDocument);
    }

    joined.extend(local);
    Ok(())
}

fn check_limits(op: &ProposedOperation, max: u64) -> Result<(), PolicyViolation> {
    if let Some(requested) = op.limit {
        if requested > max {
            return Err(PolicyViolation::LimitExceeded { requested, max });
        }
    }
    for stage in &op.pipeline {
        if let Some(requested) = stage.get("$limit").and_then(Value::as_u64) {
            if requested > max {
                return Err(PolicyViolation::LimitExceeded { requested, max });
            }
        }
    }
    Ok(())
}

fn check_unsafe_operators(op: &ProposedOperation) -> Result<(), PolicyViolation> {
    let query = Value::Object(op.query.clone());
    let mut parts: Vec<&Value> = vec![&query];
    parts.extend(op.pipeline.iter());
    parts.extend(op.document.iter());

    let projection = op.projection.clone().map(Value::Object);
    let update = op.update.clone().map(Value::Object);
    parts.extend(projection.iter());
    parts.extend(update.iter());

    for part in parts {
        if let Some(found) = find_unsafe(part) {
            return Err(PolicyViolation::UnsafeOperator(found.to_string()));
        }
    }
    Ok(())
}

fn find_unsafe(value: &Value) -> Option<&str> {
    match value {
        Value::Object(map) => map.iter().find_map(|(k, v)| {
            if UNSAFE_OPERATORS.contains(&k.as_str()) {
                Some(k.as_str())
            } else {
                find_unsafe(v)
            }
        }),
        Value::Array(items) => items.iter().find_map(find_unsafe),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::CollectionGrant;
    use serde_json::{json, Map};

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn analyst() -> RolePolicy {
        RolePolicy::new("Analyst")
            .with_grant(
                CollectionGrant::all_collections()
                    .with_operations([OperationKind::Find, OperationKind::Aggregate])
                    .with_restricted_fields(["email", "password"]),
            )
            .with_max_result_limit(100)
    }

    #[test]
    fn plain_find_is_authorized() {
        let op = ProposedOperation::find("users").with_query(obj(json!({"age": {"$gt": 30}})));
        let grant = authorize(&analyst(), Some("shop"), &op).unwrap();
        assert!(grant.restricted_fields.contains("email"));
    }

    #[test]
    fn restricted_projection_is_rejected() {
        let op = ProposedOperation::find("users").with_projection(obj(json!({"email": 1})));
        let err = authorize(&analyst(), None, &op).unwrap_err();
        assert_eq!(
            err,
            PolicyViolation::RestrictedField {
                field: "email".to_string(),
                location: FieldLocation::Projection
            }
        );
    }

    #[test]
    fn restricted_filter_is_rejected() {
        let op = ProposedOperation::find("users").with_query(obj(json!({"password": "x"})));
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::RestrictedField { location: FieldLocation::Filter, .. })
        ));
    }

    #[test]
    fn operation_outside_grant_is_rejected() {
        let op = ProposedOperation::find("users").with_kind(OperationKind::Delete);
        let err = authorize(&analyst(), None, &op).unwrap_err();
        assert!(err.to_string().contains("Allowed: find, aggregate"));
    }

    #[test]
    fn uncovered_collection_is_rejected() {
        let policy = RolePolicy::new("p").with_grant(CollectionGrant::new("orders"));
        let op = ProposedOperation::find("users");
        assert!(matches!(
            authorize(&policy, Some("shop"), &op),
            Err(PolicyViolation::CollectionNotCovered { .. })
        ));
    }

    #[test]
    fn limit_above_cap_is_rejected() {
        let op = ProposedOperation::find("users").with_limit(500);
        assert_eq!(
            authorize(&analyst(), None, &op).unwrap_err(),
            PolicyViolation::LimitExceeded { requested: 500, max: 100 }
        );

        let op = ProposedOperation::aggregate("users", vec![json!({"$limit": 1000})]);
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::LimitExceeded { .. })
        ));
    }

    #[test]
    fn unsafe_operator_anywhere_is_rejected() {
        let op = ProposedOperation::find("users")
            .with_query(obj(json!({"$or": [{"$where": "this.a > 1"}]})));
        assert_eq!(
            authorize(&analyst(), None, &op).unwrap_err(),
            PolicyViolation::UnsafeOperator("$where".to_string())
        );
    }

    #[test]
    fn foreign_collection_must_be_readable() {
        let policy = RolePolicy::new("p").with_grant(
            CollectionGrant::new("orders").with_operations([OperationKind::Aggregate]),
        );
        let op = ProposedOperation::aggregate(
            "orders",
            vec![json!({"$lookup": {"from": "users", "localField": "uid", "foreignField": "_id", "as": "u"}})],
        );
        assert_eq!(
            authorize(&policy, None, &op).unwrap_err(),
            PolicyViolation::ForeignCollectionNotCovered("users".to_string())
        );
    }

    #[test]
    fn pipeline_reference_to_restricted_field_is_rejected() {
        let op = ProposedOperation::aggregate(
            "users",
            vec![json!({"$group": {"_id": "$email", "n": {"$sum": 1}}})],
        );
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::RestrictedField { location: FieldLocation::Pipeline, .. })
        ));
    }

    #[test]
    fn lookup_redacts_foreign_restrictions_under_join_path() {
        let op = ProposedOperation::aggregate(
            "orders",
            vec![json!({"$lookup": {"from": "users", "localField": "uid", "foreignField": "_id", "as": "buyer"}})],
        );
        let grant = authorize(&analyst(), None, &op).unwrap();
        assert!(grant.joined_restrictions.contains("buyer.email"));

        let mut row = json!({"_id": 1, "buyer": [{"email": "ada@x.io", "name": "Ada"}]});
        grant.redact(&mut row);
        assert_eq!(row, json!({"_id": 1, "buyer": [{"name": "Ada"}]}));
    }

    #[test]
    fn joined_restricted_fields_cannot_be_read_or_moved() {
        let lookup = json!({"$lookup": {"from": "users", "localField": "uid", "foreignField": "_id", "as": "buyer"}});

        let op = ProposedOperation::aggregate(
            "orders",
            vec![lookup.clone(), json!({"$project": {"contact": "$buyer.email"}})],
        );
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::RestrictedField { ref field, .. }) if field == "buyer.email"
        ));

        let op = ProposedOperation::aggregate(
            "orders",
            vec![lookup.clone(), json!({"$project": {"who": "$buyer"}})],
        );
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::RestrictedField { ref field, .. }) if field == "buyer.email"
        ));

        let op = ProposedOperation::aggregate(
            "orders",
            vec![lookup, json!({"$unwind": "$buyer"}), json!({"$project": {"buyer.name": 1}})],
        );
        assert!(authorize(&analyst(), None, &op).is_ok());
    }

    #[test]
    fn lookup_sub_pipeline_is_checked_against_foreign_grant() {
        let op = ProposedOperation::aggregate(
            "orders",
            vec![json!({"$lookup": {
                "from": "users",
                "pipeline": [{"$project": {"contact": "$email"}}],
                "as": "buyer"
            }})],
        );
        assert!(matches!(
            authorize(&analyst(), None, &op),
            Err(PolicyViolation::RestrictedField { ref field, .. }) if field == "email"
        ));
    }

    #[test]
    fn union_redacts_foreign_restrictions_at_top_level() {
        let policy = RolePolicy::new("p")
            .with_grant(CollectionGrant::new("orders").with_operations([OperationKind::Aggregate]))
            .with_grant(CollectionGrant::new("users").with_restricted_fields(["email"]));
        let op = ProposedOperation::aggregate("orders", vec![json!({"$unionWith": "users"})]);

        let grant = authorize(&policy, None, &op).unwrap();
        assert!(grant.restricted_fields.is_empty());
        assert!(grant.joined_restrictions.contains("email"));
    }

    #[test]
    fn whole_document_is_rejected_while_fields_are_restricted() {
        let op = ProposedOperation::aggregate(
            "users",
            vec![json!({"$group": {"_id": null, "all": {"$push": "$$ROOT"}}})],
        );
        assert_eq!(
            authorize(&analyst(), None, &op).unwrap_err(),
            PolicyViolation::WholeDocument
        );

        let open = RolePolicy::new("open")
            .with_grant(CollectionGrant::all_collections().with_operations([OperationKind::Aggregate]));
        assert!(authorize(&open, None, &op).is_ok());
    }

    #[test]
    fn delete_and_update_need_a_filter() {
        let policy = RolePolicy::new("writer").with_grant(CollectionGrant::all_collections().with_operations([
            OperationKind::Find,
            OperationKind::Update,
            OperationKind::Delete,
        ]));

        let op = ProposedOperation::find("users").with_kind(OperationKind::Delete);
        assert_eq!(
            authorize(&policy, None, &op).unwrap_err(),
            PolicyViolation::UnfilteredWrite(OperationKind::Delete)
        );

        let op = ProposedOperation::find("users")
            .with_kind(OperationKind::Update)
            .with_update(obj(json!({"$set": {"status": "x"}})));
        assert_eq!(
            authorize(&policy, None, &op).unwrap_err(),
            PolicyViolation::UnfilteredWrite(OperationKind::Update)
        );

        let op = ProposedOperation::find("users")
            .with_kind(OperationKind::Delete)
            .with_query(obj(json!({"_id": 1})));
        assert!(authorize(&policy, None, &op).is_ok());
    }

    #[test]
    fn missing_collection_is_rejected() {
        let op = ProposedOperation::default();
        assert_eq!(
            authorize(&analyst(), None, &op).unwrap_err(),
            PolicyViolation::MissingCollection
        );
    }

    #[test]
    fn restriction_reported_before_allow_list() {
        let policy = RolePolicy::new("p").with_grant(
            CollectionGrant::new("users")
                .with_allowed_fields(["name"])
                .with_restricted_fields(["email"]),
        );
        let op = ProposedOperation::find("users")
            .with_query(obj(json!({"age": 3})))
            .with_projection(obj(json!({"email": 1})));
        assert!(matches!(
            authorize(&policy, None, &op),
            Err(PolicyViolation::RestrictedField { .. })
        ));
    }
}
