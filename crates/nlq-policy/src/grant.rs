//! Role policies and collection grants
//!
//! A `RolePolicy` owns an ordered list of `CollectionGrant` entries. Several
//! grants can match one collection (an exact entry and a `*` entry, for
//! example). `merge_grants` folds the matches into a single
//! `EffectiveGrant`:
//! - operations and allowed fields come from the most specific match
//! - restricted fields are the union over every match
//!
//! Restricted fields always win over allowed fields, including `*`.

use crate::types::OperationKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Wildcard for collection, database and field scopes
pub const WILDCARD: &str = "*";

fn wildcard() -> String {
    WILDCARD.to_string()
}

fn wildcard_set() -> BTreeSet<String> {
    BTreeSet::from([WILDCARD.to_string()])
}

fn find_only() -> BTreeSet<OperationKind> {
    BTreeSet::from([OperationKind::Find])
}

/// One authorization rule for a collection scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionGrant {
    /// Collection name or `*`
    pub name: String,
    /// Database name or `*`
    #[serde(default = "wildcard")]
    pub database: String,
    /// Allowed operations
    #[serde(default = "find_only")]
    pub operations: BTreeSet<OperationKind>,
    /// Allowed fields, `*` for all
    #[serde(default = "wildcard_set")]
    pub allowed_fields: BTreeSet<String>,
    /// Denied fields, evaluated before `allowed_fields`
    #[serde(default)]
    pub restricted_fields: BTreeSet<String>,
}

impl CollectionGrant {
    /// Grant on a collection, `find` only, all fields
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: wildcard(),
            operations: find_only(),
            allowed_fields: wildcard_set(),
            restricted_fields: BTreeSet::new(),
        }
    }

    /// Grant on every collection
    #[inline]
    #[must_use]
    pub fn all_collections() -> Self {
        Self::new(WILDCARD)
    }

    /// Scope to a database
    #[inline]
    #[must_use]
    pub fn in_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Replace allowed operations
    #[must_use]
    pub fn with_operations(mut self, ops: impl IntoIterator<Item = OperationKind>) -> Self {
        self.operations = ops.into_iter().collect();
        self
    }

    /// Replace allowed fields
    #[must_use]
    pub fn with_allowed_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.allowed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Replace restricted fields
    #[must_use]
    pub fn with_restricted_fields<S: Into<String>>(
        mut self,
        fields: impl IntoIterator<Item = S>,
    ) -> Self {
        self.restricted_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Match tier for a target, lower is more specific
    ///
    /// 0: exact db + exact collection, 1: exact db + `*`,
    /// 2: `*` db + exact collection, 3: `*` db + `*`.
    #[must_use]
    pub fn match_tier(&self, database: Option<&str>, collection: &str) -> Option<u8> {
        let db_exact = database.is_some_and(|db| self.database == db);
        let db_wild = self.database == WILDCARD;
        let coll_exact = self.name == collection;
        let coll_wild = self.name == WILDCARD;

        match (db_exact, db_wild, coll_exact, coll_wild) {
            (true, _, true, _) => Some(0),
            (true, _, _, true) => Some(1),
            (_, true, true, _) => Some(2),
            (_, true, _, true) => Some(3),
            _ => None,
        }
    }
}

/// Named authorization document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicy {
    /// Unique name
    pub name: String,
    /// Free-form description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered grants
    #[serde(rename = "collections", alias = "grants", default)]
    pub grants: Vec<CollectionGrant>,
    /// Cap on explicit result limits
    #[serde(alias = "maxLimit", default = "default_max_result_limit")]
    pub max_result_limit: u64,
    /// Used for users without an assigned policy
    #[serde(default)]
    pub is_default: bool,
}

fn default_max_result_limit() -> u64 {
    crate::resolver::DEFAULT_FALLBACK_LIMIT
}

impl RolePolicy {
    /// Create policy with no grants
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            grants: Vec::new(),
            max_result_limit: default_max_result_limit(),
            is_default: false,
        }
    }

    /// Append a grant
    #[inline]
    #[must_use]
    pub fn with_grant(mut self, grant: CollectionGrant) -> Self {
        self.grants.push(grant);
        self
    }

    /// With result cap
    #[inline]
    #[must_use]
    pub fn with_max_result_limit(mut self, limit: u64) -> Self {
        self.max_result_limit = limit;
        self
    }

    /// Mark as default
    #[inline]
    #[must_use]
    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    /// Effective grant for a collection, `None` when nothing matches
    #[must_use]
    pub fn grant_for(&self, database: Option<&str>, collection: &str) -> Option<EffectiveGrant> {
        let mut matches: Vec<(u8, usize, &CollectionGrant)> = self
            .grants
            .iter()
            .enumerate()
            .filter_map(|(idx, g)| g.match_tier(database, collection).map(|t| (t, idx, g)))
            .collect();
        // Stable on declaration order within a tier
        matches.sort_by_key(|(tier, idx, _)| (*tier, *idx));
        merge_grants(matches.into_iter().map(|(_, _, g)| g))
    }

    /// Whether the collection is readable at all
    #[must_use]
    pub fn can_read(&self, database: Option<&str>, collection: &str) -> bool {
        self.grant_for(database, collection)
            .is_some_and(|g| g.operations.iter().any(OperationKind::is_read))
    }
}

/// Access decision for one field path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldAccess {
    /// Field may be referenced
    Allowed,
    /// Field (or an ancestor/descendant) is on the deny list
    Restricted,
    /// Allow list is explicit and does not contain the field
    NotAllowed,
}

/// Grants merged for one collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveGrant {
    /// Collection scope of the most specific match
    pub scope: String,
    /// Allowed operations
    pub operations: BTreeSet<OperationKind>,
    /// Allowed fields
    pub allowed_fields: BTreeSet<String>,
    /// Union of restricted fields
    pub restricted_fields: BTreeSet<String>,
    /// Restricted fields of joined collections, prefixed with the join path
    pub joined_restrictions: BTreeSet<String>,
}

impl EffectiveGrant {
    /// Whether the operation kind is allowed
    #[inline]
    #[must_use]
    pub fn permits(&self, op: OperationKind) -> bool {
        self.operations.contains(&op)
    }

    /// Decide access for a dotted field path
    ///
    /// A path is restricted when it equals a restricted field, lies under
    /// one, or contains one (projecting `address` exposes `address.zip`).
    #[must_use]
    pub fn field_access(&self, path: &str) -> FieldAccess {
        if self
            .restricted_fields
            .iter()
            .any(|r| paths_overlap(path, r))
        {
            return FieldAccess::Restricted;
        }
        if path == "_id" || self.allowed_fields.contains(WILDCARD) {
            return FieldAccess::Allowed;
        }
        if self
            .allowed_fields
            .iter()
            .any(|a| path == a || is_descendant(path, a))
        {
            FieldAccess::Allowed
        } else {
            FieldAccess::NotAllowed
        }
    }

    /// Whether any field is restricted, here or in a joined collection
    #[must_use]
    pub fn has_restrictions(&self) -> bool {
        !self.restricted_fields.is_empty() || !self.joined_restrictions.is_empty()
    }

    /// Remove restricted fields from a result document in place
    ///
    /// Arrays are walked at every level, so `buyer.email` also strips
    /// `email` from each document embedded in a `buyer` array.
    pub fn redact(&self, document: &mut Value) {
        for field in self.restricted_fields.iter().chain(&self.joined_restrictions) {
            remove_path(document, field);
        }
    }
}

/// Fold matching grants, most specific first, into one effective grant
///
/// Returns `None` for an empty iterator.
#[must_use]
pub fn merge_grants<'a>(grants: impl IntoIterator<Item = &'a CollectionGrant>) -> Option<EffectiveGrant> {
    let mut iter = grants.into_iter();
    let first = iter.next()?;

    let mut merged = EffectiveGrant {
        scope: first.name.clone(),
        operations: first.operations.clone(),
        allowed_fields: first.allowed_fields.clone(),
        restricted_fields: first.restricted_fields.clone(),
        joined_restrictions: BTreeSet::new(),
    };
    for grant in iter {
        merged
            .restricted_fields
            .extend(grant.restricted_fields.iter().cloned());
    }
    Some(merged)
}

pub(crate) fn is_descendant(path: &str, ancestor: &str) -> bool {
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'.'
}

fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || is_descendant(a, b) || is_descendant(b, a)
}

fn remove_path(value: &mut Value, path: &str) {
    match value {
        Value::Array(items) => {
            for item in items {
                remove_path(item, path);
            }
        }
        Value::Object(map) => match path.split_once('.') {
            None => {
                map.remove(path);
            }
            Some((head, rest)) => {
                if let Some(child) = map.get_mut(head) {
                    remove_path(child, rest);
                }
            }
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn analyst() -> RolePolicy {
        RolePolicy::new("Analyst")
            .with_grant(
                CollectionGrant::all_collections()
                    .with_operations([OperationKind::Find, OperationKind::Aggregate])
                    .with_restricted_fields(["email", "password"]),
            )
            .with_max_result_limit(50)
    }

    #[test]
    fn wildcard_grant_covers_any_collection() {
        let grant = analyst().grant_for(Some("shop"), "users").unwrap();
        assert_eq!(grant.scope, "*");
        assert!(grant.permits(OperationKind::Find));
        assert!(!grant.permits(OperationKind::Delete));
    }

    #[test]
    fn restricted_wins_over_wildcard_allow() {
        let grant = analyst().grant_for(None, "users").unwrap();
        assert_eq!(grant.field_access("email"), FieldAccess::Restricted);
        assert_eq!(grant.field_access("name"), FieldAccess::Allowed);
    }

    #[test]
    fn nested_paths_overlap_restrictions() {
        let grant = RolePolicy::new("p")
            .with_grant(CollectionGrant::new("users").with_restricted_fields(["address.zip"]))
            .grant_for(None, "users")
            .unwrap();

        assert_eq!(grant.field_access("address"), FieldAccess::Restricted);
        assert_eq!(grant.field_access("address.zip"), FieldAccess::Restricted);
        assert_eq!(grant.field_access("address.city"), FieldAccess::Allowed);
        assert_eq!(grant.field_access("addresses"), FieldAccess::Allowed);
    }

    #[test]
    fn explicit_allow_list() {
        let grant = RolePolicy::new("p")
            .with_grant(CollectionGrant::new("orders").with_allowed_fields(["total", "items"]))
            .grant_for(None, "orders")
            .unwrap();

        assert_eq!(grant.field_access("total"), FieldAccess::Allowed);
        assert_eq!(grant.field_access("items.qty"), FieldAccess::Allowed);
        assert_eq!(grant.field_access("_id"), FieldAccess::Allowed);
        assert_eq!(grant.field_access("customer"), FieldAccess::NotAllowed);
    }

    #[test]
    fn match_priority_prefers_exact_database_and_collection() {
        let policy = RolePolicy::new("p")
            .with_grant(CollectionGrant::all_collections())
            .with_grant(
                CollectionGrant::new("orders")
                    .in_database("shop")
                    .with_operations([OperationKind::Find, OperationKind::Update]),
            );

        let grant = policy.grant_for(Some("shop"), "orders").unwrap();
        assert!(grant.permits(OperationKind::Update));

        let grant = policy.grant_for(Some("other"), "orders").unwrap();
        assert!(!grant.permits(OperationKind::Update));
    }

    #[test]
    fn merge_unions_restrictions_across_matches() {
        let policy = RolePolicy::new("p")
            .with_grant(CollectionGrant::all_collections().with_restricted_fields(["ssn"]))
            .with_grant(CollectionGrant::new("users").with_restricted_fields(["email"]));

        let grant = policy.grant_for(None, "users").unwrap();
        assert_eq!(grant.scope, "users");
        assert!(grant.restricted_fields.contains("ssn"));
        assert!(grant.restricted_fields.contains("email"));
    }

    #[test]
    fn no_match_is_none() {
        let policy = RolePolicy::new("p").with_grant(CollectionGrant::new("orders"));
        assert!(policy.grant_for(None, "users").is_none());
    }

    #[test]
    fn redact_removes_top_level_and_nested() {
        let grant = RolePolicy::new("p")
            .with_grant(CollectionGrant::all_collections().with_restricted_fields(["email", "card.number"]))
            .grant_for(None, "users")
            .unwrap();

        let mut doc = json!({
            "name": "Ada",
            "email": "ada@example.com",
            "card": {"number": "4111", "brand": "visa"},
            "orders": [{"email": "nested stays"}]
        });
        grant.redact(&mut doc);

        assert_eq!(
            doc,
            json!({
                "name": "Ada",
                "card": {"brand": "visa"},
                "orders": [{"email": "nested stays"}]
            })
        );
    }

    #[test]
    fn redact_strips_joined_documents_in_arrays() {
        let mut grant = RolePolicy::new("p")
            .with_grant(CollectionGrant::all_collections())
            .grant_for(None, "orders")
            .unwrap();
        assert!(!grant.has_restrictions());
        grant.joined_restrictions.insert("buyer.email".to_string());
        assert!(grant.has_restrictions());

        let mut doc = json!({"_id": 1, "buyer": [{"email": "ada@x.io", "name": "Ada"}]});
        grant.redact(&mut doc);
        assert_eq!(doc, json!({"_id": 1, "buyer": [{"name": "Ada"}]}));
    }

    #[test]
    fn policy_deserializes_legacy_keys() {
        let policy: RolePolicy = serde_json::from_value(json!({
            "name": "Manager",
            "collections": [{"name": "*", "operations": ["find", "aggregate"]}],
            "maxLimit": 500
        }))
        .unwrap();

        assert_eq!(policy.max_result_limit, 500);
        assert_eq!(policy.grants.len(), 1);
        assert!(policy.grants[0].allowed_fields.contains("*"));
        assert!(!policy.is_default);
    }

    fn field_name() -> impl Strategy<Value = String> {
        prop::sample::select(vec!["email", "password", "name", "age", "address", "address.zip"])
            .prop_map(str::to_string)
    }

    proptest! {
        #[test]
        fn prop_restricted_field_never_allowed(
            restricted in prop::collection::btree_set(field_name(), 0..4),
            wildcard_extra in prop::collection::btree_set(field_name(), 0..4),
            probe in field_name(),
        ) {
            let mut allowed = wildcard_extra.clone();
            allowed.insert(WILDCARD.to_string());
            let policy = RolePolicy::new("p")
                .with_grant(CollectionGrant::all_collections().with_allowed_fields(allowed))
                .with_grant(CollectionGrant::new("users").with_restricted_fields(restricted.clone()));

            let grant = policy.grant_for(None, "users").unwrap();
            if restricted.contains(&probe) {
                prop_assert_eq!(grant.field_access(&probe), FieldAccess::Restricted);
            }
        }
    }
}
