//! Permission resolution
//!
//! Resolution order for a user:
//! 1. the policy assigned by name, when it exists and has grants
//! 2. the policy flagged default
//! 3. a built-in fallback: every collection, `find` only, capped results
//!
//! Store failures are returned to the caller and never degrade to the
//! fallback. The fallback may be broader than the user's real policy.

use crate::error::PolicyError;
use crate::grant::{CollectionGrant, RolePolicy};
use crate::types::{OperationKind, User, UserId};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Result cap of the built-in fallback policy
pub const DEFAULT_FALLBACK_LIMIT: u64 = 100;

const FALLBACK_POLICY_NAME: &str = "fallback";

/// Storage for users and policies
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Look up a user
    async fn get_user(&self, id: &UserId) -> Result<Option<User>, PolicyError>;

    /// Insert or replace a user
    async fn put_user(&self, user: User) -> Result<(), PolicyError>;

    /// Look up a policy by name
    async fn get_policy(&self, name: &str) -> Result<Option<RolePolicy>, PolicyError>;

    /// All policies, ordered by name
    async fn list_policies(&self) -> Result<Vec<RolePolicy>, PolicyError>;

    /// Insert or replace a policy
    async fn put_policy(&self, policy: RolePolicy) -> Result<(), PolicyError>;

    /// Remove a policy, returns whether it existed
    async fn delete_policy(&self, name: &str) -> Result<bool, PolicyError>;
}

/// Process-local policy store
#[derive(Default)]
pub struct InMemoryPolicyStore {
    policies: RwLock<BTreeMap<String, RolePolicy>>,
    users: DashMap<UserId, User>,
}

impl InMemoryPolicyStore {
    /// Create empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn get_user(&self, id: &UserId) -> Result<Option<User>, PolicyError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn put_user(&self, user: User) -> Result<(), PolicyError> {
        self.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn get_policy(&self, name: &str) -> Result<Option<RolePolicy>, PolicyError> {
        Ok(self.policies.read().get(name).cloned())
    }

    async fn list_policies(&self) -> Result<Vec<RolePolicy>, PolicyError> {
        Ok(self.policies.read().values().cloned().collect())
    }

    async fn put_policy(&self, policy: RolePolicy) -> Result<(), PolicyError> {
        self.policies.write().insert(policy.name.clone(), policy);
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> Result<bool, PolicyError> {
        Ok(self.policies.write().remove(name).is_some())
    }
}

/// Where a resolved policy came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySource {
    /// User's assigned policy
    Assigned,
    /// The default policy
    Default,
    /// Built-in fallback
    Fallback,
}

/// Effective policy for one user at one instant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    /// Policy to authorize against
    pub policy: RolePolicy,
    /// Origin
    pub source: PolicySource,
}

/// Resolves and administers role policies
pub struct PermissionResolver {
    store: Arc<dyn PolicyStore>,
    fallback_max_result_limit: u64,
    /// Serializes default-flag updates
    write_lock: Mutex<()>,
}

impl PermissionResolver {
    /// Create resolver over a store
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            fallback_max_result_limit: DEFAULT_FALLBACK_LIMIT,
            write_lock: Mutex::new(()),
        }
    }

    /// With fallback result cap
    #[inline]
    #[must_use]
    pub fn with_fallback_limit(mut self, limit: u64) -> Self {
        self.fallback_max_result_limit = limit;
        self
    }

    /// Underlying store
    #[must_use]
    pub fn store(&self) -> &Arc<dyn PolicyStore> {
        &self.store
    }

    /// Look up a user
    ///
    /// # Errors
    /// Store failure.
    pub async fn user(&self, id: &UserId) -> Result<Option<User>, PolicyError> {
        self.store.get_user(id).await
    }

    /// Built-in fallback policy
    #[must_use]
    pub fn fallback_policy(&self) -> RolePolicy {
        RolePolicy::new(FALLBACK_POLICY_NAME)
            .with_grant(CollectionGrant::all_collections().with_operations([OperationKind::Find]))
            .with_max_result_limit(self.fallback_max_result_limit)
    }

    /// Effective policy for a user
    ///
    /// # Errors
    /// Store failure. Never falls back on error.
    pub async fn resolve(&self, user: &User) -> Result<ResolvedPolicy, PolicyError> {
        if let Some(name) = user.policy.as_deref() {
            match self.store.get_policy(name).await? {
                Some(policy) if !policy.grants.is_empty() => {
                    return Ok(ResolvedPolicy {
                        policy,
                        source: PolicySource::Assigned,
                    });
                }
                Some(_) => {
                    tracing::warn!(user = %user.id, policy = name, "assigned policy has no grants");
                }
                None => {
                    tracing::warn!(user = %user.id, policy = name, "assigned policy not found");
                }
            }
        }

        let defaults: Vec<RolePolicy> = self
            .store
            .list_policies()
            .await?
            .into_iter()
            .filter(|p| p.is_default && !p.grants.is_empty())
            .collect();

        if defaults.len() > 1 {
            tracing::warn!(
                count = defaults.len(),
                chosen = %defaults[0].name,
                "multiple default policies"
            );
        }

        if let Some(policy) = defaults.into_iter().next() {
            return Ok(ResolvedPolicy {
                policy,
                source: PolicySource::Default,
            });
        }

        tracing::debug!(user = %user.id, "using fallback policy");
        Ok(ResolvedPolicy {
            policy: self.fallback_policy(),
            source: PolicySource::Fallback,
        })
    }

    /// Validate and store a policy
    ///
    /// A default policy clears the flag on every other policy.
    ///
    /// # Errors
    /// - `PolicyError::InvalidPolicy` on validation failure
    /// - store failure
    pub async fn upsert_policy(&self, policy: RolePolicy) -> Result<(), PolicyError> {
        validate_policy(&policy)?;
        let _guard = self.write_lock.lock().await;

        if policy.is_default {
            self.clear_defaults_except(&policy.name).await?;
        }
        tracing::info!(policy = %policy.name, default = policy.is_default, "policy stored");
        self.store.put_policy(policy).await
    }

    /// Make an existing policy the default
    ///
    /// # Errors
    /// - `PolicyError::PolicyNotFound` if it does not exist
    /// - store failure
    pub async fn set_default(&self, name: &str) -> Result<(), PolicyError> {
        let _guard = self.write_lock.lock().await;

        let mut policy = self
            .store
            .get_policy(name)
            .await?
            .ok_or_else(|| PolicyError::PolicyNotFound(name.to_string()))?;
        self.clear_defaults_except(name).await?;
        policy.is_default = true;
        self.store.put_policy(policy).await
    }

    /// Load policies then users
    ///
    /// When several seeded policies are default the last one keeps the flag.
    ///
    /// # Errors
    /// First validation or store failure.
    pub async fn seed(
        &self,
        policies: impl IntoIterator<Item = RolePolicy>,
        users: impl IntoIterator<Item = User>,
    ) -> Result<(), PolicyError> {
        for policy in policies {
            self.upsert_policy(policy).await?;
        }
        for user in users {
            self.store.put_user(user).await?;
        }
        Ok(())
    }

    async fn clear_defaults_except(&self, name: &str) -> Result<(), PolicyError> {
        for mut other in self.store.list_policies().await? {
            if other.is_default && other.name != name {
                other.is_default = false;
                self.store.put_policy(other).await?;
            }
        }
        Ok(())
    }
}

/// Structural checks on a policy document
///
/// # Errors
/// `PolicyError::InvalidPolicy` naming the first problem.
pub fn validate_policy(policy: &RolePolicy) -> Result<(), PolicyError> {
    if policy.name.trim().is_empty() {
        return Err(PolicyError::invalid(&policy.name, "name is empty"));
    }
    if policy.grants.is_empty() {
        return Err(PolicyError::invalid(&policy.name, "no collection grants"));
    }
    if policy.max_result_limit == 0 {
        return Err(PolicyError::invalid(&policy.name, "maxResultLimit must be positive"));
    }
    for grant in &policy.grants {
        if grant.name.trim().is_empty() {
            return Err(PolicyError::invalid(&policy.name, "grant with empty collection"));
        }
        if grant.operations.is_empty() {
            return Err(PolicyError::invalid(
                &policy.name,
                format!("grant '{}' allows no operations", grant.name),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store() -> Arc<InMemoryPolicyStore> {
        Arc::new(InMemoryPolicyStore::new())
    }

    fn policy(name: &str) -> RolePolicy {
        RolePolicy::new(name).with_grant(CollectionGrant::all_collections())
    }

    #[tokio::test]
    async fn assigned_policy_wins() {
        let resolver = PermissionResolver::new(store());
        resolver
            .seed([policy("Analyst"), policy("Viewer").as_default()], [])
            .await
            .unwrap();

        let user = User::new("u1", "analyst").with_policy("Analyst");
        let resolved = resolver.resolve(&user).await.unwrap();
        assert_eq!(resolved.source, PolicySource::Assigned);
        assert_eq!(resolved.policy.name, "Analyst");
    }

    #[tokio::test]
    async fn unassigned_user_gets_default() {
        let resolver = PermissionResolver::new(store());
        resolver.seed([policy("Viewer").as_default()], []).await.unwrap();

        let resolved = resolver.resolve(&User::new("u1", "analyst")).await.unwrap();
        assert_eq!(resolved.source, PolicySource::Default);
        assert_eq!(resolved.policy.name, "Viewer");
    }

    #[tokio::test]
    async fn missing_assignment_falls_through_to_default() {
        let resolver = PermissionResolver::new(store());
        resolver.seed([policy("Viewer").as_default()], []).await.unwrap();

        let user = User::new("u1", "analyst").with_policy("Deleted");
        let resolved = resolver.resolve(&user).await.unwrap();
        assert_eq!(resolved.source, PolicySource::Default);
    }

    #[tokio::test]
    async fn no_default_yields_restrictive_fallback() {
        let resolver = PermissionResolver::new(store()).with_fallback_limit(25);
        let resolved = resolver.resolve(&User::new("u1", "analyst")).await.unwrap();

        assert_eq!(resolved.source, PolicySource::Fallback);
        assert!(!resolved.policy.grants.is_empty());
        assert_eq!(resolved.policy.max_result_limit, 25);

        let grant = resolved.policy.grant_for(None, "anything").unwrap();
        assert!(grant.permits(OperationKind::Find));
        assert!(!grant.permits(OperationKind::Delete));
        assert!(!grant.permits(OperationKind::Aggregate));
    }

    #[tokio::test]
    async fn new_default_clears_previous() {
        let resolver = PermissionResolver::new(store());
        resolver.upsert_policy(policy("A").as_default()).await.unwrap();
        resolver.upsert_policy(policy("B").as_default()).await.unwrap();

        let defaults: Vec<_> = resolver
            .store()
            .list_policies()
            .await
            .unwrap()
            .into_iter()
            .filter(|p| p.is_default)
            .map(|p| p.name)
            .collect();
        assert_eq!(defaults, vec!["B".to_string()]);

        resolver.set_default("A").await.unwrap();
        let resolved = resolver.resolve(&User::new("u", "r")).await.unwrap();
        assert_eq!(resolved.policy.name, "A");
    }

    #[tokio::test]
    async fn set_default_unknown_policy() {
        let resolver = PermissionResolver::new(store());
        assert!(matches!(
            resolver.set_default("nope").await,
            Err(PolicyError::PolicyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn edits_apply_on_next_resolution() {
        let resolver = PermissionResolver::new(store());
        resolver.upsert_policy(policy("Analyst")).await.unwrap();
        let user = User::new("u1", "analyst").with_policy("Analyst");

        let before = resolver.resolve(&user).await.unwrap();
        assert!(before.policy.grants[0].restricted_fields.is_empty());

        resolver
            .upsert_policy(
                RolePolicy::new("Analyst")
                    .with_grant(CollectionGrant::all_collections().with_restricted_fields(["email"])),
            )
            .await
            .unwrap();
        let after = resolver.resolve(&user).await.unwrap();
        assert!(after.policy.grants[0].restricted_fields.contains("email"));
    }

    #[test]
    fn validation_rejects_empty_grants() {
        assert!(validate_policy(&RolePolicy::new("Empty")).is_err());
        assert!(validate_policy(&policy("Ok")).is_ok());
    }

    struct BrokenStore;

    #[async_trait]
    impl PolicyStore for BrokenStore {
        async fn get_user(&self, _: &UserId) -> Result<Option<User>, PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
        async fn put_user(&self, _: User) -> Result<(), PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
        async fn get_policy(&self, _: &str) -> Result<Option<RolePolicy>, PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
        async fn list_policies(&self) -> Result<Vec<RolePolicy>, PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
        async fn put_policy(&self, _: RolePolicy) -> Result<(), PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
        async fn delete_policy(&self, _: &str) -> Result<bool, PolicyError> {
            Err(PolicyError::Store("down".into()))
        }
    }

    #[tokio::test]
    async fn store_failure_does_not_fall_back() {
        let resolver = PermissionResolver::new(Arc::new(BrokenStore));
        let result = resolver.resolve(&User::new("u1", "analyst")).await;
        assert!(matches!(result, Err(PolicyError::Store(_))));
    }

    proptest! {
        #[test]
        fn prop_at_most_one_default(flags in prop::collection::vec(any::<bool>(), 1..8)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let resolver = PermissionResolver::new(store());
                for (i, is_default) in flags.iter().enumerate() {
                    let mut p = policy(&format!("p{i}"));
                    p.is_default = *is_default;
                    resolver.upsert_policy(p).await.unwrap();
                }
                let defaults = resolver
                    .store()
                    .list_policies()
                    .await
                    .unwrap()
                    .into_iter()
                    .filter(|p| p.is_default)
                    .count();
                let expected = usize::from(flags.iter().any(|f| *f));
                assert_eq!(defaults, expected);
            });
        }
    }
}
