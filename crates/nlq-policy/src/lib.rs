//! NLQ Policy - role-scoped data access
//!
//! Owns the authorization model of the gateway:
//! - `RolePolicy` documents made of ordered `CollectionGrant` entries
//! - The permission resolver (assigned policy, then default, then fallback)
//! - Restriction-wins grant merging as a pure function
//! - Execution-time authorization of a proposed operation
//!
//! # Example
//!
//! ```rust,ignore
//! use nlq_policy::{authorize, PermissionResolver, InMemoryPolicyStore};
//!
//! # async fn example(user: nlq_policy::User, op: nlq_policy::ProposedOperation) -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = PermissionResolver::new(std::sync::Arc::new(InMemoryPolicyStore::new()));
//! let resolved = resolver.resolve(&user).await?;
//! let grant = authorize(&resolved.policy, Some("shop"), &op)?;
//! println!("restricted: {:?}", grant.restricted_fields);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod authorizer;
pub mod error;
pub mod fields;
pub mod grant;
pub mod operation;
pub mod resolver;
pub mod types;

pub use authorizer::{authorize, FieldLocation};
pub use error::{NormalizeError, PolicyError, PolicyViolation};
pub use fields::{FieldRefs, Join};
pub use grant::{merge_grants, CollectionGrant, EffectiveGrant, FieldAccess, RolePolicy, WILDCARD};
pub use operation::ProposedOperation;
pub use resolver::{
    validate_policy, InMemoryPolicyStore, PermissionResolver, PolicySource, PolicyStore,
    ResolvedPolicy, DEFAULT_FALLBACK_LIMIT,
};
pub use types::{OperationKind, User, UserId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
