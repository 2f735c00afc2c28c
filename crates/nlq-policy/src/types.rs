//! Identity and operation vocabulary shared by every policy check

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque user identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap an identifier
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user as seen by the authorization layer
///
/// The policy is held by name. Editing the referenced policy affects every
/// holder on their next resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity
    pub id: UserId,
    /// Role name, informational (sent to the translator)
    #[serde(default = "default_role")]
    pub role: String,
    /// Name of the assigned `RolePolicy`, if any
    #[serde(default)]
    pub policy: Option<String>,
}

fn default_role() -> String {
    "analyst".to_string()
}

impl User {
    /// Create user with role and no assigned policy
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            role: role.into(),
            policy: None,
        }
    }

    /// With assigned policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = Some(policy.into());
        self
    }
}

/// Database operation kinds a grant can allow
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Read documents
    #[default]
    Find,
    /// Aggregation pipeline
    Aggregate,
    /// Insert documents
    Insert,
    /// Update documents
    Update,
    /// Delete documents
    Delete,
}

impl OperationKind {
    /// All kinds, in declaration order
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Find,
        OperationKind::Aggregate,
        OperationKind::Insert,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Find => "find",
            OperationKind::Aggregate => "aggregate",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Whether the operation only reads
    #[inline]
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(self, OperationKind::Find | OperationKind::Aggregate)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "find" => Ok(OperationKind::Find),
            "aggregate" => Ok(OperationKind::Aggregate),
            "insert" => Ok(OperationKind::Insert),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => Err(format!("unknown operation: '{other}'")),
        }
    }
}
