//! Service error taxonomy
//!
//! Every failure reaches the caller as a `ServiceError` with a stable
//! `kind()` string:
//! - input validation, before any external call
//! - translator unavailable / timeout / bad response (no turn written)
//! - security violation at execution (failed turn written)
//! - confirmation gate conflicts
//! - persistence and configuration

use nlq_history::{HistoryError, TurnId};
use nlq_policy::{PolicyError, PolicyViolation, UserId};
use nlq_translator::{ExecutorError, TranslatorError};

/// Main service error type
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Natural-language text or payload rejected
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller is not a known user
    #[error("unknown user: {0}")]
    UnknownUser(UserId),

    /// Translator could not be reached
    #[error("translator unavailable: {0}")]
    TranslatorUnavailable(String),

    /// Translator did not answer in time
    #[error("query too complex: translator did not answer within {secs}s")]
    TranslatorTimeout {
        /// Timeout that elapsed
        secs: u64,
    },

    /// Translator reported an error
    #[error("translator error: {0}")]
    TranslatorFailed(String),

    /// Translator reply could not be used
    #[error("translator returned an unusable plan: {0}")]
    TranslatorBadResponse(String),

    /// Operation refused by the live policy
    #[error("security policy violation: {violation}")]
    SecurityViolation {
        /// What was refused
        violation: PolicyViolation,
        /// Audit record of the refusal
        history_id: Option<TurnId>,
    },

    /// Nothing is awaiting confirmation in this conversation
    #[error("no pending plan for conversation '{0}'")]
    NoPendingPlan(String),

    /// Confirmation does not match the pending plan
    #[error("plan is no longer pending: {0}")]
    StalePlan(String),

    /// The pending plan is already executing
    #[error("plan for conversation '{0}' is already being executed")]
    AlreadyConfirming(String),

    /// Executor failed
    #[error("execution failed: {message}")]
    ExecutionFailed {
        /// Executor message
        message: String,
        /// Audit record of the failure
        history_id: Option<TurnId>,
    },

    /// Record missing
    #[error("not found: {0}")]
    NotFound(String),

    /// History backend failed
    #[error("storage error: {0}")]
    Storage(String),

    /// Policy backend failed
    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    /// Configuration invalid
    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    /// Stable machine-readable kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::UnknownUser(_) => "unknown_user",
            Self::TranslatorUnavailable(_) => "translator_unavailable",
            Self::TranslatorTimeout { .. } => "translator_timeout",
            Self::TranslatorFailed(_) => "translator_error",
            Self::TranslatorBadResponse(_) => "translator_bad_response",
            Self::SecurityViolation { .. } => "security_violation",
            Self::NoPendingPlan(_) => "no_pending_plan",
            Self::StalePlan(_) => "stale_plan",
            Self::AlreadyConfirming(_) => "already_confirming",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage_error",
            Self::Policy(_) => "policy_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TranslatorUnavailable(_)
                | Self::TranslatorTimeout { .. }
                | Self::TranslatorFailed(_)
                | Self::ExecutionFailed { .. }
                | Self::Storage(_)
        )
    }

    /// Turn written for this failure, if any
    #[must_use]
    pub fn history_id(&self) -> Option<TurnId> {
        match self {
            Self::SecurityViolation { history_id, .. } | Self::ExecutionFailed { history_id, .. } => {
                *history_id
            }
            _ => None,
        }
    }
}

impl From<TranslatorError> for ServiceError {
    fn from(err: TranslatorError) -> Self {
        match err {
            TranslatorError::ConnectionRefused(msg) => Self::TranslatorUnavailable(msg),
            TranslatorError::Timeout { secs } => Self::TranslatorTimeout { secs },
            TranslatorError::ServiceError { message, .. } => Self::TranslatorFailed(message),
            TranslatorError::BadResponse(msg) => Self::TranslatorBadResponse(msg),
        }
    }
}

impl From<HistoryError> for ServiceError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(id) => Self::NotFound(format!("history record {id}")),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<ExecutorError> for ServiceError {
    fn from(err: ExecutorError) -> Self {
        Self::ExecutionFailed {
            message: err.to_string(),
            history_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translator_errors_keep_their_class() {
        let err: ServiceError = TranslatorError::Timeout { secs: 300 }.into();
        assert_eq!(err.kind(), "translator_timeout");
        assert!(err.is_retryable());

        let err: ServiceError = TranslatorError::BadResponse("no json".into()).into();
        assert_eq!(err.kind(), "translator_bad_response");
        assert!(!err.is_retryable());
    }

    #[test]
    fn history_not_found_maps_to_not_found() {
        let id = TurnId::new();
        let err: ServiceError = HistoryError::NotFound(id).into();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn violation_is_not_retryable() {
        let err = ServiceError::SecurityViolation {
            violation: PolicyViolation::MissingCollection,
            history_id: None,
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().starts_with("security policy violation"));
    }
}
