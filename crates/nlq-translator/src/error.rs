//! Boundary errors
//!
//! `reqwest` failures are classified the same way for both services:
//! timeouts are distinct from refused connections, and a non-2xx status or
//! a `success: false` body is a service-reported error carrying its message.

/// Translator call failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranslatorError {
    /// Could not reach the translator
    #[error("translator unavailable: {0}")]
    ConnectionRefused(String),

    /// No reply within the configured timeout
    #[error("translator timed out after {secs}s")]
    Timeout {
        /// Timeout that elapsed
        secs: u64,
    },

    /// Translator answered with an error
    #[error("translator error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    ServiceError {
        /// HTTP status, when the error came from the transport
        status: Option<u16>,
        /// Reported message
        message: String,
    },

    /// Reply could not be interpreted
    #[error("translator returned an unusable reply: {0}")]
    BadResponse(String),
}

impl TranslatorError {
    /// Classify a transport error
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else if err.is_connect() || err.is_request() {
            Self::ConnectionRefused(err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::BadResponse(err.to_string())
        } else {
            Self::ServiceError {
                status: err.status().map(|s| s.as_u16()),
                message: err.to_string(),
            }
        }
    }

    /// Whether retrying may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionRefused(_) | Self::Timeout { .. })
    }
}

/// Query execution failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// Could not reach the executor
    #[error("query executor unavailable: {0}")]
    Unavailable(String),

    /// No reply within the configured timeout
    #[error("query execution timed out after {secs}s")]
    Timeout {
        /// Timeout that elapsed
        secs: u64,
    },

    /// The database rejected or failed the operation
    #[error("query execution failed: {0}")]
    Failed(String),

    /// Reply could not be interpreted
    #[error("query executor returned an unusable reply: {0}")]
    BadResponse(String),
}

impl ExecutorError {
    /// Classify a transport error
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else if err.is_connect() || err.is_request() {
            Self::Unavailable(err.to_string())
        } else if err.is_decode() || err.is_body() {
            Self::BadResponse(err.to_string())
        } else {
            Self::Failed(err.to_string())
        }
    }
}

/// Cap a response body for inclusion in an error message
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 500;
    let trimmed = body.trim();
    if trimmed.len() <= MAX {
        return trimmed.to_string();
    }
    let mut end = MAX;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_error_display_includes_status() {
        let err = TranslatorError::ServiceError {
            status: Some(502),
            message: "upstream".into(),
        };
        assert_eq!(err.to_string(), "translator error (502): upstream");

        let err = TranslatorError::ServiceError {
            status: None,
            message: "model refused".into(),
        };
        assert_eq!(err.to_string(), "translator error: model refused");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let body = "é".repeat(400);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 503);
    }
}
