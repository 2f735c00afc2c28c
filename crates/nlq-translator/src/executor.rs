//! Query execution client

use crate::client::HttpClientConfig;
use crate::error::{truncate_body, ExecutorError};
use crate::wire::{ExecuteReply, ExecuteRequest, PermissionsPayload};
use async_trait::async_trait;
use nlq_policy::{ProposedOperation, RolePolicy};
use serde_json::{Map, Value};

/// Rows and metadata from an execution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    /// Result documents
    pub results: Vec<Value>,
    /// Executor metadata
    pub metadata: Map<String, Value>,
}

/// Runs authorized operations against the database
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute an operation that already passed authorization
    ///
    /// `policy` is forwarded for executors that enforce it again.
    async fn execute(
        &self,
        database: Option<&str>,
        operation: &ProposedOperation,
        policy: Option<&RolePolicy>,
    ) -> Result<ExecutionOutput, ExecutorError>;
}

/// HTTP execution client
#[derive(Clone)]
pub struct HttpExecutor {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl HttpExecutor {
    /// Create client
    ///
    /// # Errors
    /// TLS backend initialization failure.
    pub fn new(config: HttpClientConfig) -> Result<Self, ExecutorError> {
        let client = config
            .build_client()
            .map_err(|e| ExecutorError::Unavailable(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl QueryExecutor for HttpExecutor {
    async fn execute(
        &self,
        database: Option<&str>,
        operation: &ProposedOperation,
        policy: Option<&RolePolicy>,
    ) -> Result<ExecutionOutput, ExecutorError> {
        let body = ExecuteRequest {
            mql: operation,
            database,
            permissions: policy.map(PermissionsPayload::from),
        };
        let timeout = self.config.timeout_secs;

        let response = self
            .client
            .post(self.config.endpoint("execute-mql"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutorError::from_reqwest(&e, timeout))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ExecutorError::from_reqwest(&e, timeout))?;
        if !status.is_success() {
            return Err(ExecutorError::Failed(format!(
                "status {}: {}",
                status.as_u16(),
                truncate_body(&text)
            )));
        }

        let reply: ExecuteReply =
            serde_json::from_str(&text).map_err(|e| ExecutorError::BadResponse(e.to_string()))?;
        if !reply.success {
            let message = reply
                .error
                .filter(|e| !e.trim().is_empty())
                .unwrap_or(reply.explanation);
            return Err(ExecutorError::Failed(message));
        }

        tracing::debug!(rows = reply.results.len(), "execution reply received");
        Ok(ExecutionOutput {
            results: reply.results,
            metadata: reply.metadata,
        })
    }
}
