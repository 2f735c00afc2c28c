//! Translator client

use crate::client::HttpClientConfig;
use crate::error::{truncate_body, TranslatorError};
use crate::extract::parse_reply;
use crate::wire::{TranslatorReply, TranslatorRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Translator liveness and identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatorHealth {
    /// Reported status
    #[serde(default)]
    pub status: String,
    /// Language model provider
    #[serde(default)]
    pub llm_provider: String,
    /// Language model name
    #[serde(default)]
    pub llm_model: String,
    /// Database the translator targets
    #[serde(default)]
    pub database: String,
}

/// Natural language to plan reply
#[async_trait]
pub trait Translator: Send + Sync {
    /// Request a plan
    async fn translate(&self, request: &TranslatorRequest) -> Result<TranslatorReply, TranslatorError>;

    /// Liveness and provider metadata
    async fn health(&self) -> Result<TranslatorHealth, TranslatorError>;
}

/// HTTP translator client
#[derive(Clone)]
pub struct HttpTranslator {
    config: HttpClientConfig,
    client: reqwest::Client,
}

impl HttpTranslator {
    /// Create client
    ///
    /// # Errors
    /// TLS backend initialization failure.
    pub fn new(config: HttpClientConfig) -> Result<Self, TranslatorError> {
        let client = config
            .build_client()
            .map_err(|e| TranslatorError::ConnectionRefused(e.to_string()))?;
        Ok(Self { config, client })
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn transport(&self, err: &reqwest::Error) -> TranslatorError {
        TranslatorError::from_reqwest(err, self.config.timeout_secs)
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, request: &TranslatorRequest) -> Result<TranslatorReply, TranslatorError> {
        let url = self.config.endpoint("plan");
        tracing::debug!(%url, history = request.history.len(), "requesting plan");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport(&e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport(&e))?;

        if !status.is_success() {
            return Err(TranslatorError::ServiceError {
                status: Some(status.as_u16()),
                message: truncate_body(&body),
            });
        }

        let reply = parse_reply(&body).map_err(TranslatorError::BadResponse)?;
        if !reply.success {
            let message = reply
                .error
                .clone()
                .or_else(|| reply.message().map(str::to_string))
                .unwrap_or_else(|| "translator reported failure".to_string());
            return Err(TranslatorError::ServiceError {
                status: None,
                message,
            });
        }
        Ok(reply)
    }

    async fn health(&self) -> Result<TranslatorHealth, TranslatorError> {
        let response = self
            .client
            .get(self.config.endpoint("health"))
            .send()
            .await
            .map_err(|e| self.transport(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslatorError::ServiceError {
                status: Some(status.as_u16()),
                message: truncate_body(&body),
            });
        }
        response
            .json::<TranslatorHealth>()
            .await
            .map_err(|e| TranslatorError::BadResponse(e.to_string()))
    }
}
