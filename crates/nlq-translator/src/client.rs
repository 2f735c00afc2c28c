//! Shared HTTP client settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Endpoint and timeouts for a remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    /// Base URL, without trailing slash
    pub base_url: String,
    /// Whole-request timeout. Planning can take minutes.
    pub timeout_secs: u64,
    /// TCP connect timeout
    pub connect_timeout_secs: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 300,
            connect_timeout_secs: 10,
        }
    }
}

impl HttpClientConfig {
    /// Config for a base URL with default timeouts
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// With request timeout
    #[inline]
    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Join a path onto the base URL
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub(crate) fn build_client(&self) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_cleanly() {
        let cfg = HttpClientConfig::new("http://nlp:8000/");
        assert_eq!(cfg.endpoint("/plan"), "http://nlp:8000/plan");
        assert_eq!(cfg.endpoint("execute-mql"), "http://nlp:8000/execute-mql");
    }
}
