//! Service configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! A few deployment settings can be overridden from the environment:
//! - `NLQ_TRANSLATOR_URL`
//! - `NLQ_EXECUTOR_URL`
//! - `NLQ_DATABASE`
//! - `NLQ_HISTORY_PATH`

use crate::error::ServiceError;
use nlq_policy::{RolePolicy, User, DEFAULT_FALLBACK_LIMIT};
use nlq_translator::HttpClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest accepted `history_sample_limit`
pub const MAX_HISTORY_SAMPLE_LIMIT: usize = 1000;

/// History persistence settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// SQLite file; in-memory when unset
    pub path: Option<PathBuf>,
}

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Longest accepted natural-language query, in characters
    pub max_query_length: usize,
    /// Turns of conversation context sent to the translator
    pub context_turns: usize,
    /// Result documents stored per turn
    pub history_sample_limit: usize,
    /// History page size when the caller gives none
    pub default_page_size: u64,
    /// Largest history page
    pub max_page_size: u64,
    /// Database queries run against when the request names none
    pub database: Option<String>,
    /// Result cap of the built-in fallback policy
    pub fallback_max_result_limit: u64,
    /// Translator endpoint
    pub translator: HttpClientConfig,
    /// Query executor endpoint
    pub executor: HttpClientConfig,
    /// History storage
    pub history: HistoryConfig,
    /// Policies loaded at startup
    pub policies: Vec<RolePolicy>,
    /// Users loaded at startup
    pub users: Vec<User>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_query_length: 5000,
            context_turns: nlq_history::DEFAULT_CONTEXT_TURNS,
            history_sample_limit: nlq_history::DEFAULT_SAMPLE_LIMIT,
            default_page_size: 20,
            max_page_size: 100,
            database: None,
            fallback_max_result_limit: DEFAULT_FALLBACK_LIMIT,
            translator: HttpClientConfig::default(),
            executor: HttpClientConfig::default(),
            history: HistoryConfig::default(),
            policies: Vec::new(),
            users: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With default database
    #[inline]
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// With context window
    #[inline]
    #[must_use]
    pub fn with_context_turns(mut self, turns: usize) -> Self {
        self.context_turns = turns;
        self
    }

    /// With translator timeout
    #[inline]
    #[must_use]
    pub fn with_translator_timeout_secs(mut self, secs: u64) -> Self {
        self.translator.timeout_secs = secs;
        self
    }

    /// Parse TOML
    ///
    /// # Errors
    /// `ServiceError::Config` on syntax or validation failure.
    pub fn from_toml_str(text: &str) -> Result<Self, ServiceError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ServiceError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// `ServiceError::Config` on I/O, syntax or validation failure.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServiceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Apply `NLQ_*` overrides from the process environment
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a lookup function
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("NLQ_TRANSLATOR_URL") {
            self.translator.base_url = url;
        }
        if let Some(url) = get("NLQ_EXECUTOR_URL") {
            self.executor.base_url = url;
        }
        if let Some(db) = get("NLQ_DATABASE") {
            self.database = Some(db);
        }
        if let Some(path) = get("NLQ_HISTORY_PATH") {
            self.history.path = Some(PathBuf::from(path));
        }
        self
    }

    /// Range checks
    ///
    /// # Errors
    /// `ServiceError::Config` naming the offending field.
    pub fn validate(&self) -> Result<(), ServiceError> {
        let fail = |msg: &str| Err(ServiceError::Config(msg.to_string()));

        if self.max_query_length == 0 {
            return fail("max_query_length must be positive");
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return fail("page sizes must be positive");
        }
        if self.default_page_size > self.max_page_size {
            return fail("default_page_size exceeds max_page_size");
        }
        if self.fallback_max_result_limit == 0 {
            return fail("fallback_max_result_limit must be positive");
        }
        if self.translator.timeout_secs == 0 {
            return fail("translator.timeout_secs must be positive");
        }
        if self.history_sample_limit == 0 || self.history_sample_limit > MAX_HISTORY_SAMPLE_LIMIT {
            return Err(ServiceError::Config(format!(
                "history_sample_limit must be between 1 and {MAX_HISTORY_SAMPLE_LIMIT}"
            )));
        }
        Ok(())
    }

    /// Clamp a requested page size
    #[must_use]
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        match requested {
            None | Some(0) => self.default_page_size,
            Some(n) => n.min(self.max_page_size),
        }
    }
}
