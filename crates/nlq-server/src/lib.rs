//! NLQ Server - HTTP surface of the gateway
//!
//! - `GET /health`
//! - `POST /api/query/plan`, `/confirm`, `/cancel`, `/execute`
//! - `GET /api/history`, `DELETE /api/history/:id`
//! - `GET /api/conversations/:id`

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod error;
pub mod routes;

pub use error::{status_for, ApiError};
pub use routes::{router, AppState, CurrentUser, Envelope, USER_HEADER};

use anyhow::Context;
use nlq_core::{QueryService, ServiceConfig};
use nlq_history::{HistoryStore, InMemoryHistoryStore, SqliteHistoryStore};
use nlq_policy::InMemoryPolicyStore;
use nlq_translator::{HttpExecutor, HttpTranslator};
use std::sync::Arc;

/// Build the service with HTTP collaborators and seed its policies
///
/// # Errors
/// History store, HTTP client or seeding failure.
pub async fn build_service(config: ServiceConfig) -> anyhow::Result<QueryService> {
    let history: Arc<dyn HistoryStore> = match &config.history.path {
        Some(path) => Arc::new(
            SqliteHistoryStore::open(path)
                .with_context(|| format!("opening history at {}", path.display()))?,
        ),
        None => {
            tracing::warn!("no history path configured, turns are kept in memory");
            Arc::new(InMemoryHistoryStore::new())
        }
    };
    let translator = Arc::new(HttpTranslator::new(config.translator.clone())?);
    let executor = Arc::new(HttpExecutor::new(config.executor.clone())?);

    let service = QueryService::new(
        config,
        Arc::new(InMemoryPolicyStore::new()),
        history,
        translator,
        executor,
    );
    service
        .seed_from_config()
        .await
        .context("seeding policies")?;
    Ok(service)
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
