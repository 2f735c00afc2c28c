//! NLQ Translator - external service boundary
//!
//! Two remote collaborators sit behind traits:
//! - `Translator`: natural language in, a plan reply out (`POST /plan`)
//! - `QueryExecutor`: an authorized operation in, rows out (`POST /execute-mql`)
//!
//! The HTTP implementations classify failures into connection-refused,
//! timeout and service-reported errors. Replies are read leniently: the
//! translator may wrap its JSON in prose or a fenced block.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod client;
pub mod error;
pub mod executor;
pub mod extract;
pub mod translator;
pub mod wire;

pub use client::HttpClientConfig;
pub use error::{ExecutorError, TranslatorError};
pub use executor::{ExecutionOutput, HttpExecutor, QueryExecutor};
pub use extract::parse_reply;
pub use translator::{HttpTranslator, Translator, TranslatorHealth};
pub use wire::{PermissionsPayload, TranslatorReply, TranslatorRequest, VisualizationHint};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
