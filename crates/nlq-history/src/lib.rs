//! NLQ History - the execution audit log
//!
//! Provides:
//! - `Turn` records, written once per execution attempt
//! - `HistoryStore` with in-memory and SQLite backends
//! - `HistoryRecorder` for bounded result samples
//! - `ContextAssembler` for the translator's conversation window
//!
//! A conversation is a derived view: turns filtered by conversation id and
//! ordered by creation time. There is no separate conversation entity.

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod context;
pub mod error;
pub mod memory;
pub mod recorder;
pub mod sqlite;
pub mod store;
pub mod turn;

pub use context::{ContextAssembler, HistoryMessage, MessageRole, DEFAULT_CONTEXT_TURNS};
pub use error::HistoryError;
pub use memory::InMemoryHistoryStore;
pub use recorder::{HistoryRecorder, TurnDraft, DEFAULT_SAMPLE_LIMIT};
pub use sqlite::SqliteHistoryStore;
pub use store::{HistoryPage, HistoryStore};
pub use turn::{ConversationId, Turn, TurnId, TurnOrigin, TurnOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
