//! NLQ Core - plan, confirm, execute
//!
//! The orchestration layer of the gateway:
//! - Validates natural-language input before any external call
//! - Requests plans from the translator and normalizes them
//! - Holds at most one pending plan per conversation in the confirmation gate
//! - Re-authorizes confirmed operations against the live policy
//! - Records every execution attempt for audit and conversation context
//!
//! # Example
//!
//! ```rust,ignore
//! use nlq_core::{PlanRequest, QueryService, ServiceConfig, ConfirmRequest};
//!
//! # async fn example(service: QueryService, user: nlq_policy::UserId) -> Result<(), nlq_core::ServiceError> {
//! let plan = service.plan(&user, PlanRequest::new("show me the last ten orders")).await?;
//! if plan.needs_confirmation {
//!     let executed = service
//!         .confirm(&user, ConfirmRequest {
//!             conversation_id: Some(plan.conversation_id),
//!             plan_id: plan.plan_id,
//!             ..ConfirmRequest::default()
//!         })
//!         .await?;
//!     println!("{} rows", executed.result_count);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unreachable_pub)]

pub mod api;
pub mod config;
pub mod error;
pub mod gate;
pub mod planner;
pub mod service;
pub mod validation;

pub use api::{
    CancelRequest, CancelResponse, ConfirmRequest, ConversationEntry, ConversationView,
    DirectRequest, ExecutionResponse, HealthReport, HistoryQuery, PlanRequest, PlanResponse,
};
pub use config::{HistoryConfig, ServiceConfig, MAX_HISTORY_SAMPLE_LIMIT};
pub use error::ServiceError;
pub use gate::{
    allowed_transitions, validate_transition, ConfirmGuard, ConfirmTarget, ConfirmationGate,
    GatePhase, GateState, PendingPlan, PlanId, SessionNote, CANCELLED_NOTE, MAX_SESSION_NOTES,
};
pub use planner::{normalize, Plan, PlanKind, PlanRequester, VisualizationSpec};
pub use service::QueryService;
pub use validation::{sanitize_query, validate_query};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with NLQ Core
    pub use crate::{
        ConfirmRequest, DirectRequest, ExecutionResponse, PlanKind, PlanRequest, PlanResponse,
        QueryService, ServiceConfig, ServiceError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
