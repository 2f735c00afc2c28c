//! Confirmation gate
//!
//! Per-conversation state machine holding at most one pending plan:
//!
//! ```text
//! idle -> planned -> confirmed -> idle
//!            |   \-> cancelled -> idle
//!            \-> planned (a newer plan replaces it)
//! ```
//!
//! State is keyed by `(user, conversation)`. Each operation runs inside a
//! single map entry lock, so a confirm racing a newer plan either confirms
//! the plan it names or fails; it never executes the other one.
//!
//! An entry is dropped as soon as it is idle with no notes. Notes are capped
//! per conversation, oldest dropped first.

use crate::error::ServiceError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nlq_history::ConversationId;
use nlq_policy::{ProposedOperation, UserId};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Note appended when a plan is cancelled
pub const CANCELLED_NOTE: &str = "Query cancelled by user.";

/// Notes kept per conversation
pub const MAX_SESSION_NOTES: usize = 50;

/// Pending plan identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(pub Ulid);

impl PlanId {
    /// Generate new plan ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PlanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A proposal awaiting the user's decision
#[derive(Debug, Clone, PartialEq)]
pub struct PendingPlan {
    /// Identifier returned to the client
    pub plan_id: PlanId,
    /// Operation to run on confirmation
    pub operation: ProposedOperation,
    /// Text the user typed
    pub natural_query: String,
    /// Explanation shown with the plan
    pub explanation: String,
    /// Database the plan targets
    pub database: Option<String>,
    /// When it was proposed
    pub created_at: DateTime<Utc>,
}

/// Synthetic, non-persisted conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNote {
    /// Text
    pub content: String,
    /// When it was added
    pub created_at: DateTime<Utc>,
}

/// Payload-free state tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GatePhase {
    /// Nothing pending
    Idle,
    /// A plan awaits confirmation
    Planned,
    /// The confirmed plan is executing
    Confirmed,
    /// The pending plan was discarded
    Cancelled,
}

/// Legal successors of a phase
#[must_use]
pub fn allowed_transitions(from: GatePhase) -> Vec<GatePhase> {
    match from {
        GatePhase::Idle => vec![GatePhase::Planned],
        GatePhase::Planned => vec![
            GatePhase::Planned,
            GatePhase::Confirmed,
            GatePhase::Cancelled,
            GatePhase::Idle,
        ],
        GatePhase::Confirmed => vec![GatePhase::Idle, GatePhase::Planned],
        GatePhase::Cancelled => vec![GatePhase::Idle],
    }
}

/// Check a phase change
///
/// # Errors
/// `ServiceError::StalePlan` for an illegal transition.
pub fn validate_transition(from: GatePhase, to: GatePhase) -> Result<(), ServiceError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(ServiceError::StalePlan(format!(
            "illegal transition {from:?} -> {to:?}"
        )))
    }
}

/// Gate state with payload
#[derive(Debug, Clone, Default, PartialEq)]
pub enum GateState {
    /// Nothing pending
    #[default]
    Idle,
    /// A plan awaits confirmation
    Planned(PendingPlan),
    /// The plan with this id is executing
    Confirmed {
        /// Executing plan
        plan_id: PlanId,
    },
    /// The pending plan was discarded
    Cancelled,
}

impl GateState {
    /// Payload-free tag
    #[must_use]
    pub fn phase(&self) -> GatePhase {
        match self {
            GateState::Idle => GatePhase::Idle,
            GateState::Planned(_) => GatePhase::Planned,
            GateState::Confirmed { .. } => GatePhase::Confirmed,
            GateState::Cancelled => GatePhase::Cancelled,
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    state: GateState,
    notes: Vec<SessionNote>,
}

impl Session {
    fn transition(&mut self, to: GateState) -> Result<(), ServiceError> {
        validate_transition(self.state.phase(), to.phase())?;
        self.state = to;
        Ok(())
    }

    fn add_note(&mut self, note: SessionNote) {
        self.notes.push(note);
        if self.notes.len() > MAX_SESSION_NOTES {
            let excess = self.notes.len() - MAX_SESSION_NOTES;
            self.notes.drain(..excess);
        }
    }

    fn is_vacant(&self) -> bool {
        self.state == GateState::Idle && self.notes.is_empty()
    }
}

/// How the client identifies the plan it confirms
#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmTarget {
    /// By plan id
    Plan(PlanId),
    /// By the operation shown to the user
    Operation(ProposedOperation),
}

type SessionKey = (UserId, ConversationId);

/// Per-conversation pending plan registry
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    sessions: DashMap<SessionKey, Session>,
}

impl ConfirmationGate {
    /// Create empty gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversations currently holding state
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Apply `update` to an existing session, then drop it if vacant
    fn settle(&self, key: &SessionKey, update: impl FnOnce(&mut Session)) {
        if let Some(mut session) = self.sessions.get_mut(key) {
            update(&mut session);
        }
        self.sessions.remove_if(key, |_, session| session.is_vacant());
    }

    /// Current phase of a conversation
    #[must_use]
    pub fn phase(&self, user: &UserId, conversation: &ConversationId) -> GatePhase {
        self.sessions
            .get(&(user.clone(), conversation.clone()))
            .map_or(GatePhase::Idle, |s| s.state.phase())
    }

    /// Pending plan, if one is awaiting confirmation
    #[must_use]
    pub fn pending(&self, user: &UserId, conversation: &ConversationId) -> Option<PendingPlan> {
        self.sessions
            .get(&(user.clone(), conversation.clone()))
            .and_then(|s| match &s.state {
                GateState::Planned(plan) => Some(plan.clone()),
                _ => None,
            })
    }

    /// Record a new plan, replacing any pending one
    ///
    /// # Errors
    /// Illegal transition (not reachable from any phase in practice).
    pub fn propose(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        plan: PendingPlan,
    ) -> Result<PlanId, ServiceError> {
        let plan_id = plan.plan_id;
        let mut session = self
            .sessions
            .entry((user.clone(), conversation.clone()))
            .or_default();

        if session.state.phase() == GatePhase::Cancelled {
            session.transition(GateState::Idle)?;
        }
        if let GateState::Planned(previous) = &session.state {
            tracing::debug!(
                conversation = %conversation,
                superseded = %previous.plan_id,
                "pending plan replaced"
            );
        }
        session.transition(GateState::Planned(plan))?;
        Ok(plan_id)
    }

    /// A reply with nothing to execute supersedes the pending plan
    pub fn clear_pending(&self, user: &UserId, conversation: &ConversationId) {
        self.settle(&(user.clone(), conversation.clone()), |session| {
            if session.state.phase() == GatePhase::Planned {
                session.state = GateState::Idle;
            }
        });
    }

    /// Move the pending plan to `confirmed` and hand it to the caller
    ///
    /// The caller must call `finish` with the returned plan id when the
    /// execution attempt ends, or hold a `ConfirmGuard` that does it on drop.
    ///
    /// # Errors
    /// - `NoPendingPlan` when nothing is planned
    /// - `AlreadyConfirming` when the plan is executing
    /// - `StalePlan` when the target does not match the pending plan
    pub fn begin_confirm(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        target: &ConfirmTarget,
    ) -> Result<PendingPlan, ServiceError> {
        let Some(mut session) = self
            .sessions
            .get_mut(&(user.clone(), conversation.clone()))
        else {
            return Err(ServiceError::NoPendingPlan(conversation.to_string()));
        };

        let plan = match &session.state {
            GateState::Planned(plan) => plan.clone(),
            GateState::Confirmed { .. } => {
                return Err(ServiceError::AlreadyConfirming(conversation.to_string()))
            }
            GateState::Idle | GateState::Cancelled => {
                return Err(ServiceError::NoPendingPlan(conversation.to_string()))
            }
        };

        let matches = match target {
            ConfirmTarget::Plan(id) => *id == plan.plan_id,
            ConfirmTarget::Operation(op) => *op == plan.operation,
        };
        if !matches {
            return Err(ServiceError::StalePlan(format!(
                "pending plan is {}",
                plan.plan_id
            )));
        }

        session.transition(GateState::Confirmed {
            plan_id: plan.plan_id,
        })?;
        tracing::info!(conversation = %conversation, plan = %plan.plan_id, "plan confirmed");
        Ok(plan)
    }

    /// End an execution attempt
    ///
    /// Returns to `idle` only if the conversation is still on this plan; a
    /// newer plan proposed meanwhile stays pending.
    pub fn finish(&self, user: &UserId, conversation: &ConversationId, plan_id: PlanId) {
        self.settle(&(user.clone(), conversation.clone()), |session| {
            if session.state == (GateState::Confirmed { plan_id }) {
                session.state = GateState::Idle;
            }
        });
    }

    /// Guard that calls `finish` when dropped
    ///
    /// Keeps the conversation from staying `confirmed` when the execution
    /// future is dropped before it completes.
    #[must_use]
    pub fn guard(&self, user: &UserId, conversation: &ConversationId, plan_id: PlanId) -> ConfirmGuard<'_> {
        ConfirmGuard {
            gate: self,
            user: user.clone(),
            conversation: conversation.clone(),
            plan_id,
        }
    }

    /// Discard the pending plan and leave a note
    ///
    /// # Errors
    /// `NoPendingPlan` when nothing is planned.
    pub fn cancel(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<SessionNote, ServiceError> {
        let Some(mut session) = self
            .sessions
            .get_mut(&(user.clone(), conversation.clone()))
        else {
            return Err(ServiceError::NoPendingPlan(conversation.to_string()));
        };
        if session.state.phase() != GatePhase::Planned {
            return Err(ServiceError::NoPendingPlan(conversation.to_string()));
        }

        session.transition(GateState::Cancelled)?;
        let note = SessionNote {
            content: CANCELLED_NOTE.to_string(),
            created_at: Utc::now(),
        };
        session.add_note(note.clone());
        session.transition(GateState::Idle)?;

        tracing::info!(conversation = %conversation, "plan cancelled");
        Ok(note)
    }

    /// Notes of a conversation, oldest first
    #[must_use]
    pub fn notes(&self, user: &UserId, conversation: &ConversationId) -> Vec<SessionNote> {
        self.sessions
            .get(&(user.clone(), conversation.clone()))
            .map(|s| s.notes.clone())
            .unwrap_or_default()
    }
}

/// Ends an execution attempt on drop
#[derive(Debug)]
pub struct ConfirmGuard<'a> {
    gate: &'a ConfirmationGate,
    user: UserId,
    conversation: ConversationId,
    plan_id: PlanId,
}

impl Drop for ConfirmGuard<'_> {
    fn drop(&mut self) {
        self.gate.finish(&self.user, &self.conversation, self.plan_id);
    }
}
