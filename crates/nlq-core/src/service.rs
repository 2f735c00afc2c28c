//! Query service
//!
//! Orchestrates the gateway operations:
//! - `plan`: validate, resolve policy, assemble context, ask the translator,
//!   park the result in the confirmation gate
//! - `confirm`: take the pending plan out of the gate, re-authorize against
//!   the live policy, execute, redact, record
//! - `cancel`, `history`, `conversation`, `delete_turn`
//! - `execute_direct`: same authorization and recording, no gate
//!
//! Only execution attempts are recorded. Plan failures leave no turn and no
//! gate state behind.

use crate::api::{
    CancelRequest, CancelResponse, ConfirmRequest, ConversationEntry, ConversationView,
    DirectRequest, ExecutionResponse, HealthReport, HistoryQuery, PlanRequest, PlanResponse,
};
use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::gate::{ConfirmTarget, ConfirmationGate, PendingPlan, PlanId};
use crate::planner::{Plan, PlanRequester};
use crate::validation::{sanitize_query, validate_query};
use chrono::Utc;
use nlq_history::{
    ContextAssembler, ConversationId, HistoryPage, HistoryRecorder, HistoryStore, TurnDraft,
    TurnId, TurnOrigin,
};
use nlq_policy::{
    authorize, PermissionResolver, PolicyStore, ProposedOperation, ResolvedPolicy, User, UserId,
};
use nlq_translator::{QueryExecutor, Translator, TranslatorRequest};
use std::sync::Arc;
use std::time::{Duration, Instant};

const DIRECT_QUERY_TEXT: &str = "Direct execution";

/// One execution attempt, gated or direct
struct ExecutionJob {
    user: User,
    conversation: Option<ConversationId>,
    natural_query: String,
    database: Option<String>,
    operation: ProposedOperation,
    explanation: Option<String>,
    origin: TurnOrigin,
}

/// Natural-language query gateway
pub struct QueryService {
    config: ServiceConfig,
    resolver: Arc<PermissionResolver>,
    assembler: ContextAssembler,
    recorder: HistoryRecorder,
    planner: PlanRequester,
    translator: Arc<dyn Translator>,
    executor: Arc<dyn QueryExecutor>,
    gate: ConfirmationGate,
}

impl QueryService {
    /// Wire the service from its collaborators
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        policies: Arc<dyn PolicyStore>,
        history: Arc<dyn HistoryStore>,
        translator: Arc<dyn Translator>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let resolver = PermissionResolver::new(policies)
            .with_fallback_limit(config.fallback_max_result_limit);
        let assembler = ContextAssembler::new(history.clone()).with_max_turns(config.context_turns);
        let recorder = HistoryRecorder::new(history).with_sample_limit(config.history_sample_limit);
        let planner = PlanRequester::new(
            translator.clone(),
            Duration::from_secs(config.translator.timeout_secs),
        );

        Self {
            config,
            resolver: Arc::new(resolver),
            assembler,
            recorder,
            planner,
            translator,
            executor,
            gate: ConfirmationGate::new(),
        }
    }

    /// Load the configured policies and users into the policy store
    ///
    /// # Errors
    /// Invalid policy or store failure.
    pub async fn seed_from_config(&self) -> Result<(), ServiceError> {
        self.resolver
            .seed(self.config.policies.clone(), self.config.users.clone())
            .await?;
        tracing::info!(
            policies = self.config.policies.len(),
            users = self.config.users.len(),
            "policy store seeded"
        );
        Ok(())
    }

    /// Active configuration
    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Policy administration
    #[must_use]
    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }

    /// Confirmation gate
    #[must_use]
    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    /// Propose an operation for a natural-language query
    ///
    /// # Workflow
    /// 1. Validate the text (before any external call)
    /// 2. Resolve the caller's effective policy
    /// 3. Assemble the conversation context
    /// 4. Request and normalize a plan
    /// 5. Check the plan against the policy (informational only)
    /// 6. Park the plan in the gate, or clear the gate for a conversational reply
    ///
    /// # Errors
    /// Invalid input, unknown user, policy store failure, or any translator
    /// failure. Nothing is recorded and the gate is untouched on error.
    pub async fn plan(&self, user_id: &UserId, request: PlanRequest) -> Result<PlanResponse, ServiceError> {
        let query = validate_query(&request.query, self.config.max_query_length)?;
        let user = self.require_user(user_id).await?;
        let resolved = self.resolver.resolve(&user).await?;

        let conversation = request
            .conversation_id
            .filter(|c| !c.is_blank())
            .unwrap_or_else(ConversationId::generate);

        let history = match self.assembler.assemble(&user.id, Some(&conversation)).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(error = %e, conversation = %conversation, "context unavailable, planning without it");
                Vec::new()
            }
        };

        let database = request.database.or_else(|| self.config.database.clone());
        let translator_request = TranslatorRequest {
            query: query.clone(),
            database: database.clone(),
            collection: request.collection,
            history,
            permissions: (&resolved.policy).into(),
            user_role: user.role.clone(),
            policy_name: resolved.policy.name.clone(),
            custom_system_prompt: request.custom_system_prompt,
            visualization_hint: request.visualization_hint,
        };

        let plan = self.planner.request(&translator_request).await?;
        let policy_warning = plan
            .operation
            .as_ref()
            .and_then(|op| plan_time_warning(&resolved, database.as_deref(), op));

        let plan_id = match &plan.operation {
            Some(op) => Some(self.gate.propose(
                &user.id,
                &conversation,
                PendingPlan {
                    plan_id: PlanId::new(),
                    operation: op.clone(),
                    natural_query: query,
                    explanation: plan.explanation.clone(),
                    database,
                    created_at: Utc::now(),
                },
            )?),
            None => {
                self.gate.clear_pending(&user.id, &conversation);
                None
            }
        };

        tracing::info!(
            user = %user.id,
            conversation = %conversation,
            kind = ?plan.kind,
            policy = %resolved.policy.name,
            "plan ready"
        );
        Ok(plan_response(conversation, plan_id, plan, policy_warning, &resolved))
    }

    /// Execute the pending plan of a conversation
    ///
    /// # Errors
    /// - `NoPendingPlan` / `StalePlan` / `AlreadyConfirming` from the gate
    /// - `SecurityViolation` when the live policy refuses the operation
    /// - `ExecutionFailed` when the executor fails
    pub async fn confirm(
        &self,
        user_id: &UserId,
        request: ConfirmRequest,
    ) -> Result<ExecutionResponse, ServiceError> {
        let user = self.require_user(user_id).await?;
        let Some(conversation) = request.conversation_id.filter(|c| !c.is_blank()) else {
            return Err(ServiceError::NoPendingPlan(String::new()));
        };

        let target = match (request.plan_id, request.proposed_operation) {
            (Some(plan_id), _) => ConfirmTarget::Plan(plan_id),
            (None, Some(raw)) => ConfirmTarget::Operation(
                ProposedOperation::from_raw(raw, None)
                    .map_err(|e| ServiceError::InvalidInput(e.to_string()))?,
            ),
            (None, None) => {
                return Err(ServiceError::InvalidInput(
                    "confirmation must name a planId or a proposedOperation".to_string(),
                ))
            }
        };

        let pending = self.gate.begin_confirm(&user.id, &conversation, &target)?;
        let _finish = self.gate.guard(user_id, &conversation, pending.plan_id);
        let natural_query = request
            .natural_query
            .map(|q| sanitize_query(&q))
            .filter(|q| !q.is_empty())
            .unwrap_or(pending.natural_query);

        self.run_authorized(ExecutionJob {
            user,
            conversation: Some(conversation.clone()),
            natural_query,
            database: pending.database,
            operation: pending.operation,
            explanation: Some(pending.explanation).filter(|e| !e.trim().is_empty()),
            origin: TurnOrigin::Confirmed,
        })
        .await
    }

    /// Discard the pending plan of a conversation
    ///
    /// # Errors
    /// `NoPendingPlan` when nothing is awaiting confirmation.
    pub async fn cancel(&self, user_id: &UserId, request: CancelRequest) -> Result<CancelResponse, ServiceError> {
        let user = self.require_user(user_id).await?;
        let note = self.gate.cancel(&user.id, &request.conversation_id)?;
        Ok(CancelResponse {
            conversation_id: request.conversation_id,
            note,
        })
    }

    /// Run an operation without planning
    ///
    /// # Errors
    /// Invalid payload, security violation or execution failure.
    pub async fn execute_direct(
        &self,
        user_id: &UserId,
        request: DirectRequest,
    ) -> Result<ExecutionResponse, ServiceError> {
        let user = self.require_user(user_id).await?;
        let operation = ProposedOperation::from_raw(request.operation, None)
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;

        let natural_query = request
            .natural_query
            .map(|q| sanitize_query(&q))
            .filter(|q| !q.is_empty())
            .unwrap_or_else(|| DIRECT_QUERY_TEXT.to_string());

        self.run_authorized(ExecutionJob {
            user,
            conversation: request.conversation_id.filter(|c| !c.is_blank()),
            natural_query,
            database: request.database.or_else(|| self.config.database.clone()),
            operation,
            explanation: None,
            origin: TurnOrigin::Direct,
        })
        .await
    }

    /// Caller's turns, most recent first
    ///
    /// # Errors
    /// Unknown user or storage failure.
    pub async fn history(&self, user_id: &UserId, query: HistoryQuery) -> Result<HistoryPage, ServiceError> {
        let user = self.require_user(user_id).await?;
        let limit = self.config.page_size(query.limit);
        let skip = query.skip.unwrap_or(0);
        Ok(self
            .recorder
            .store()
            .page_for_user(&user.id, limit, skip)
            .await?)
    }

    /// Turns and session notes of one conversation, oldest first
    ///
    /// # Errors
    /// Unknown user or storage failure.
    pub async fn conversation(
        &self,
        user_id: &UserId,
        conversation: &ConversationId,
    ) -> Result<ConversationView, ServiceError> {
        let user = self.require_user(user_id).await?;
        let turns = self
            .recorder
            .store()
            .conversation(&user.id, conversation)
            .await?;

        let mut entries: Vec<ConversationEntry> = turns
            .into_iter()
            .map(ConversationEntry::Turn)
            .chain(
                self.gate
                    .notes(&user.id, conversation)
                    .into_iter()
                    .map(ConversationEntry::Note),
            )
            .collect();
        entries.sort_by_key(ConversationEntry::created_at);

        Ok(ConversationView {
            conversation_id: conversation.clone(),
            entries,
        })
    }

    /// Delete one of the caller's turns
    ///
    /// # Errors
    /// `NotFound` when missing, already deleted, or owned by someone else.
    pub async fn delete_turn(&self, user_id: &UserId, id: TurnId) -> Result<(), ServiceError> {
        let user = self.require_user(user_id).await?;
        self.recorder.store().delete(&user.id, id).await?;
        tracing::info!(user = %user.id, turn = %id, "turn deleted");
        Ok(())
    }

    /// Translator reachability and identity
    pub async fn health(&self) -> HealthReport {
        let deadline = Duration::from_secs(self.config.translator.connect_timeout_secs.max(1));
        let probe = tokio::time::timeout(deadline, self.translator.health()).await;

        let (translator, translator_error) = match probe {
            Ok(Ok(health)) => (Some(health), None),
            Ok(Err(e)) => (None, Some(e.to_string())),
            Err(_) => (None, Some(format!("no answer within {}s", deadline.as_secs()))),
        };
        HealthReport {
            status: if translator.is_some() { "healthy" } else { "degraded" }.to_string(),
            translator,
            translator_error,
            database: self.config.database.clone(),
        }
    }

    async fn require_user(&self, id: &UserId) -> Result<User, ServiceError> {
        self.resolver
            .user(id)
            .await?
            .ok_or_else(|| ServiceError::UnknownUser(id.clone()))
    }

    /// Authorize against the live policy, execute, redact and record
    async fn run_authorized(&self, job: ExecutionJob) -> Result<ExecutionResponse, ServiceError> {
        let user_id = job.user.id.clone();

        // 1. Live policy, never the plan-time snapshot
        let resolved = match self.resolver.resolve(&job.user).await {
            Ok(resolved) => resolved,
            Err(e) => {
                let draft = self.failure_draft(&job, e.to_string());
                self.recorder.record_best_effort(draft).await;
                return Err(e.into());
            }
        };

        // 2. Authorize
        let grant = match authorize(&resolved.policy, job.database.as_deref(), &job.operation) {
            Ok(grant) => grant,
            Err(violation) => {
                tracing::warn!(
                    user = %user_id,
                    collection = %job.operation.collection,
                    policy = %resolved.policy.name,
                    %violation,
                    "operation refused"
                );
                let draft = self.failure_draft(&job, format!("Security policy violation: {violation}"));
                let history_id = self.recorder.record_best_effort(draft).await;
                return Err(ServiceError::SecurityViolation {
                    violation,
                    history_id,
                });
            }
        };

        // 3. Execute
        let started = Instant::now();
        let executed = self
            .executor
            .execute(job.database.as_deref(), &job.operation, Some(&resolved.policy))
            .await;
        let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut output = match executed {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(user = %user_id, error = %e, "execution failed");
                let draft = self
                    .failure_draft(&job, e.to_string())
                    .with_execution_time_ms(execution_time_ms);
                let history_id = self.recorder.record_best_effort(draft).await;
                return Err(ServiceError::ExecutionFailed {
                    message: e.to_string(),
                    history_id,
                });
            }
        };

        // 4. Redact with the same restriction set that authorized the call
        for document in &mut output.results {
            grant.redact(document);
        }

        // 5. Record
        let result_count = output.results.len() as u64;
        let explanation = job.explanation.clone().unwrap_or_else(|| {
            format!("Successfully executed query. Found {result_count} results.")
        });
        let draft = TurnDraft::success(
            user_id.clone(),
            job.natural_query.clone(),
            job.operation.clone(),
            output.results.clone(),
        )
        .in_conversation(job.conversation.clone())
        .with_explanation(explanation.clone())
        .with_execution_time_ms(execution_time_ms)
        .with_origin(job.origin);
        let history_id = self.recorder.record_best_effort(draft).await;

        tracing::info!(
            user = %user_id,
            collection = %job.operation.collection,
            result_count,
            execution_time_ms,
            origin = job.origin.as_str(),
            "operation executed"
        );

        Ok(ExecutionResponse {
            results: output.results,
            result_count,
            explanation,
            execution_time_ms,
            history_id,
            conversation_id: job.conversation,
        })
    }

    fn failure_draft(&self, job: &ExecutionJob, error: String) -> TurnDraft {
        TurnDraft::failure(
            job.user.id.clone(),
            job.natural_query.clone(),
            Some(job.operation.clone()),
            error,
        )
        .in_conversation(job.conversation.clone())
        .with_origin(job.origin)
    }
}

fn plan_time_warning(
    resolved: &ResolvedPolicy,
    database: Option<&str>,
    operation: &ProposedOperation,
) -> Option<String> {
    match authorize(&resolved.policy, database, operation) {
        Ok(_) => None,
        Err(violation) => {
            tracing::warn!(
                policy = %resolved.policy.name,
                collection = %operation.collection,
                %violation,
                "plan conflicts with current policy"
            );
            Some(violation.to_string())
        }
    }
}

fn plan_response(
    conversation_id: ConversationId,
    plan_id: Option<PlanId>,
    plan: Plan,
    policy_warning: Option<String>,
    resolved: &ResolvedPolicy,
) -> PlanResponse {
    PlanResponse {
        conversation_id,
        plan_id,
        kind: plan.kind,
        proposed_operation: plan.operation,
        explanation: plan.explanation,
        needs_confirmation: plan.needs_confirmation,
        visualization: plan.visualization,
        policy_warning,
        policy_name: resolved.policy.name.clone(),
        policy_source: resolved.source,
        metadata: plan.metadata,
    }
}
