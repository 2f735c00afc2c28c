//! Routes and handlers
//!
//! The caller is identified by the `x-user-id` header, set by the
//! authenticating proxy in front of the gateway.

use crate::error::ApiError;
use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use nlq_core::{
    CancelRequest, ConfirmRequest, DirectRequest, HealthReport, HistoryQuery, PlanRequest,
    QueryService,
};
use nlq_history::{ConversationId, TurnId};
use nlq_policy::UserId;
use serde::Serialize;
use std::sync::Arc;

/// Header carrying the caller identity
pub const USER_HEADER: &str = "x-user-id";

/// Shared handler state
pub type AppState = Arc<QueryService>;

/// Success envelope
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    /// Always `true`
    pub success: bool,
    /// Payload, flattened into the envelope
    #[serde(flatten)]
    pub data: T,
}

impl<T> Envelope<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

/// Caller identity from `x-user-id`
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserId);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(UserId::new(v)))
            .ok_or(ApiError::MissingUser)
    }
}

/// Build the API router
pub fn router(service: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/query/plan", post(plan))
        .route("/api/query/confirm", post(confirm))
        .route("/api/query/cancel", post(cancel))
        .route("/api/query/execute", post(execute_direct))
        .route("/api/history", get(history))
        .route("/api/history/:id", delete(delete_turn))
        .route("/api/conversations/:id", get(conversation))
        .with_state(service)
}

async fn health(State(service): State<AppState>) -> Json<HealthReport> {
    Json(service.health().await)
}

async fn plan(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<PlanRequest>,
) -> ApiResult<nlq_core::PlanResponse> {
    Ok(Envelope::ok(service.plan(&user, request).await?))
}

async fn confirm(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ConfirmRequest>,
) -> ApiResult<nlq_core::ExecutionResponse> {
    Ok(Envelope::ok(service.confirm(&user, request).await?))
}

async fn cancel(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<CancelRequest>,
) -> ApiResult<nlq_core::CancelResponse> {
    Ok(Envelope::ok(service.cancel(&user, request).await?))
}

async fn execute_direct(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<DirectRequest>,
) -> ApiResult<nlq_core::ExecutionResponse> {
    Ok(Envelope::ok(service.execute_direct(&user, request).await?))
}

async fn history(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<nlq_history::HistoryPage> {
    Ok(Envelope::ok(service.history(&user, query).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deleted {
    deleted: TurnId,
}

async fn delete_turn(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    let id: TurnId = id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("'{id}' is not a history id")))?;
    service.delete_turn(&user, id).await?;
    Ok(Envelope::ok(Deleted { deleted: id }))
}

async fn conversation(
    State(service): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<nlq_core::ConversationView> {
    let id = ConversationId::from_string(id);
    if id.is_blank() {
        return Err(ApiError::BadRequest("conversation id is empty".to_string()));
    }
    Ok(Envelope::ok(service.conversation(&user, &id).await?))
}
