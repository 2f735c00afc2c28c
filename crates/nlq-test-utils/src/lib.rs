//! Testing utilities for NLQ workspace
//!
//! Shared fakes and fixtures:
//! - `ScriptedTranslator`: replays queued replies, records requests
//! - `InMemoryExecutor`: evaluates simple operations over seeded documents
//! - `FailingHistoryStore`: every call fails
//! - Analyst / Manager policies and a user dataset

#![allow(missing_docs)]

use async_trait::async_trait;
use nlq_history::{ConversationId, HistoryError, HistoryPage, HistoryStore, Turn, TurnId};
use nlq_policy::{CollectionGrant, OperationKind, ProposedOperation, RolePolicy, User, UserId};
use nlq_translator::{
    ExecutionOutput, ExecutorError, QueryExecutor, Translator, TranslatorError, TranslatorHealth,
    TranslatorReply, TranslatorRequest,
};
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Translator

#[derive(Default)]
pub struct ScriptedTranslator {
    script: Mutex<VecDeque<Result<TranslatorReply, TranslatorError>>>,
    requests: Mutex<Vec<TranslatorRequest>>,
    delay: Option<Duration>,
    health: Option<TranslatorHealth>,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_health(mut self, health: TranslatorHealth) -> Self {
        self.health = Some(health);
        self
    }

    pub fn push_reply(&self, reply: TranslatorReply) -> &Self {
        self.script.lock().push_back(Ok(reply));
        self
    }

    pub fn push_error(&self, error: TranslatorError) -> &Self {
        self.script.lock().push_back(Err(error));
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<TranslatorRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<TranslatorRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl Translator for ScriptedTranslator {
    async fn translate(&self, request: &TranslatorRequest) -> Result<TranslatorReply, TranslatorError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TranslatorError::ConnectionRefused("script exhausted".into())))
    }

    async fn health(&self) -> Result<TranslatorHealth, TranslatorError> {
        self.health
            .clone()
            .ok_or_else(|| TranslatorError::ConnectionRefused("no health scripted".into()))
    }
}

pub fn database_reply(operation: Value, explanation: &str) -> TranslatorReply {
    TranslatorReply {
        success: true,
        kind: Some("database".into()),
        mql_query: Some(operation),
        explanation: explanation.into(),
        needs_confirmation: true,
        ..TranslatorReply::default()
    }
}

pub fn visualization_reply(operation: Value, chart_type: &str) -> TranslatorReply {
    TranslatorReply {
        success: true,
        kind: Some("visualization".into()),
        mql_query: Some(operation),
        chart_type: Some(chart_type.into()),
        title: Some("Users by department".into()),
        x_key: Some("_id".into()),
        y_key: Some("count".into()),
        ..TranslatorReply::default()
    }
}

pub fn conversational_reply(text: &str) -> TranslatorReply {
    TranslatorReply {
        success: true,
        kind: Some("conversational".into()),
        response: Some(text.into()),
        ..TranslatorReply::default()
    }
}

// ---------------------------------------------------------------------------
// Executor

/// Evaluates equality filters, projections, limits and simple pipelines
#[derive(Default)]
pub struct InMemoryExecutor {
    collections: Mutex<HashMap<String, Vec<Value>>>,
    failure: Mutex<Option<ExecutorError>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl InMemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(self, name: &str, documents: Vec<Value>) -> Self {
        self.collections.lock().insert(name.to_string(), documents);
        self
    }

    /// Sleep before each execution
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next execution
    pub fn fail_next(&self, error: ExecutorError) {
        *self.failure.lock() = Some(error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn run(&self, op: &ProposedOperation) -> Vec<Value> {
        let mut collections = self.collections.lock();
        let joinable = if op.operation == OperationKind::Aggregate {
            collections.clone()
        } else {
            HashMap::new()
        };
        let documents = collections.entry(op.collection.clone()).or_default();

        match op.operation {
            OperationKind::Find => {
                let mut rows: Vec<Value> = documents
                    .iter()
                    .filter(|d| matches_filter(d, &op.query))
                    .map(|d| project(d, op.projection.as_ref()))
                    .collect();
                if let Some(limit) = op.limit {
                    rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                }
                rows
            }
            OperationKind::Aggregate => run_pipeline(documents.clone(), &op.pipeline, &joinable),
            OperationKind::Insert => {
                let inserted: Vec<Value> = match &op.document {
                    Some(Value::Array(docs)) => docs.clone(),
                    Some(doc) => vec![doc.clone()],
                    None => Vec::new(),
                };
                let count = inserted.len();
                documents.extend(inserted);
                vec![json!({ "insertedCount": count })]
            }
            OperationKind::Update => {
                let set = op
                    .update
                    .as_ref()
                    .and_then(|u| u.get("$set"))
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let mut modified = 0;
                for doc in documents.iter_mut().filter(|d| matches_filter(d, &op.query)) {
                    if let Some(obj) = doc.as_object_mut() {
                        obj.extend(set.clone());
                        modified += 1;
                    }
                }
                vec![json!({ "modifiedCount": modified })]
            }
            OperationKind::Delete => {
                let before = documents.len();
                documents.retain(|d| !matches_filter(d, &op.query));
                vec![json!({ "deletedCount": before - documents.len() })]
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for InMemoryExecutor {
    async fn execute(
        &self,
        _database: Option<&str>,
        operation: &ProposedOperation,
        _policy: Option<&RolePolicy>,
    ) -> Result<ExecutionOutput, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().take() {
            return Err(error);
        }
        Ok(ExecutionOutput {
            results: self.run(operation),
            metadata: Map::new(),
        })
    }
}

fn matches_filter(document: &Value, filter: &Map<String, Value>) -> bool {
    filter
        .iter()
        .filter(|(k, _)| !k.starts_with('$'))
        .all(|(k, v)| document.get(k) == Some(v))
}

fn project(document: &Value, projection: Option<&Map<String, Value>>) -> Value {
    let (Some(projection), Some(source)) = (projection, document.as_object()) else {
        return document.clone();
    };
    let included = |v: &Value| v.as_i64() == Some(1) || v.as_bool() == Some(true);
    let inclusion = projection.iter().any(|(k, v)| k != "_id" && included(v));

    let mut out = Map::new();
    for (key, value) in source {
        let keep = match projection.get(key) {
            Some(v) => included(v),
            None => !inclusion || key == "_id",
        };
        if keep {
            out.insert(key.clone(), value.clone());
        }
    }
    Value::Object(out)
}

fn run_pipeline(mut rows: Vec<Value>, pipeline: &[Value], collections: &HashMap<String, Vec<Value>>) -> Vec<Value> {
    for stage in pipeline {
        let Some((name, spec)) = stage.as_object().and_then(|s| s.iter().next()) else {
            continue;
        };
        match (name.as_str(), spec) {
            ("$match", Value::Object(filter)) => rows.retain(|d| matches_filter(d, filter)),
            ("$limit", Value::Number(n)) => {
                rows.truncate(n.as_u64().and_then(|n| usize::try_from(n).ok()).unwrap_or(0));
            }
            ("$project", Value::Object(projection)) => {
                rows = rows.iter().map(|d| project(d, Some(projection))).collect();
            }
            ("$group", Value::Object(group)) => rows = group_by(&rows, group),
            ("$lookup", Value::Object(lookup)) => lookup_join(&mut rows, lookup, collections),
            _ => {}
        }
    }
    rows
}

/// `localField` / `foreignField` equality join
fn lookup_join(rows: &mut [Value], lookup: &Map<String, Value>, collections: &HashMap<String, Vec<Value>>) {
    let field = |key: &str| lookup.get(key).and_then(Value::as_str).unwrap_or_default();
    let foreign = collections.get(field("from")).cloned().unwrap_or_default();
    let (local, remote, at) = (field("localField"), field("foreignField"), field("as"));

    for row in rows.iter_mut() {
        let key = row.get(local).cloned();
        let matched: Vec<Value> = foreign
            .iter()
            .filter(|f| key.is_some() && f.get(remote) == key.as_ref())
            .cloned()
            .collect();
        if let Some(obj) = row.as_object_mut() {
            obj.insert(at.to_string(), Value::Array(matched));
        }
    }
}

/// `{$group: {_id: "$field", count: {$sum: 1}}}` only
fn group_by(rows: &[Value], group: &Map<String, Value>) -> Vec<Value> {
    let key_field = group
        .get("_id")
        .and_then(Value::as_str)
        .map(|s| s.trim_start_matches('$').to_string());
    let mut counts: Vec<(Value, u64)> = Vec::new();
    for row in rows {
        let key = key_field
            .as_deref()
            .and_then(|f| row.get(f))
            .cloned()
            .unwrap_or(Value::Null);
        match counts.iter_mut().find(|(k, _)| *k == key) {
            Some((_, n)) => *n += 1,
            None => counts.push((key, 1)),
        }
    }
    counts
        .into_iter()
        .map(|(key, count)| json!({ "_id": key, "count": count }))
        .collect()
}

// ---------------------------------------------------------------------------
// History

/// History store whose every call fails
#[derive(Debug, Default)]
pub struct FailingHistoryStore;

fn unavailable() -> HistoryError {
    HistoryError::Storage("history backend unavailable".into())
}

#[async_trait]
impl HistoryStore for FailingHistoryStore {
    async fn append(&self, _turn: Turn) -> Result<TurnId, HistoryError> {
        Err(unavailable())
    }

    async fn page_for_user(&self, _user: &UserId, _limit: u64, _skip: u64) -> Result<HistoryPage, HistoryError> {
        Err(unavailable())
    }

    async fn conversation(&self, _user: &UserId, _conversation: &ConversationId) -> Result<Vec<Turn>, HistoryError> {
        Err(unavailable())
    }

    async fn recent_in_conversation(
        &self,
        _user: &UserId,
        _conversation: &ConversationId,
        _n: usize,
    ) -> Result<Vec<Turn>, HistoryError> {
        Err(unavailable())
    }

    async fn get(&self, _user: &UserId, _id: TurnId) -> Result<Option<Turn>, HistoryError> {
        Err(unavailable())
    }

    async fn delete(&self, _user: &UserId, _id: TurnId) -> Result<(), HistoryError> {
        Err(unavailable())
    }
}

// ---------------------------------------------------------------------------
// Fixtures

pub const ANALYST: &str = "Analyst";
pub const MANAGER: &str = "Manager";

/// Read-only, email and password hidden
pub fn analyst_policy() -> RolePolicy {
    RolePolicy::new(ANALYST)
        .with_grant(
            CollectionGrant::all_collections()
                .with_operations([OperationKind::Find, OperationKind::Aggregate])
                .with_restricted_fields(["email", "password"]),
        )
        .with_max_result_limit(100)
}

/// Everything, no restrictions
pub fn manager_policy() -> RolePolicy {
    RolePolicy::new(MANAGER)
        .with_grant(CollectionGrant::all_collections().with_operations(OperationKind::ALL))
        .with_max_result_limit(1000)
}

pub fn analyst_user() -> User {
    User::new("alice", "analyst").with_policy(ANALYST)
}

pub fn manager_user() -> User {
    User::new("bob", "manager").with_policy(MANAGER)
}

/// User with no assigned policy
pub fn guest_user() -> User {
    User::new("guest", "viewer")
}

/// `count` user documents with email, password and department
pub fn users_dataset(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "_id": i,
                "name": format!("user{i}"),
                "email": format!("user{i}@example.com"),
                "password": "hunter2",
                "department": if i % 2 == 0 { "sales" } else { "support" },
            })
        })
        .collect()
}
