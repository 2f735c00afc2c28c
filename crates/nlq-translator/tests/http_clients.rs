//! HTTP clients against a local stub service

use axum::extract::Json;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use nlq_policy::{CollectionGrant, ProposedOperation, RolePolicy};
use nlq_translator::{
    ExecutorError, HttpClientConfig, HttpExecutor, HttpTranslator, PermissionsPayload,
    QueryExecutor, Translator, TranslatorError, TranslatorRequest,
};
use serde_json::{json, Value};
use std::time::Duration;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn request() -> TranslatorRequest {
    let policy = RolePolicy::new("Analyst").with_grant(CollectionGrant::all_collections());
    TranslatorRequest {
        query: "how many users signed up this week".to_string(),
        database: Some("shop".to_string()),
        collection: None,
        history: Vec::new(),
        permissions: PermissionsPayload::from(&policy),
        user_role: "analyst".to_string(),
        policy_name: "Analyst".to_string(),
        custom_system_prompt: None,
        visualization_hint: None,
    }
}

#[tokio::test]
async fn translate_reads_prose_wrapped_reply_and_sends_camel_case() {
    let app = Router::new().route(
        "/plan",
        post(|Json(body): Json<Value>| async move {
            format!(
                "Here you go:\n```json\n{}\n```",
                json!({
                    "type": "database",
                    "mql": {"collection": "users", "operation": "find"},
                    "explanation": format!("role={} policy={}", body["userRole"], body["policyName"]),
                })
            )
        }),
    );
    let base = serve(app).await;
    let translator = HttpTranslator::new(HttpClientConfig::new(base)).unwrap();

    let reply = translator.translate(&request()).await.unwrap();
    assert_eq!(reply.kind.as_deref(), Some("database"));
    assert_eq!(reply.explanation, r#"role="analyst" policy="Analyst""#);
    assert_eq!(reply.operation().unwrap()["collection"], "users");
}

#[tokio::test]
async fn non_success_status_is_service_error() {
    let app = Router::new().route(
        "/plan",
        post(|| async { (StatusCode::BAD_GATEWAY, "model backend down") }),
    );
    let translator = HttpTranslator::new(HttpClientConfig::new(serve(app).await)).unwrap();

    let err = translator.translate(&request()).await.unwrap_err();
    assert_eq!(
        err,
        TranslatorError::ServiceError {
            status: Some(502),
            message: "model backend down".to_string()
        }
    );
}

#[tokio::test]
async fn reported_failure_carries_message() {
    let app = Router::new().route(
        "/plan",
        post(|| async {
            Json(json!({"success": false, "explanation": "Error generating plan", "error": "rate limited"}))
        }),
    );
    let translator = HttpTranslator::new(HttpClientConfig::new(serve(app).await)).unwrap();

    let err = translator.translate(&request()).await.unwrap_err();
    assert!(matches!(err, TranslatorError::ServiceError { status: None, ref message } if message == "rate limited"));
}

#[tokio::test]
async fn slow_translator_times_out() {
    let app = Router::new().route(
        "/plan",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "{}"
        }),
    );
    let config = HttpClientConfig::new(serve(app).await).with_timeout_secs(1);
    let translator = HttpTranslator::new(config).unwrap();

    let err = translator.translate(&request()).await.unwrap_err();
    assert_eq!(err, TranslatorError::Timeout { secs: 1 });
    assert!(err.is_retryable());
}

#[tokio::test]
async fn closed_port_is_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let translator = HttpTranslator::new(HttpClientConfig::new(format!("http://{addr}"))).unwrap();
    let err = translator.translate(&request()).await.unwrap_err();
    assert!(matches!(err, TranslatorError::ConnectionRefused(_)), "got {err:?}");
}

#[tokio::test]
async fn health_reports_provider() {
    let app = Router::new().route(
        "/health",
        get(|| async {
            Json(json!({
                "status": "healthy",
                "service": "NLP",
                "llm_provider": "ollama",
                "llm_model": "llama3",
                "database": "shop"
            }))
        }),
    );
    let translator = HttpTranslator::new(HttpClientConfig::new(serve(app).await)).unwrap();

    let health = translator.health().await.unwrap();
    assert_eq!(health.llm_provider, "ollama");
    assert_eq!(health.database, "shop");
}

#[tokio::test]
async fn executor_returns_rows_and_surfaces_failures() {
    let app = Router::new().route(
        "/execute-mql",
        post(|Json(body): Json<Value>| async move {
            if body["mql"]["collection"] == "broken" {
                return Json(json!({"success": false, "explanation": "x", "error": "collection missing"}));
            }
            Json(json!({
                "success": true,
                "results": [{"n": 1}, {"n": 2}],
                "explanation": "ok",
                "metadata": {"database": body["database"]}
            }))
        }),
    );
    let executor = HttpExecutor::new(HttpClientConfig::new(serve(app).await)).unwrap();

    let output = executor
        .execute(Some("shop"), &ProposedOperation::find("users"), None)
        .await
        .unwrap();
    assert_eq!(output.results.len(), 2);
    assert_eq!(output.metadata["database"], "shop");

    let err = executor
        .execute(None, &ProposedOperation::find("broken"), None)
        .await
        .unwrap_err();
    assert_eq!(err, ExecutorError::Failed("collection missing".to_string()));
}
