//! Behaviour shared by every history backend

use chrono::{Duration, TimeZone, Utc};
use nlq_history::{
    ContextAssembler, ConversationId, HistoryError, HistoryMessage, HistoryStore,
    InMemoryHistoryStore, SqliteHistoryStore, Turn, TurnId, TurnOrigin, TurnOutcome,
};
use nlq_policy::{ProposedOperation, UserId};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

fn turn(user: &str, conversation: Option<&str>, query: &str, minute: i64) -> Turn {
    let base = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
    Turn {
        id: TurnId::new(),
        user_id: UserId::new(user),
        conversation_id: conversation.map(ConversationId::from_string),
        natural_query: query.to_string(),
        operation: Some(ProposedOperation::find("users").with_limit(10)),
        collection: "users".to_string(),
        outcome: TurnOutcome::Success,
        explanation: format!("answer to {query}"),
        result_count: 2,
        result_sample: vec![json!({"name": "a"}), json!({"name": "b"})],
        execution_time_ms: 12,
        created_at: base + Duration::minutes(minute),
        origin: TurnOrigin::Confirmed,
    }
}

fn backends() -> Vec<(&'static str, Arc<dyn HistoryStore>, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().unwrap();
    let memory: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let file: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::open(dir.path().join("history.db")).unwrap());
    let in_memory_sqlite: Arc<dyn HistoryStore> =
        Arc::new(SqliteHistoryStore::open_in_memory().unwrap());
    vec![
        ("memory", memory, None),
        ("sqlite", file, Some(dir)),
        ("sqlite-mem", in_memory_sqlite, None),
    ]
}

#[tokio::test]
async fn conversation_is_chronological_regardless_of_insert_order() {
    for (name, store, _dir) in backends() {
        // Inserted out of order
        store.append(turn("u1", Some("c1"), "T3", 3)).await.unwrap();
        store.append(turn("u1", Some("c1"), "T1", 1)).await.unwrap();
        store.append(turn("u1", Some("c1"), "T2", 2)).await.unwrap();
        store.append(turn("u1", Some("c2"), "other", 4)).await.unwrap();

        let turns = store
            .conversation(&UserId::new("u1"), &ConversationId::from_string("c1"))
            .await
            .unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.natural_query.as_str()).collect();
        assert_eq!(queries, vec!["T1", "T2", "T3"], "backend {name}");
    }
}

#[tokio::test]
async fn context_assembler_returns_last_turns_in_order() {
    for (name, store, _dir) in backends() {
        for i in 1..=7 {
            store
                .append(turn("u1", Some("c1"), &format!("T{i}"), i))
                .await
                .unwrap();
        }
        let assembler = ContextAssembler::new(store.clone()).with_max_turns(3);
        let messages = assembler
            .assemble(&UserId::new("u1"), Some(&ConversationId::from_string("c1")))
            .await
            .unwrap();

        assert_eq!(
            messages,
            vec![
                HistoryMessage::user("T5"),
                HistoryMessage::assistant("answer to T5"),
                HistoryMessage::user("T6"),
                HistoryMessage::assistant("answer to T6"),
                HistoryMessage::user("T7"),
                HistoryMessage::assistant("answer to T7"),
            ],
            "backend {name}"
        );
    }
}

#[tokio::test]
async fn context_renders_failures_and_empty_explanations() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    let mut failed = turn("u1", Some("c1"), "emails", 1);
    failed.outcome = TurnOutcome::Failure {
        error: "restricted field".to_string(),
    };
    let mut terse = turn("u1", Some("c1"), "count", 2);
    terse.explanation = String::new();
    store.append(failed).await.unwrap();
    store.append(terse).await.unwrap();

    let messages = ContextAssembler::new(store)
        .assemble(&UserId::new("u1"), Some(&ConversationId::from_string("c1")))
        .await
        .unwrap();

    assert_eq!(messages[1].content, "Error: restricted field");
    assert_eq!(messages[3].content, "Found 2 results.");
}

#[tokio::test]
async fn empty_conversation_id_is_empty_history() {
    let store: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
    store.append(turn("u1", Some(""), "q", 1)).await.unwrap();
    let assembler = ContextAssembler::new(store);

    let user = UserId::new("u1");
    assert!(assembler.assemble(&user, None).await.unwrap().is_empty());
    assert!(assembler
        .assemble(&user, Some(&ConversationId::from_string("")))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn paging_is_most_recent_first_with_has_more() {
    for (name, store, _dir) in backends() {
        for i in 0..5 {
            store.append(turn("u1", None, &format!("q{i}"), i)).await.unwrap();
        }
        store.append(turn("u2", None, "not mine", 9)).await.unwrap();
        let user = UserId::new("u1");

        let page = store.page_for_user(&user, 2, 0).await.unwrap();
        assert_eq!(page.total, 5, "backend {name}");
        assert!(page.has_more);
        let queries: Vec<_> = page.records.iter().map(|t| t.natural_query.as_str()).collect();
        assert_eq!(queries, vec!["q4", "q3"], "backend {name}");

        let last = store.page_for_user(&user, 2, 4).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert!(!last.has_more);
    }
}

#[tokio::test]
async fn deleting_twice_is_not_found_and_leaves_others() {
    for (name, store, _dir) in backends() {
        let user = UserId::new("u1");
        let keep = store.append(turn("u1", Some("c1"), "keep", 1)).await.unwrap();
        let gone = store.append(turn("u1", Some("c1"), "gone", 2)).await.unwrap();

        store.delete(&user, gone).await.unwrap();
        let second = store.delete(&user, gone).await;
        assert!(matches!(second, Err(HistoryError::NotFound(id)) if id == gone), "backend {name}");

        let remaining = store
            .conversation(&user, &ConversationId::from_string("c1"))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, keep);
    }
}

#[tokio::test]
async fn users_cannot_delete_each_others_turns() {
    for (name, store, _dir) in backends() {
        let id = store.append(turn("owner", None, "q", 1)).await.unwrap();
        let err = store.delete(&UserId::new("intruder"), id).await;
        assert!(matches!(err, Err(HistoryError::NotFound(_))), "backend {name}");
        assert!(store.get(&UserId::new("owner"), id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn sqlite_roundtrips_every_column() {
    let store = SqliteHistoryStore::open_in_memory().unwrap();
    let mut original = turn("u1", Some("c1"), "q", 1);
    original.outcome = TurnOutcome::Failure {
        error: "boom".to_string(),
    };
    original.origin = TurnOrigin::Direct;
    let id = store.append(original.clone()).await.unwrap();

    let loaded = store.get(&UserId::new("u1"), id).await.unwrap().unwrap();
    assert_eq!(loaded, original);
}

#[tokio::test]
async fn sqlite_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("history.db");
    let id = {
        let store = SqliteHistoryStore::open(&path).unwrap();
        store.append(turn("u1", None, "persisted", 1)).await.unwrap()
    };

    let reopened = SqliteHistoryStore::open(&path).unwrap();
    let loaded = reopened.get(&UserId::new("u1"), id).await.unwrap();
    assert_eq!(loaded.map(|t| t.natural_query), Some("persisted".to_string()));
}
