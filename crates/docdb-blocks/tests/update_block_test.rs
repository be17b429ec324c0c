//! Update block integration tests

use docdb::memory::MemoryDatabase;
use docdb::{Selector, TableRef, WriteOperation};
use docdb_blocks::prelude::*;
use docdb_blocks::signal;
use docdb_blocks::testing::CollectingNotifier;
use serde_json::json;
use std::sync::Arc;

fn users() -> TableRef {
    TableRef::new("test", "users")
}

fn seeded() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.create_table(&users(), "id");
    db.insert(&users(), json!({"id": "a1", "email": "a@b.com", "name": "x"}))
        .unwrap();
    db.insert(&users(), json!({"id": "a2", "email": "c@d.com", "name": "w"}))
        .unwrap();
    db
}

fn config(keys: &[&str]) -> UpdateBlockConfig {
    UpdateBlockConfig {
        table: "users".into(),
        filters: keys.iter().map(|k| MatchKey::new(*k)).collect(),
        ..Default::default()
    }
}

async fn update_block(
    db: &MemoryDatabase,
    config: UpdateBlockConfig,
) -> (UpdateBlock, Arc<CollectingNotifier>) {
    let notifier = Arc::new(CollectingNotifier::new());
    let ctx = BlockContext::new("update", notifier.clone(), Arc::new(db.factory()));
    let block = UpdateBlock::configure(config, ctx).await.unwrap();
    (block, notifier)
}

#[tokio::test]
async fn test_update_by_match_key_strips_primary_key() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;

    let input = signal!({"id": "a1", "email": "a@b.com", "name": "y"});
    block.process_signals(vec![input.clone()]).await.unwrap();

    let executed = db.executed_queries();
    assert_eq!(executed.len(), 1);
    match &executed[0].selector {
        Selector::Filter(filter) => {
            assert_eq!(filter.len(), 1);
            assert_eq!(filter.get("email"), Some(&json!("a@b.com")));
        }
        other => panic!("expected a filter scan, got {:?}", other),
    }
    match &executed[0].operation {
        WriteOperation::Update(payload) => {
            let fields: Vec<_> = payload.keys().map(String::as_str).collect();
            assert_eq!(fields, vec!["email", "name"]);
        }
        other => panic!("expected an update, got {:?}", other),
    }
    assert_eq!(db.get(&users(), &json!("a1")).unwrap()["name"], json!("y"));

    // one result signal for the update, then the original batch
    let batches = notifier.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].get("replaced"), Some(&json!(1)));
    assert_eq!(batches[1], vec![input]);
}

#[tokio::test]
async fn test_primary_key_never_written() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;

    // a different id would be rejected by the server if it were sent
    block
        .process_signals(vec![signal!({"id": "zz", "email": "c@d.com", "name": "v"})])
        .await
        .unwrap();

    let result = &notifier.batches()[0][0];
    assert_eq!(result.get("errors"), Some(&json!(0)));
    assert_eq!(result.get("replaced"), Some(&json!(1)));
    assert!(db.get(&users(), &json!("a2")).is_some());
    assert!(db.get(&users(), &json!("zz")).is_none());
}

#[tokio::test]
async fn test_custom_primary_key_is_stripped_instead_of_id() {
    let db = MemoryDatabase::new();
    let accounts = TableRef::new("test", "accounts");
    db.create_table(&accounts, "email");
    db.insert(&accounts, json!({"email": "a@b.com", "id": "old", "name": "x"}))
        .unwrap();

    let mut config = config(&["email"]);
    config.table = "accounts".into();
    let (block, notifier) = update_block(&db, config).await;

    block
        .process_signals(vec![signal!({"email": "a@b.com", "id": "new", "name": "y"})])
        .await
        .unwrap();

    match &db.executed_queries()[0].operation {
        WriteOperation::Update(payload) => {
            let fields: Vec<_> = payload.keys().map(String::as_str).collect();
            assert_eq!(fields, vec!["id", "name"]);
        }
        other => panic!("expected an update, got {:?}", other),
    }
    assert_eq!(notifier.batches()[0][0].get("replaced"), Some(&json!(1)));
    let doc = db.get(&accounts, &json!("a@b.com")).unwrap();
    assert_eq!(doc["id"], json!("new"));
    assert_eq!(doc["name"], json!("y"));
}

#[tokio::test]
async fn test_missing_match_key_skips_only_that_record() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["phone"])).await;

    let input = signal!({"id": "a1", "name": "q"});
    block.process_signals(vec![input.clone()]).await.unwrap();

    assert!(db.executed_queries().is_empty());
    assert_eq!(notifier.batches(), vec![vec![input]]);
    assert_eq!(db.get(&users(), &json!("a1")).unwrap()["name"], json!("x"));
}

#[tokio::test]
async fn test_mixed_batch_keeps_order() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;

    let inputs = vec![
        signal!({"email": "a@b.com", "name": "first"}),
        signal!({"name": "no email"}),
        signal!({"email": "c@d.com", "name": "third"}),
    ];
    block.process_signals(inputs.clone()).await.unwrap();

    let batches = notifier.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[2], inputs);
    assert_eq!(db.executed_queries().len(), 2);
}

#[tokio::test]
async fn test_no_match_still_notifies_result() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;

    block
        .process_signals(vec![signal!({"email": "nobody@x.com", "name": "n"})])
        .await
        .unwrap();

    let result = &notifier.batches()[0][0];
    for field in ["deleted", "errors", "inserted", "replaced", "skipped", "unchanged"] {
        assert_eq!(result.get(field), Some(&json!(0)), "{field}");
    }
    assert!(!result.contains("changes"));
}

#[tokio::test]
async fn test_unchanged_documents_are_counted() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;

    block
        .process_signals(vec![signal!({"email": "a@b.com", "name": "x"})])
        .await
        .unwrap();

    assert_eq!(notifier.batches()[0][0].get("unchanged"), Some(&json!(1)));
}

#[tokio::test]
async fn test_multiple_match_keys() {
    let db = seeded();
    let (block, _notifier) = update_block(&db, config(&["email", "name"])).await;

    block
        .process_signals(vec![
            signal!({"email": "a@b.com", "name": "wrong", "team": "red"}),
            signal!({"email": "a@b.com", "name": "x", "team": "blue"}),
        ])
        .await
        .unwrap();

    assert_eq!(db.get(&users(), &json!("a1")).unwrap()["team"], json!("blue"));
}

#[tokio::test]
async fn test_shared_connection_outlives_batches() {
    let db = seeded();
    let (block, _notifier) = update_block(&db, config(&["email"])).await;

    for name in ["p", "q"] {
        block
            .process_signals(vec![signal!({"email": "a@b.com", "name": name})])
            .await
            .unwrap();
    }

    assert_eq!(db.connections_opened(), 1);
    assert_eq!(db.connections_closed(), 0);
    block.stop().await.unwrap();
    assert_eq!(db.connections_closed(), 1);
}

#[tokio::test]
async fn test_query_failure_aborts_batch_without_retry() {
    let db = seeded();
    let (block, notifier) = update_block(&db, config(&["email"])).await;
    db.fail_next_queries(1);

    let err = block
        .process_signals(vec![
            signal!({"email": "a@b.com", "name": "p"}),
            signal!({"email": "c@d.com", "name": "q"}),
        ])
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(db.executed_queries().is_empty());
    assert_eq!(notifier.batch_count(), 0);
}

#[tokio::test]
async fn test_table_resolved_once_at_configuration() {
    let db = seeded();
    let (block, _notifier) = update_block(&db, config(&["email"])).await;
    assert_eq!(db.table_config_lookups(), 1);

    block
        .process_signals(vec![
            signal!({"email": "a@b.com", "name": "p"}),
            signal!({"email": "c@d.com", "name": "q"}),
        ])
        .await
        .unwrap();
    assert_eq!(db.table_config_lookups(), 1);
}

#[tokio::test]
async fn test_stale_cached_primary_key_surfaces_as_update_error() {
    let db = seeded();
    let (cached_block, cached_out) = update_block(&db, config(&["id"])).await;

    let mut refresh = config(&["id"]);
    refresh.table_resolution = MetadataPolicy::Refresh;
    let (fresh_block, fresh_out) = update_block(&db, refresh).await;

    // table recreated with a different primary key while the blocks run
    db.create_table(&users(), "email");
    db.insert(&users(), json!({"email": "a@b.com", "id": "a1", "name": "x"}))
        .unwrap();

    let input = signal!({"id": "a1", "email": "new@b.com", "name": "y"});

    // cached block still strips `id` and tries to change the new primary key
    cached_block.process_signals(vec![input.clone()]).await.unwrap();
    let result = &cached_out.batches()[0][0];
    assert_eq!(result.get("errors"), Some(&json!(1)));
    assert!(result.get("first_error").is_some());
    assert_eq!(cached_out.batches()[1], vec![input.clone()]);

    fresh_block.process_signals(vec![input]).await.unwrap();
    let result = &fresh_out.batches()[0][0];
    assert_eq!(result.get("errors"), Some(&json!(0)));
    assert_eq!(result.get("replaced"), Some(&json!(1)));
    assert_eq!(
        db.get(&users(), &json!("a@b.com")).unwrap()["name"],
        json!("y")
    );
}

#[tokio::test]
async fn test_registry_creates_update_block_from_yaml() {
    let db = seeded();
    let registry = BlockRegistry::with_builtin();
    let notifier = Arc::new(CollectingNotifier::new());
    let ctx = BlockContext::new("from-yaml", notifier.clone(), Arc::new(db.factory()));

    let raw: serde_yaml::Value = serde_yaml::from_str(
        r#"
table: users
filters:
  - key: email
"#,
    )
    .unwrap();
    let block = registry.create("docdb-update", &raw, ctx).await.unwrap();
    assert_eq!(block.block_type(), "docdb-update");
    assert_eq!(block.name(), "from-yaml");

    block
        .process_signals(vec![signal!({"email": "c@d.com", "name": "z"})])
        .await
        .unwrap();
    assert_eq!(db.get(&users(), &json!("a2")).unwrap()["name"], json!("z"));
}
