//! Blocks file loading and validation tests

use docdb::memory::MemoryDatabase;
use docdb::TableRef;
use docdb_blocks::prelude::*;
use docdb_blocks::testing::CollectingNotifier;
use docdb_blocks::{signal, BlocksConfig};
use serde_json::json;
use std::sync::Arc;

const BLOCKS_YAML: &str = r#"
version: "1.0"
settings:
  log_level: debug
blocks:
  purge-users:
    block: docdb-delete
    config:
      database:
        host: ${DOCDB_BLOCKS_IT_HOST:-localhost}
        password: ${DOCDB_BLOCKS_IT_PASSWORD:-changeme}
      table: users
      filter:
        id: "{{ $user_id }}"
      enrich:
        enrich_field: delete_result
  sync-users:
    block: docdb-update
    config:
      table: users
      filters:
        - key: email
  paused:
    block: docdb-update
    enabled: false
    config:
      filters:
        - key: id
"#;

#[test]
fn test_parse_and_validate_blocks_file() {
    std::env::remove_var("DOCDB_BLOCKS_IT_HOST");
    let config = BlocksConfig::from_yaml_str(BLOCKS_YAML).unwrap();

    assert_eq!(config.settings.log_level, "debug");
    assert_eq!(config.blocks.len(), 3);
    assert_eq!(config.enabled_blocks().count(), 2);
    assert_eq!(
        config.blocks["purge-users"].config["database"]["host"].as_str(),
        Some("localhost")
    );

    config.validate(&BlockRegistry::with_builtin()).unwrap();
}

#[test]
fn test_unknown_block_type_is_rejected() {
    let yaml = r#"
blocks:
  insert-users:
    block: docdb-insert
"#;
    let config = BlocksConfig::from_yaml_str(yaml).unwrap();
    let err = config
        .validate(&BlockRegistry::with_builtin())
        .unwrap_err()
        .to_string();

    assert!(err.contains("insert-users"));
    assert!(err.contains("docdb-delete, docdb-update"));
}

#[test]
fn test_invalid_block_config_names_the_block() {
    let yaml = r#"
blocks:
  sync:
    block: docdb-update
    config:
      table: users
  purge:
    block: docdb-delete
    config:
      filter: {}
"#;
    let config = BlocksConfig::from_yaml_str(yaml).unwrap();
    let err = config
        .validate(&BlockRegistry::with_builtin())
        .unwrap_err()
        .to_string();

    // blocks are validated in name order
    assert!(err.starts_with("Block 'purge'"), "{err}");
}

#[test]
fn test_from_file() {
    let path = std::env::temp_dir().join(format!("docdb-blocks-{}.yaml", std::process::id()));
    std::fs::write(&path, BLOCKS_YAML).unwrap();

    let config = BlocksConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(config.blocks.len(), 3);
    assert!(BlocksConfig::from_file(&path).is_err());
}

#[test]
fn test_password_is_never_printed() {
    let config = BlocksConfig::from_yaml_str(BLOCKS_YAML).unwrap();
    let delete: DeleteBlockConfig =
        serde_yaml::from_value(config.blocks["purge-users"].config.clone()).unwrap();

    let password = delete.database.password.as_ref().unwrap();
    assert_eq!(password.expose_secret(), "changeme");
    assert!(!format!("{:?}", delete).contains("changeme"));
    assert!(!serde_json::to_string(&delete).unwrap().contains("changeme"));
}

#[tokio::test]
async fn test_build_enabled_blocks_from_file() {
    let db = MemoryDatabase::new();
    let users = TableRef::new("test", "users");
    db.create_table(&users, "id");
    db.insert(&users, json!({"id": "u1", "email": "a@b.com"}))
        .unwrap();
    db.insert(&users, json!({"id": "u2", "email": "c@d.com"}))
        .unwrap();

    let config = BlocksConfig::from_yaml_str(BLOCKS_YAML).unwrap();
    let registry = BlockRegistry::with_builtin();
    let notifier = Arc::new(CollectingNotifier::new());

    let mut blocks = Vec::new();
    for (name, entry) in config.enabled_blocks() {
        let ctx = BlockContext::new(name.clone(), notifier.clone(), Arc::new(db.factory()));
        blocks.push(registry.create(&entry.block, &entry.config, ctx).await.unwrap());
    }
    assert_eq!(blocks.len(), 2);

    let purge = blocks.iter().find(|b| b.name() == "purge-users").unwrap();
    purge
        .process_signals(vec![signal!({"user_id": "u1", "reason": "gdpr"})])
        .await
        .unwrap();

    assert!(db.get(&users, &json!("u1")).is_none());
    let out = &notifier.signals()[0];
    assert_eq!(out.get("reason"), Some(&json!("gdpr")));
    assert_eq!(out.get("delete_result").unwrap()["deleted"], json!(1));
}
