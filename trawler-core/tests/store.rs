use std::path::Path;

use serde_json::json;
use tempfile::TempDir;
use trawler_core::{
    EngineStore, ItemQuery, NewConfig, PoolSettings, SecretVault, StoreError, UpsertOutcome,
};

fn temp_store(dir: &Path) -> EngineStore {
    let path = dir.join("engine.sqlite");
    let store = EngineStore::builder()
        .path(&path)
        .create_if_missing(true)
        .build()
        .expect("create store");
    store.initialize().expect("initialize store");
    store
}

fn new_config(name: &str) -> NewConfig {
    serde_json::from_value(json!({
        "name": name,
        "start_urls": ["https://example.com/listing"],
        "item_selector": ".card",
        "field_mappings": {
            "title": { "selector": "h2" }
        }
    }))
    .expect("valid config payload")
}

#[test]
fn create_get_and_delete_config() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    let created = store.create_config(&new_config("jobs")).unwrap();
    assert_eq!(created.name, "jobs");
    assert_eq!(created.doc.item_selector, ".card");
    assert!(!created.cron_enabled);

    let by_name = store.get_config_by_name("jobs").unwrap().unwrap();
    assert_eq!(by_name.id, created.id);

    store.delete_config(created.id).unwrap();
    assert!(store.get_config(created.id).unwrap().is_none());
    assert!(matches!(
        store.delete_config(created.id),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn duplicate_config_name_is_rejected() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    store.create_config(&new_config("jobs")).unwrap();
    let err = store.create_config(&new_config("jobs")).unwrap_err();
    assert!(matches!(err, StoreError::DuplicateName(name) if name == "jobs"));
}

#[test]
fn config_validation_rejects_bad_payloads() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    // No field mappings.
    let empty_mappings: NewConfig = serde_json::from_value(json!({
        "name": "broken",
        "start_urls": ["https://example.com"],
        "item_selector": ".card",
        "field_mappings": {}
    }))
    .unwrap();
    assert!(matches!(
        store.create_config(&empty_mappings),
        Err(StoreError::Validation(_))
    ));

    // Attribute extraction without an attribute name.
    let missing_attribute: NewConfig = serde_json::from_value(json!({
        "name": "broken",
        "start_urls": ["https://example.com"],
        "item_selector": ".card",
        "field_mappings": {
            "link": { "selector": "a", "extract_from": "attribute" }
        }
    }))
    .unwrap();
    assert!(matches!(
        store.create_config(&missing_attribute),
        Err(StoreError::Validation(_))
    ));

    // Unparseable cron expression.
    let mut bad_cron = new_config("broken");
    bad_cron.cron_schedule = Some("not a schedule".into());
    assert!(matches!(
        store.create_config(&bad_cron),
        Err(StoreError::Validation(_))
    ));

    // Enabled trigger without a schedule.
    let mut enabled_without_schedule = new_config("broken");
    enabled_without_schedule.cron_enabled = true;
    assert!(matches!(
        store.create_config(&enabled_without_schedule),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn update_config_replaces_doc_and_schedule() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let created = store.create_config(&new_config("jobs")).unwrap();

    let mut updated = new_config("jobs");
    updated.doc.item_selector = ".row".into();
    updated.cron_schedule = Some("*/5 * * * *".into());
    updated.cron_enabled = true;
    let stored = store.update_config(created.id, &updated).unwrap();
    assert_eq!(stored.doc.item_selector, ".row");
    assert!(stored.cron_enabled);

    let scheduled = store.list_scheduled_configs().unwrap();
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].id, created.id);
}

#[test]
fn upsert_items_is_idempotent_per_url() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let config = store.create_config(&new_config("jobs")).unwrap();

    let first = vec![
        ("https://example.com/a".to_string(), json!({"title": "one"})),
        ("https://example.com/b".to_string(), json!({"title": "two"})),
    ];
    assert_eq!(
        store.upsert_items(config.id, &first).unwrap(),
        UpsertOutcome {
            written: 2,
            failed: 0
        }
    );

    // Same URL again: row count stays flat, data is replaced.
    let again = vec![(
        "https://example.com/a".to_string(),
        json!({"title": "one, revised"}),
    )];
    store.upsert_items(config.id, &again).unwrap();
    assert_eq!(store.count_items(config.id).unwrap(), 2);

    let page = store
        .list_items(&ItemQuery {
            config_id: Some(config.id),
            newest_first: false,
            ..ItemQuery::default()
        })
        .unwrap();
    let revised = page
        .items
        .iter()
        .find(|item| item.url == "https://example.com/a")
        .unwrap();
    assert_eq!(revised.data["title"], "one, revised");
}

#[test]
fn upsert_counts_failed_rows_without_dropping_the_batch() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let config = store.create_config(&new_config("jobs")).unwrap();

    // A batch pointed at a configuration that does not exist trips the
    // foreign key per row; the call still reports instead of erroring.
    let batch = vec![
        ("https://example.com/a".to_string(), json!({"title": "one"})),
        ("https://example.com/b".to_string(), json!({"title": "two"})),
    ];
    assert_eq!(
        store.upsert_items(config.id + 100, &batch).unwrap(),
        UpsertOutcome {
            written: 0,
            failed: 2
        }
    );

    // With a valid configuration the same batch lands in full.
    assert_eq!(
        store.upsert_items(config.id, &batch).unwrap(),
        UpsertOutcome {
            written: 2,
            failed: 0
        }
    );
    assert_eq!(store.count_items(config.id).unwrap(), 2);
}

#[test]
fn item_listing_paginates_and_validates() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let config = store.create_config(&new_config("jobs")).unwrap();

    let batch: Vec<(String, serde_json::Value)> = (0..7)
        .map(|n| (format!("https://example.com/item-{n}"), json!({"n": n})))
        .collect();
    store.upsert_items(config.id, &batch).unwrap();

    let page = store
        .list_items(&ItemQuery {
            config_id: Some(config.id),
            page: 2,
            limit: 3,
            newest_first: true,
        })
        .unwrap();
    assert_eq!(page.total_items, 7);
    assert_eq!(page.total_pages, 3);
    assert_eq!(page.items.len(), 3);
    assert_eq!(page.page, 2);

    let bad_page = ItemQuery {
        page: 0,
        ..ItemQuery::default()
    };
    assert!(matches!(
        store.list_items(&bad_page),
        Err(StoreError::Validation(_))
    ));

    let oversized = ItemQuery {
        limit: 500,
        ..ItemQuery::default()
    };
    assert!(matches!(
        store.list_items(&oversized),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn accounts_round_trip_without_exposing_secrets() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());
    let vault = SecretVault::new([7u8; 32]);

    let account = store
        .add_account(&vault, "example-site", "scraper-bot", "hunter2")
        .unwrap();
    assert_eq!(account.platform, "example-site");

    let listed = store.list_accounts().unwrap();
    assert_eq!(listed.len(), 1);
    // The account type has no secret field; round-trip goes through the vault.
    assert_eq!(store.account_secret(&vault, account.id).unwrap(), "hunter2");

    let other_vault = SecretVault::new([9u8; 32]);
    assert!(store.account_secret(&other_vault, account.id).is_err());

    assert!(matches!(
        store.add_account(&vault, "", "user", "pw"),
        Err(StoreError::Validation(_))
    ));
}

#[test]
fn pool_settings_default_then_persist() {
    let dir = TempDir::new().unwrap();
    let store = temp_store(dir.path());

    assert_eq!(store.load_pool_settings().unwrap(), PoolSettings::default());

    let custom = PoolSettings {
        max_pool_size: 8,
        min_pool_size: 1,
        idle_timeout_ms: 120_000,
        retry_limit: 5,
    };
    store.save_pool_settings(&custom).unwrap();
    assert_eq!(store.load_pool_settings().unwrap(), custom);

    let invalid = PoolSettings {
        max_pool_size: 1,
        min_pool_size: 4,
        ..custom
    };
    assert!(matches!(
        store.save_pool_settings(&invalid),
        Err(StoreError::Validation(_))
    ));
}
