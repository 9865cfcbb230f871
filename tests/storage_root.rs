use apify_storage_local::{StorageConfig, StorageRoot};
use tempfile::tempdir;

#[test]
fn from_env_picks_up_storage_dir_override() {
    let dir = tempdir().unwrap();
    std::env::set_var("APIFY_LOCAL_STORAGE_DIR", dir.path());
    std::env::set_var("APIFY_LOCAL_STORAGE_ENABLE_WAL_MODE", "false");

    let config = StorageConfig::from_env();
    assert_eq!(config.storage_dir, dir.path());
    assert!(!config.enable_wal_mode);

    std::env::remove_var("APIFY_LOCAL_STORAGE_DIR");
    std::env::remove_var("APIFY_LOCAL_STORAGE_ENABLE_WAL_MODE");
}

#[tokio::test]
async fn datasets_kv_stores_and_queues_share_one_root() {
    let dir = tempdir().unwrap();
    let root = StorageRoot::open(StorageConfig {
        storage_dir: dir.path().to_path_buf(),
        enable_wal_mode: true,
    })
    .unwrap();

    let dataset = root.datasets().get_or_create("crawl-results").await.unwrap();
    dataset.push_item(serde_json::json!({"title": "hello"})).await.unwrap();

    let kv = root.key_value_stores().get_or_create("state").await.unwrap();
    kv.set_record("progress", b"42", "text/plain").await.unwrap();

    let rq = root.request_queues().get_or_create("frontier").await.unwrap();
    rq.add_request(
        apify_storage_local::Request {
            id: None,
            url: "https://example.com".to_string(),
            unique_key: "https://example.com".to_string(),
            method: "GET".to_string(),
            retry_count: 0,
            handled_at: None,
            extra: Default::default(),
        },
        false,
    )
    .await
    .unwrap();

    assert_eq!(dataset.get().await.unwrap().item_count, 1);
    assert_eq!(kv.get_record("progress").await.unwrap().unwrap().value, b"42");
    assert_eq!(rq.get().await.unwrap().total_request_count, 1);

    assert!(dir.path().join("datasets/crawl-results/000000000.json").exists());
    assert!(dir.path().join("key_value_stores/state/progress.txt").exists());
    assert!(dir.path().join("request_queues/frontier/db.sqlite").exists());
}
