//! Versioned store over SQLite metadata and on-disk blob/cache directories

use folio_core::{
    FolioConfig, ResourceMetadata, ResourceRepository, ResourceType, SemanticVersion,
    StorageType, VersionedResource,
};
use folio_metadata::{create_sqlite_pool, run_migrations, SqliteResourceRepository};
use folio_service::{SaveRequest, VersionedStore};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

async fn open_with_repository(dir: &TempDir) -> (VersionedStore, Arc<SqliteResourceRepository>) {
    let url = format!("sqlite://{}", dir.path().join("folio.db").display());
    let pool = create_sqlite_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();

    let mut config = FolioConfig::with_data_dir(dir.path().join("data"));
    config.storage.inline_threshold = 512;
    let repository = Arc::new(SqliteResourceRepository::new(pool));
    let store = VersionedStore::open(config, repository.clone()).await.unwrap();
    (store, repository)
}

async fn open_store(dir: &TempDir) -> VersionedStore {
    open_with_repository(dir).await.0
}

fn blob_path(dir: &TempDir, record: &VersionedResource) -> std::path::PathBuf {
    dir.path()
        .join("data/blobs")
        .join(&record.content_location.as_ref().unwrap().path)
}

fn literature() -> ResourceMetadata {
    ResourceMetadata::LiteratureEntry {
        title: "Moby-Dick".to_string(),
        author: Some("Herman Melville".to_string()),
        work_id: Some("gutenberg-2701".to_string()),
    }
}

#[tokio::test]
async fn test_save_and_read_back_across_restart() {
    let dir = TempDir::new().unwrap();
    let text = "Call me Ishmael. ".repeat(200);

    {
        let store = open_store(&dir).await;
        let first = store
            .save(SaveRequest::new("moby-dick", literature()).with_content(json!({"text": "draft"})))
            .await
            .unwrap();
        assert!(first.content_inline.is_some());

        let second = store
            .save(SaveRequest::new("moby-dick", literature()).with_content(json!({"text": text})))
            .await
            .unwrap();
        let location = second.content_location.clone().unwrap();
        assert_eq!(location.storage_type, StorageType::ExternalBlob);
        assert!(location.path.starts_with("literature_entry/moby-dick/1.0.1/"));
        assert!(blob_path(&dir, &second).exists());
    }

    // New process: fresh caches, same database and directories.
    let store = open_store(&dir).await;
    let latest = store
        .get_latest_version("moby-dick", ResourceType::LiteratureEntry)
        .await
        .unwrap();
    assert_eq!(latest.record.version(), SemanticVersion::new(1, 0, 1));
    assert_eq!(latest.content, Some(json!({"text": text})));

    let first = store
        .get_version(
            "moby-dick",
            ResourceType::LiteratureEntry,
            &SemanticVersion::INITIAL,
        )
        .await
        .unwrap();
    assert_eq!(first.content, Some(json!({"text": "draft"})));
    assert!(!first.record.is_latest());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_saves_over_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(open_store(&dir).await);

    let mut handles = Vec::new();
    for i in 0..5 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store
                .save(SaveRequest::new("moby-dick", literature()).with_content(json!({"rev": i})))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let versions = store
        .list_versions("moby-dick", ResourceType::LiteratureEntry)
        .await
        .unwrap();
    assert_eq!(versions.len(), 5);
    assert_eq!(versions.iter().filter(|r| r.is_latest()).count(), 1);
}

#[tokio::test]
async fn test_prune_over_sqlite_removes_records_and_blobs() {
    let dir = TempDir::new().unwrap();
    let (store, repository) = open_with_repository(&dir).await;
    let mut saved = Vec::new();
    for rev in 0..4 {
        let text = format!("revision {rev} ").repeat(100);
        saved.push(
            store
                .save(SaveRequest::new("moby-dick", literature()).with_content(json!({"text": text})))
                .await
                .unwrap(),
        );
    }

    // Rebase 1.0.3 onto 1.0.0: 1.0.2 and 1.0.1 are no longer anyone's delta base.
    let mut rebased = repository.get(saved[3].id).await.unwrap().unwrap();
    rebased.version_info.supersedes = Some(saved[0].id);
    repository.update(&rebased).await.unwrap();

    let report = store.prune_old_versions(0, 1, false).await.unwrap();
    assert_eq!(report.total_deleted, 2);
    assert!(!blob_path(&dir, &saved[1]).exists());
    assert!(!blob_path(&dir, &saved[2]).exists());
    assert!(blob_path(&dir, &saved[0]).exists());
    assert!(blob_path(&dir, &saved[3]).exists());

    let remaining = store
        .list_versions("moby-dick", ResourceType::LiteratureEntry)
        .await
        .unwrap();
    assert_eq!(remaining.len(), 2);
}
