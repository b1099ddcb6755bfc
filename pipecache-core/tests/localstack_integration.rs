/*!
LocalStack integration tests for the S3 object store.

LocalStack must be listening on localhost:4566:
```bash
docker run --rm -p 4566:4566 localstack/localstack
awslocal s3 mb s3://pipecache-test-bucket
```

Then run:
```bash
RUN_LOCALSTACK_TESTS=1 cargo test -p pipecache-core --features s3,metrics localstack
```
*/
#![cfg(all(feature = "s3", unix))]

use std::fs;
use std::os::unix::fs::symlink;

use pipecache_core::{
    CacheConfig, CacheCoordinator, CacheError, CacheOutcome, ObjectStorageConfig, ObjectStore,
    RunMode, S3ObjectStore,
};
use tempfile::TempDir;

const BUCKET: &str = "pipecache-test-bucket";

fn localstack_available() -> bool {
    std::env::var("RUN_LOCALSTACK_TESTS").unwrap_or_default() == "1"
}

fn localstack_settings(bucket: &str) -> ObjectStorageConfig {
    ObjectStorageConfig {
        endpoint: "localhost:4566".to_string(),
        bucket: bucket.to_string(),
        root_dir: format!("it/{}", uuid::Uuid::new_v4()),
        region: Some("us-east-1".to_string()),
        access_key_id: Some("test".to_string()),
        secret_access_key: Some("test".to_string()),
        insecure: true,
    }
}

#[test]
fn test_localstack_store_put_get() {
    if !localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("0.zip");
    fs::write(&source, b"not really an archive").unwrap();

    let settings = localstack_settings(BUCKET);
    let store = S3ObjectStore::new(&settings).unwrap();
    let key = format!("{}/relative/target", settings.root_dir);

    store.put_file(&key, &source).unwrap();
    let destination = temp_dir.path().join("download");
    store.get_file(&key, &destination).unwrap();

    assert_eq!(fs::read(&destination).unwrap(), b"not really an archive");
}

#[test]
fn test_localstack_missing_key_is_backend_error() {
    if !localstack_available() {
        println!("Skipping LocalStack missing-key test");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let settings = localstack_settings(BUCKET);
    let store = S3ObjectStore::new(&settings).unwrap();

    let result = store.get_file(
        &format!("{}/relative/never-persisted", settings.root_dir),
        &temp_dir.path().join("download"),
    );
    match result {
        Err(CacheError::Backend(msg)) => assert!(msg.contains("not found")),
        other => panic!("expected backend error, got {other:?}"),
    }
}

#[test]
fn test_localstack_missing_bucket_fails() {
    if !localstack_available() {
        println!("Skipping LocalStack missing-bucket test");
        return;
    }

    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("archive");
    fs::write(&source, b"data").unwrap();

    let store = S3ObjectStore::new(&localstack_settings("nonexistent-bucket-12345")).unwrap();
    let result = store.put_file("relative/target", &source);
    assert!(matches!(result, Err(CacheError::Backend(_))));
}

#[test]
fn test_localstack_persist_then_retrieve() {
    if !localstack_available() {
        println!("Skipping LocalStack round-trip test");
        return;
    }

    let work = TempDir::new().unwrap();
    let target = work.path().join("target");
    fs::create_dir_all(target.join("release")).unwrap();
    fs::write(target.join("release/app"), b"binary").unwrap();
    symlink("release/app", target.join("app")).unwrap();

    let mut config = CacheConfig::object_storage(RunMode::Persist, localstack_settings(BUCKET));
    config.work_dir = work.path().to_path_buf();
    config.relative_paths = vec!["target".to_string()];

    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Persisted { entries: 1 });

    fs::remove_dir_all(&target).unwrap();

    config.mode = RunMode::Retrieve;
    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Retrieved { entries: 1 });
    assert_eq!(fs::read(target.join("release/app")).unwrap(), b"binary");
    assert_eq!(
        fs::read_link(target.join("app")).unwrap(),
        std::path::Path::new("release/app")
    );

    #[cfg(feature = "metrics")]
    {
        let metrics = pipecache_core::observability::gather_metrics().unwrap();
        assert!(metrics.contains("pipecache_object_uploads_total"));
    }
}
