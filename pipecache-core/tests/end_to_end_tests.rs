/*!
End-to-end tests: persist a build tree, wipe it as a fresh checkout would,
retrieve it and compare with what was there before.
*/
#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};

use pipecache_core::driver::{MissReason, COMPLETION_MARKER};
use pipecache_core::{
    CacheConfig, CacheCoordinator, CacheOutcome, LocalObjectStore, ObjectStorageConfig,
    ObjectStorageDriver, RunMode, VersionHash,
};
use tempfile::TempDir;
use walkdir::WalkDir;

#[derive(Debug, PartialEq, Eq)]
enum Node {
    Dir(u32),
    File(u32, Vec<u8>),
    Link(PathBuf),
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Node> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap().to_path_buf();
            let meta = fs::symlink_metadata(path).unwrap();
            let mode = meta.permissions().mode() & 0o7777;
            let node = if meta.file_type().is_symlink() {
                Node::Link(fs::read_link(path).unwrap())
            } else if meta.is_dir() {
                Node::Dir(mode)
            } else {
                Node::File(mode, fs::read(path).unwrap())
            };
            (relative, node)
        })
        .collect()
}

fn build_output(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::create_dir_all(root.join("lib/x86_64")).unwrap();
    fs::write(root.join("bin/app"), b"\x7fELF fake binary").unwrap();
    fs::set_permissions(root.join("bin/app"), fs::Permissions::from_mode(0o755)).unwrap();
    fs::write(root.join("lib/x86_64/libcore.so.1"), b"shared object").unwrap();
    symlink("libcore.so.1", root.join("lib/x86_64/libcore.so")).unwrap();
    symlink("../lib", root.join("bin/lib")).unwrap();
    symlink("/nonexistent/generated", root.join("generated")).unwrap();
    fs::write(root.join("build.log"), b"ok\n").unwrap();
    fs::set_permissions(root.join("build.log"), fs::Permissions::from_mode(0o600)).unwrap();
}

fn cache_data(root: &Path) {
    fs::create_dir_all(root.join("index")).unwrap();
    fs::write(root.join("index/packages.json"), br#"{"left-pad":"1.3.0"}"#).unwrap();
    symlink("index/packages.json", root.join("latest")).unwrap();
}

struct Workspace {
    checkout: TempDir,
    system: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let workspace = Self {
            checkout: TempDir::new().unwrap(),
            system: TempDir::new().unwrap(),
        };
        build_output(&workspace.relative_root());
        cache_data(&workspace.absolute_root());
        workspace
    }

    fn relative_root(&self) -> PathBuf {
        self.checkout.path().join("build/output")
    }

    /// Stands in for `/opt/cache/data`
    fn absolute_root(&self) -> PathBuf {
        self.system.path().join("opt/cache/data")
    }

    fn configure(&self, config: &mut CacheConfig) {
        config.work_dir = self.checkout.path().to_path_buf();
        config.repo_name = "acme/widgets".to_string();
        config.relative_paths = vec!["build/output".to_string()];
        config.absolute_paths = vec![self.absolute_root().to_string_lossy().into_owned()];
    }

    fn fresh_checkout(&self) {
        fs::remove_dir_all(self.checkout.path().join("build")).unwrap();
        fs::remove_dir_all(self.system.path().join("opt")).unwrap();
    }
}

#[test]
fn test_volume_persist_then_retrieve_restores_both_paths() {
    let workspace = Workspace::new();
    let volume = TempDir::new().unwrap();
    let before_relative = snapshot(&workspace.relative_root());
    let before_absolute = snapshot(&workspace.absolute_root());

    let mut config = CacheConfig::volume(RunMode::Persist, volume.path());
    workspace.configure(&mut config);
    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Persisted { entries: 2 });
    assert!(volume
        .path()
        .join("acme/widgets")
        .join(COMPLETION_MARKER)
        .is_file());

    workspace.fresh_checkout();

    config.mode = RunMode::Retrieve;
    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Retrieved { entries: 2 });
    assert_eq!(snapshot(&workspace.relative_root()), before_relative);
    assert_eq!(snapshot(&workspace.absolute_root()), before_absolute);
}

#[test]
fn test_object_storage_persist_then_retrieve_restores_both_paths() {
    let workspace = Workspace::new();
    let bucket = TempDir::new().unwrap();
    let before_relative = snapshot(&workspace.relative_root());
    let before_absolute = snapshot(&workspace.absolute_root());

    let mut config = CacheConfig::object_storage(
        RunMode::Persist,
        ObjectStorageConfig {
            endpoint: "minio.internal:9000".to_string(),
            bucket: "build-cache".to_string(),
            root_dir: "acme/widgets".to_string(),
            ..Default::default()
        },
    );
    workspace.configure(&mut config);
    config.validate().unwrap();

    let run = |mode: RunMode| {
        let driver =
            ObjectStorageDriver::new(&config, LocalObjectStore::with_base_dir(bucket.path()));
        CacheCoordinator::new(mode, Box::new(driver)).execute()
    };

    assert_eq!(
        run(RunMode::Persist).unwrap(),
        CacheOutcome::Persisted { entries: 2 }
    );
    assert!(bucket
        .path()
        .join("acme/widgets/relative/build/output")
        .is_file());
    let absolute_key = format!(
        "acme/widgets/absolute/{}",
        workspace
            .absolute_root()
            .to_string_lossy()
            .trim_start_matches('/')
    );
    assert!(bucket.path().join(absolute_key).is_file());
    assert!(!workspace.checkout.path().join(".cache").exists());

    workspace.fresh_checkout();

    assert_eq!(
        run(RunMode::Retrieve).unwrap(),
        CacheOutcome::Retrieved { entries: 2 }
    );
    assert_eq!(snapshot(&workspace.relative_root()), before_relative);
    assert_eq!(snapshot(&workspace.absolute_root()), before_absolute);
    assert!(!workspace.checkout.path().join(".cache").exists());
}

#[test]
fn test_volume_retrieve_before_first_persist_is_a_miss() {
    let workspace = Workspace::new();
    let volume = TempDir::new().unwrap();
    let before = snapshot(&workspace.relative_root());

    let mut config = CacheConfig::volume(RunMode::Retrieve, volume.path());
    workspace.configure(&mut config);
    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();

    assert_eq!(outcome, CacheOutcome::Miss(MissReason::NoPersistLocation));
    assert_eq!(snapshot(&workspace.relative_root()), before);
    assert_eq!(fs::read_dir(volume.path()).unwrap().count(), 0);
}

#[test]
fn test_version_file_change_starts_a_new_cache() {
    let workspace = Workspace::new();
    let volume = TempDir::new().unwrap();
    fs::write(workspace.checkout.path().join("Cargo.lock"), "v1").unwrap();

    let mut config = CacheConfig::volume(RunMode::Persist, volume.path());
    workspace.configure(&mut config);
    config.version_file = Some(PathBuf::from("Cargo.lock"));
    CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();

    let v1 = VersionHash::of_file(&workspace.checkout.path().join("Cargo.lock")).unwrap();
    assert!(volume
        .path()
        .join("acme/widgets")
        .join(v1.as_str())
        .join(COMPLETION_MARKER)
        .is_file());

    fs::write(workspace.checkout.path().join("Cargo.lock"), "v2").unwrap();
    config.mode = RunMode::Retrieve;
    let outcome = CacheCoordinator::from_config(&config)
        .unwrap()
        .execute()
        .unwrap();
    assert_eq!(outcome, CacheOutcome::Miss(MissReason::NoPersistLocation));
}
