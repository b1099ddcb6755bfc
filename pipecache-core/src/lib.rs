/*!
# pipecache core

Persist and retrieve build directories between pipeline runs.

A run is either a *persist* (after a build: save the configured paths) or a
*retrieve* (before a build: put them back). Two storage backends exist:

- **Object storage** packs each configured path into a zip archive and
  stores it under `<root>/relative/<path>` or `<root>/absolute/<path>` in an
  S3-compatible bucket.
- **Shared volume** copies each path as a plain tree into
  `<volume>/<repo>[/<version hash>]` and guards the result with a completion
  marker; a retrieve from a missing or incomplete location is a cache miss.

Both backends keep directory structure, permission bits and symlinks (never
followed). The volume backend also keeps ownership.

## Usage

```rust,no_run
use pipecache_core::{CacheConfig, CacheCoordinator, RunMode};

let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/build-cache");
config.repo_name = "acme/widgets".to_string();
config.relative_paths = vec!["build/output".to_string()];
config.absolute_paths = vec!["/opt/cache/data".to_string()];

let outcome = CacheCoordinator::from_config(&config)?.execute()?;
println!("{outcome}");
# Ok::<(), pipecache_core::CacheError>(())
```
*/

pub mod archive;
pub mod config;
pub mod coordinator;
pub mod copier;
pub mod driver;
pub mod entry;
pub mod error;
pub mod metadata;
pub mod observability;
pub mod scratch;
pub mod store;
pub mod version;


pub use archive::{ArchiveCodec, ArchiveStats};
pub use config::{CacheConfig, ObjectStorageConfig, RunMode, StorageBackend};
pub use coordinator::CacheCoordinator;
pub use copier::{copy_tree, CopyStats};
pub use driver::{
    CacheDriver, CacheOutcome, MissReason, ObjectStorageDriver, SharedVolumeDriver,
};
pub use entry::{CacheEntry, EntryKind};
pub use error::{CacheError, Result};
pub use observability::{init_logging, LogFormat};
pub use store::{LocalObjectStore, ObjectStore};
#[cfg(feature = "s3")]
pub use store::S3ObjectStore;
pub use version::VersionHash;
