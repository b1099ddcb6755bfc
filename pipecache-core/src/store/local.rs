/*!
Directory-backed object store.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ObjectStore;
use crate::error::IoResultExt;
use crate::{CacheError, Result};

/// Object store that keeps each key as a file under a base directory
///
/// Useful when the "bucket" is a mounted filesystem, and for exercising the
/// object-storage driver without a network service.
///
/// # Example
/// ```rust
/// use pipecache_core::store::{LocalObjectStore, ObjectStore};
/// # let temp_dir = tempfile::TempDir::new()?;
/// # let archive = temp_dir.path().join("0.zip");
/// # std::fs::write(&archive, b"archive")?;
///
/// let store = LocalObjectStore::with_base_dir(temp_dir.path().join("bucket"));
/// // Stored at "<base>/cache/relative/target"
/// store.put_file("cache/relative/target", &archive)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    base_dir: PathBuf,
}

impl LocalObjectStore {
    /// Create a store rooted at `base_dir`; the directory is created lazily
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve_key(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        Ok(())
    }
}

impl ObjectStore for LocalObjectStore {
    fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        let object_path = self.resolve_key(key);
        self.ensure_parent_dir(&object_path)?;

        let size = fs::copy(source, &object_path).at(&object_path)?;
        debug!(key = %key, path = %object_path.display(), size, "Stored object");
        Ok(())
    }

    fn get_file(&self, key: &str, destination: &Path) -> Result<()> {
        let object_path = self.resolve_key(key);
        if !object_path.is_file() {
            return Err(CacheError::backend(format!(
                "object '{key}' not found under {}",
                self.base_dir.display()
            )));
        }

        let size = fs::copy(&object_path, destination).at(destination)?;
        debug!(key = %key, path = %object_path.display(), size, "Fetched object");
        Ok(())
    }
}
