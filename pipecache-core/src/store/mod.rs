/*!
Object-storage transport.

An object store moves whole files to and from opaque keys. It knows nothing
about cache entries or archives; the object-storage driver decides what gets
uploaded under which key.
*/

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

use std::path::Path;

use crate::Result;

pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// Blocking put/get of files by key
pub trait ObjectStore {
    /// Upload the file at `source` under `key`, replacing any existing object
    fn put_file(&self, key: &str, source: &Path) -> Result<()>;

    /// Download `key` into a new file at `destination`
    ///
    /// A missing key is an error; callers never treat it as a cache miss.
    fn get_file(&self, key: &str, destination: &Path) -> Result<()>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for Box<T> {
    fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        (**self).put_file(key, source)
    }

    fn get_file(&self, key: &str, destination: &Path) -> Result<()> {
        (**self).get_file(key, destination)
    }
}

/// In-memory object store for unit tests
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: std::sync::Arc<std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }
}

#[cfg(test)]
impl ObjectStore for MemoryStore {
    fn put_file(&self, key: &str, source: &Path) -> Result<()> {
        use crate::error::IoResultExt;

        let data = std::fs::read(source).at(source)?;
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }

    fn get_file(&self, key: &str, destination: &Path) -> Result<()> {
        use crate::error::IoResultExt;

        let objects = self.objects.lock().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| crate::CacheError::backend(format!("object '{key}' not found")))?;
        std::fs::write(destination, data).at(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_put_get() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("0.zip");
        std::fs::write(&source, b"archive bytes").unwrap();

        let store = MemoryStore::new();
        store.put_file("cache/relative/target", &source).unwrap();

        let destination = temp_dir.path().join("download");
        store.get_file("cache/relative/target", &destination).unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"archive bytes");
        assert_eq!(store.keys(), vec!["cache/relative/target".to_string()]);
    }

    #[test]
    fn test_boxed_store_delegates() {
        let temp_dir = TempDir::new().unwrap();
        let memory = MemoryStore::new();
        let boxed: Box<dyn ObjectStore> = Box::new(memory.clone());

        let result = boxed.get_file("missing", &temp_dir.path().join("out"));
        assert!(matches!(result, Err(crate::CacheError::Backend(_))));

        let source = temp_dir.path().join("in");
        std::fs::write(&source, b"x").unwrap();
        boxed.put_file("present", &source).unwrap();
        assert!(memory.contains("present"));
    }
}
