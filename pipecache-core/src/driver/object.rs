/*!
Object-storage driver: one archive per entry, one object per archive.
*/

use std::path::PathBuf;

use tracing::info;

use super::{CacheDriver, CacheOutcome};
use crate::archive::ArchiveCodec;
use crate::config::CacheConfig;
use crate::entry::{object_key, CacheEntry};
use crate::scratch::ScratchDir;
use crate::store::ObjectStore;
use crate::Result;

/// Persists each entry as a compressed archive under `root/<path key>`
///
/// Entries are independent objects. A run that fails part way leaves the
/// keys it already uploaded updated and the rest untouched. On retrieve every
/// configured key must exist; a missing key fails the run.
#[derive(Debug)]
pub struct ObjectStorageDriver<S: ObjectStore> {
    entries: Vec<CacheEntry>,
    work_dir: PathBuf,
    scratch_dir: PathBuf,
    root_prefix: String,
    codec: ArchiveCodec,
    store: S,
}

impl<S: ObjectStore> ObjectStorageDriver<S> {
    pub fn new(config: &CacheConfig, store: S) -> Self {
        let codec = match config.compression_level {
            Some(level) => ArchiveCodec::with_level(level),
            None => ArchiveCodec::new(),
        };
        let root_prefix = config
            .object_storage
            .as_ref()
            .map(|settings| settings.root_dir.clone())
            .unwrap_or_default();

        Self {
            entries: CacheEntry::from_config(config),
            work_dir: config.work_dir.clone(),
            scratch_dir: config.resolved_scratch_dir(),
            root_prefix,
            codec,
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key_for(&self, entry: &CacheEntry) -> String {
        object_key(&self.root_prefix, &entry.path_key())
    }
}

impl<S: ObjectStore> CacheDriver for ObjectStorageDriver<S> {
    fn name(&self) -> &'static str {
        "object-storage"
    }

    fn persist_cache(&self) -> Result<CacheOutcome> {
        let scratch = ScratchDir::acquire(&self.scratch_dir)?;

        for entry in &self.entries {
            let local_path = entry.local_path(&self.work_dir);
            let archive_path = scratch.archive_path(entry.index);
            let key = self.key_for(entry);

            info!(index = entry.index, path = %local_path.display(), key = %key, "Archiving cache entry");
            let stats = self.codec.pack(&local_path, &archive_path)?;

            #[cfg(feature = "metrics")]
            if let Some(metrics) = crate::observability::CacheMetrics::global() {
                if let Ok(archive) = std::fs::metadata(&archive_path) {
                    metrics.record_archive_size(archive.len());
                }
            }

            self.store.put_file(&key, &archive_path)?;
            info!(
                index = entry.index,
                key = %key,
                files = stats.files,
                symlinks = stats.symlinks,
                bytes = stats.bytes,
                "Uploaded cache entry"
            );
        }

        scratch.release()?;
        Ok(CacheOutcome::Persisted {
            entries: self.entries.len(),
        })
    }

    fn retrieve_cache(&self) -> Result<CacheOutcome> {
        let scratch = ScratchDir::acquire(&self.scratch_dir)?;

        for entry in &self.entries {
            let local_path = entry.local_path(&self.work_dir);
            let archive_path = scratch.archive_path(entry.index);
            let key = self.key_for(entry);

            info!(index = entry.index, key = %key, "Downloading cache entry");
            self.store.get_file(&key, &archive_path)?;

            let stats = self.codec.unpack(&archive_path, &local_path)?;
            info!(
                index = entry.index,
                path = %local_path.display(),
                files = stats.files,
                symlinks = stats.symlinks,
                "Restored cache entry"
            );
        }

        scratch.release()?;
        Ok(CacheOutcome::Retrieved {
            entries: self.entries.len(),
        })
    }
}
