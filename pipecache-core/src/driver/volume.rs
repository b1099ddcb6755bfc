/*!
Shared-volume driver.

Entries are copied as plain trees into a persist directory on a volume that
every build host mounts:

```text
<volume root>/<repo name>[/<sha256 of version file>]/relative/<path>
                                                    /absolute/<path minus leading '/'>
                                                    /.complete
```

The completion marker is written only after every entry was copied. Retrieve
treats a directory without it as a miss, so a persist that is still running
(or died part way) is never read. Two concurrent persists to one directory
are not excluded from each other.
*/

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{CacheDriver, CacheOutcome, MissReason};
use crate::config::CacheConfig;
use crate::copier::copy_tree;
use crate::entry::CacheEntry;
use crate::error::IoResultExt;
use crate::metadata::node_exists;
use crate::version::VersionHash;
use crate::{CacheError, Result};

/// File name of the marker that flags a persist directory as complete
pub const COMPLETION_MARKER: &str = ".complete";

/// Contents of the completion marker, kept for operators
///
/// Only the marker's presence matters to retrieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    pub run_id: Uuid,
    pub completed_at: DateTime<Utc>,
    /// Path keys of the entries that were persisted
    pub entries: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SharedVolumeDriver {
    entries: Vec<CacheEntry>,
    work_dir: PathBuf,
    persist_dir: PathBuf,
}

impl SharedVolumeDriver {
    /// Resolve the persist directory for `config`
    ///
    /// The version file is hashed once here; a relative version file path
    /// resolves against the working directory.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let volume_root = config.volume_root.as_ref().ok_or_else(|| {
            CacheError::configuration("volume backend requires a volume cache root dir")
        })?;

        let mut persist_dir = volume_root.join(&config.repo_name);
        if let Some(version_file) = &config.version_file {
            let hash = VersionHash::of_file(&config.work_dir.join(version_file))?;
            info!(version_file = %version_file.display(), hash = %hash, "Scoping cache by version file");
            persist_dir.push(hash.as_str());
        }

        Ok(Self {
            entries: CacheEntry::from_config(config),
            work_dir: config.work_dir.clone(),
            persist_dir,
        })
    }

    pub fn persist_dir(&self) -> &Path {
        &self.persist_dir
    }

    pub fn marker_path(&self) -> PathBuf {
        self.persist_dir.join(COMPLETION_MARKER)
    }

    /// Read the completion marker, if the persist directory is complete
    pub fn completion_record(&self) -> Result<Option<CompletionRecord>> {
        let marker = self.marker_path();
        if !node_exists(&marker)? {
            return Ok(None);
        }
        let data = fs::read(&marker).at(&marker)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn write_marker(&self) -> Result<()> {
        let record = CompletionRecord {
            run_id: Uuid::new_v4(),
            completed_at: Utc::now(),
            entries: self.entries.iter().map(CacheEntry::path_key).collect(),
        };

        let marker = self.marker_path();
        let staging = self
            .persist_dir
            .join(format!("{COMPLETION_MARKER}.{}.tmp", record.run_id));
        fs::write(&staging, serde_json::to_vec_pretty(&record)?).at(&staging)?;
        fs::rename(&staging, &marker).at(&marker)?;

        info!(marker = %marker.display(), run_id = %record.run_id, "Marked cache complete");
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    Ok(())
}

impl CacheDriver for SharedVolumeDriver {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn persist_cache(&self) -> Result<CacheOutcome> {
        if node_exists(&self.marker_path())? {
            info!(persist_dir = %self.persist_dir.display(), "Cache already complete, skipping persist");
            return Ok(CacheOutcome::AlreadyCached);
        }
        if node_exists(&self.persist_dir)? {
            warn!(
                persist_dir = %self.persist_dir.display(),
                "Found an incomplete cache, overwriting it entry by entry"
            );
        }

        for entry in &self.entries {
            let source = entry.local_path(&self.work_dir);
            let destination = entry.cache_path(&self.persist_dir);

            info!(index = entry.index, from = %source.display(), to = %destination.display(), "Persisting cache entry");
            ensure_parent(&destination)?;
            let stats = copy_tree(&source, &destination)?;
            info!(index = entry.index, files = stats.files, bytes = stats.bytes, "Persisted cache entry");

            #[cfg(feature = "metrics")]
            if let Some(metrics) = crate::observability::CacheMetrics::global() {
                metrics.record_volume_entry_copied();
            }
        }

        fs::create_dir_all(&self.persist_dir).at(&self.persist_dir)?;
        self.write_marker()?;
        Ok(CacheOutcome::Persisted {
            entries: self.entries.len(),
        })
    }

    fn retrieve_cache(&self) -> Result<CacheOutcome> {
        if !node_exists(&self.persist_dir)? {
            info!(persist_dir = %self.persist_dir.display(), "No persisted cache, nothing to restore");
            return Ok(CacheOutcome::Miss(MissReason::NoPersistLocation));
        }
        if !node_exists(&self.marker_path())? {
            warn!(persist_dir = %self.persist_dir.display(), "Persisted cache is incomplete, nothing to restore");
            return Ok(CacheOutcome::Miss(MissReason::Incomplete));
        }

        for entry in &self.entries {
            let source = entry.cache_path(&self.persist_dir);
            if !node_exists(&source)? {
                return Err(CacheError::Consistency { path: source });
            }
            let destination = entry.local_path(&self.work_dir);

            info!(index = entry.index, from = %source.display(), to = %destination.display(), "Restoring cache entry");
            ensure_parent(&destination)?;
            let stats = copy_tree(&source, &destination)?;
            info!(index = entry.index, files = stats.files, bytes = stats.bytes, "Restored cache entry");

            #[cfg(feature = "metrics")]
            if let Some(metrics) = crate::observability::CacheMetrics::global() {
                metrics.record_volume_entry_copied();
            }
        }

        Ok(CacheOutcome::Retrieved {
            entries: self.entries.len(),
        })
    }
}
