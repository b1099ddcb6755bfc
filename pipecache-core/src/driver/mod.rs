/*!
Storage drivers.

A driver implements persisting and retrieving the configured entries for one
kind of storage. New backends are added as new `CacheDriver` implementations;
the coordinator never branches on backend type beyond choosing the driver.
*/

pub mod object;
pub mod volume;

use std::fmt;

use crate::Result;

pub use object::ObjectStorageDriver;
pub use volume::{CompletionRecord, SharedVolumeDriver, COMPLETION_MARKER};

/// Why a retrieve found nothing to restore
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    /// The persist location does not exist yet
    NoPersistLocation,
    /// The persist location exists but has no completion marker
    Incomplete,
}

/// Result of a successful persist or retrieve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Every entry was written to storage
    Persisted { entries: usize },
    /// The persist location was already complete; nothing was copied
    AlreadyCached,
    /// Every entry was restored from storage
    Retrieved { entries: usize },
    /// Nothing to restore; the filesystem was left untouched
    Miss(MissReason),
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::Persisted { entries } => write!(f, "persisted {entries} entries"),
            CacheOutcome::AlreadyCached => f.write_str("already cached, nothing persisted"),
            CacheOutcome::Retrieved { entries } => write!(f, "retrieved {entries} entries"),
            CacheOutcome::Miss(MissReason::NoPersistLocation) => {
                f.write_str("cache miss: no persisted cache")
            }
            CacheOutcome::Miss(MissReason::Incomplete) => {
                f.write_str("cache miss: persisted cache is incomplete")
            }
        }
    }
}

/// Persist/retrieve contract every storage backend provides
pub trait CacheDriver {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Save every configured entry to storage
    fn persist_cache(&self) -> Result<CacheOutcome>;

    /// Restore every configured entry from storage
    fn retrieve_cache(&self) -> Result<CacheOutcome>;
}

impl<T: CacheDriver + ?Sized> CacheDriver for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn persist_cache(&self) -> Result<CacheOutcome> {
        (**self).persist_cache()
    }

    fn retrieve_cache(&self) -> Result<CacheOutcome> {
        (**self).retrieve_cache()
    }
}
