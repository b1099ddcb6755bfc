/*!
Routes a run to the configured storage driver.
*/

use tracing::info;

use crate::config::{CacheConfig, RunMode, StorageBackend};
use crate::driver::{CacheDriver, CacheOutcome, SharedVolumeDriver};
use crate::Result;

/// Selects a driver from configuration and runs it in the configured mode
///
/// # Example
/// ```rust,no_run
/// use pipecache_core::{CacheConfig, CacheCoordinator, RunMode};
///
/// let mut config = CacheConfig::volume(RunMode::Retrieve, "/mnt/cache");
/// config.repo_name = "acme/widgets".to_string();
/// config.relative_paths = vec!["node_modules".to_string()];
///
/// let outcome = CacheCoordinator::from_config(&config)?.execute()?;
/// println!("{outcome}");
/// # Ok::<(), pipecache_core::CacheError>(())
/// ```
pub struct CacheCoordinator {
    mode: RunMode,
    driver: Box<dyn CacheDriver>,
}

impl CacheCoordinator {
    /// Validate `config` and build the driver for its backend
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        config.validate()?;

        let driver: Box<dyn CacheDriver> = match config.backend {
            StorageBackend::Volume => Box::new(SharedVolumeDriver::new(config)?),
            StorageBackend::ObjectStorage => object_storage_driver(config)?,
        };

        Ok(Self::new(config.mode, driver))
    }

    /// Use an already-built driver
    pub fn new(mode: RunMode, driver: Box<dyn CacheDriver>) -> Self {
        Self { mode, driver }
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Persist or retrieve, depending on the run mode
    pub fn execute(&self) -> Result<CacheOutcome> {
        info!(mode = %self.mode, backend = self.driver.name(), "Starting cache run");

        let outcome = match self.mode {
            RunMode::Persist => self.driver.persist_cache()?,
            RunMode::Retrieve => self.driver.retrieve_cache()?,
        };

        info!(mode = %self.mode, backend = self.driver.name(), outcome = %outcome, "Finished cache run");
        Ok(outcome)
    }
}

#[cfg(feature = "s3")]
fn object_storage_driver(config: &CacheConfig) -> Result<Box<dyn CacheDriver>> {
    use crate::driver::ObjectStorageDriver;
    use crate::store::S3ObjectStore;

    let settings = config.object_storage.as_ref().ok_or_else(|| {
        crate::CacheError::configuration("object storage backend requires S3 settings")
    })?;
    let store = S3ObjectStore::new(settings)?;
    Ok(Box::new(ObjectStorageDriver::new(config, store)))
}

#[cfg(not(feature = "s3"))]
fn object_storage_driver(_config: &CacheConfig) -> Result<Box<dyn CacheDriver>> {
    Err(crate::CacheError::configuration(
        "object storage support is not compiled in (enable the `s3` feature)",
    ))
}
