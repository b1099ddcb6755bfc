//! Configuration module for run mode, backend selection and cache paths
//!
//! This module provides the configuration structures consumed by the
//! coordinator and the storage drivers. Loading the values (environment,
//! command line) is left to the caller; `validate` enforces the rules every
//! run depends on.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::{CacheError, Result};

/// Default scratch directory, resolved against the working directory
pub const DEFAULT_SCRATCH_DIR: &str = ".cache";

/// Default region handed to S3-compatible endpoints that ignore it
pub const DEFAULT_REGION: &str = "us-east-1";

/// Whether this run saves the cache or restores it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Save the configured paths into storage (after a build)
    Persist,
    /// Restore the configured paths from storage (before a build)
    Retrieve,
}

impl RunMode {
    /// Resolve the mode from the legacy `refresh` / `restore` flag pair
    ///
    /// Exactly one of the two flags must be set.
    pub fn from_flags(refresh: bool, restore: bool) -> Result<Self> {
        match (refresh, restore) {
            (true, false) => Ok(RunMode::Persist),
            (false, true) => Ok(RunMode::Retrieve),
            (true, true) => Err(CacheError::configuration(
                "restore and refresh are exclusive",
            )),
            (false, false) => Err(CacheError::configuration(
                "plugin must run either in restore or refresh mode",
            )),
        }
    }
}

impl FromStr for RunMode {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "persist" => Ok(RunMode::Persist),
            "retrieve" => Ok(RunMode::Retrieve),
            other => Err(CacheError::configuration(format!(
                "unknown run mode '{other}', expected 'persist' or 'retrieve'"
            ))),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Persist => f.write_str("persist"),
            RunMode::Retrieve => f.write_str("retrieve"),
        }
    }
}

/// Enumeration of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Remote object storage (S3 API)
    ObjectStorage,
    /// Shared filesystem volume
    Volume,
}

impl FromStr for StorageBackend {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "s3" | "object" | "objectstorage" => Ok(StorageBackend::ObjectStorage),
            "volume" => Ok(StorageBackend::Volume),
            other => Err(CacheError::configuration(format!(
                "unknown storage type '{other}', expected 's3' or 'volume'"
            ))),
        }
    }
}

/// Connection settings for the object-storage backend
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Endpoint host (`host:port`) or full URL
    pub endpoint: String,
    /// Bucket holding the cache objects
    pub bucket: String,
    /// Key prefix every object is stored under
    pub root_dir: String,
    /// Region, defaults to `us-east-1`
    pub region: Option<String>,
    /// Static access key; the default AWS provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Talk plain HTTP instead of HTTPS
    pub insecure: bool,
}

impl ObjectStorageConfig {
    /// Endpoint as a URL, adding the scheme when only `host:port` was given
    pub fn endpoint_url(&self) -> String {
        if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else if self.insecure {
            format!("http://{}", self.endpoint)
        } else {
            format!("https://{}", self.endpoint)
        }
    }

    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }
}

impl fmt::Debug for ObjectStorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorageConfig")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("root_dir", &self.root_dir)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("insecure", &self.insecure)
            .finish()
    }
}

/// Complete configuration for one cache run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub mode: RunMode,
    pub backend: StorageBackend,
    /// Paths resolved against `work_dir`, stored under `relative/`
    pub relative_paths: Vec<String>,
    /// Paths with a leading separator, stored under `absolute/`
    pub absolute_paths: Vec<String>,
    /// Directory relative entries and the scratch directory resolve against
    pub work_dir: PathBuf,
    /// Staging area for archives, relative to `work_dir` unless absolute
    pub scratch_dir: PathBuf,
    /// Repository name scoping the volume persist location
    pub repo_name: String,
    /// File whose content hash further scopes the volume persist location
    pub version_file: Option<PathBuf>,
    /// Root of the shared volume (volume backend)
    pub volume_root: Option<PathBuf>,
    /// Object-storage settings (object-storage backend)
    pub object_storage: Option<ObjectStorageConfig>,
    /// Deflate level 0-9 for archives
    pub compression_level: Option<u32>,
}

impl CacheConfig {
    /// Create a configuration with no paths and no backend settings
    pub fn new(mode: RunMode, backend: StorageBackend) -> Self {
        CacheConfig {
            mode,
            backend,
            relative_paths: Vec::new(),
            absolute_paths: Vec::new(),
            work_dir: PathBuf::from("."),
            scratch_dir: PathBuf::from(DEFAULT_SCRATCH_DIR),
            repo_name: String::new(),
            version_file: None,
            volume_root: None,
            object_storage: None,
            compression_level: None,
        }
    }

    /// Create a volume-backed configuration rooted at `volume_root`
    pub fn volume<P: AsRef<Path>>(mode: RunMode, volume_root: P) -> Self {
        let mut config = Self::new(mode, StorageBackend::Volume);
        config.volume_root = Some(volume_root.as_ref().to_path_buf());
        config
    }

    /// Create an object-storage configuration
    pub fn object_storage(mode: RunMode, object_storage: ObjectStorageConfig) -> Self {
        let mut config = Self::new(mode, StorageBackend::ObjectStorage);
        config.object_storage = Some(object_storage);
        config
    }

    /// Scratch directory resolved against the working directory
    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.work_dir.join(&self.scratch_dir)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            StorageBackend::Volume => {
                let root = self.volume_root.as_ref().ok_or_else(|| {
                    CacheError::configuration("volume backend requires a volume cache root dir")
                })?;
                if root.as_os_str().is_empty() {
                    return Err(CacheError::configuration(
                        "volume backend requires a volume cache root dir",
                    ));
                }
            }
            StorageBackend::ObjectStorage => {
                let object = self.object_storage.as_ref().ok_or_else(|| {
                    CacheError::configuration("object storage backend requires S3 settings")
                })?;
                if object.endpoint.is_empty() {
                    return Err(CacheError::configuration(
                        "object storage backend requires an endpoint",
                    ));
                }
                if object.bucket.is_empty() {
                    return Err(CacheError::configuration(
                        "object storage backend requires a valid bucket name",
                    ));
                }
            }
        }

        if let Some(level) = self.compression_level {
            if level > 9 {
                return Err(CacheError::configuration(format!(
                    "compression level {level} out of range 0-9"
                )));
            }
        }

        for path in &self.relative_paths {
            validate_relative_path(path)?;
        }
        for path in &self.absolute_paths {
            validate_absolute_path(path)?;
        }
        Ok(())
    }
}

fn validate_relative_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(CacheError::configuration("empty relative cache path"));
    }
    let as_path = Path::new(path);
    if path.starts_with('/') || as_path.is_absolute() {
        return Err(CacheError::configuration(format!(
            "relative cache path '{path}' must not be absolute"
        )));
    }
    if as_path.components().any(|c| c == Component::ParentDir) {
        return Err(CacheError::configuration(format!(
            "relative cache path '{path}' must not contain '..'"
        )));
    }
    Ok(())
}

fn validate_absolute_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(CacheError::configuration(format!(
            "absolute cache path '{path}' must start with '/'"
        )));
    }
    if path.len() == 1 {
        return Err(CacheError::configuration("the filesystem root cannot be cached"));
    }
    if Path::new(path).components().any(|c| c == Component::ParentDir) {
        return Err(CacheError::configuration(format!(
            "absolute cache path '{path}' must not contain '..'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object_settings() -> ObjectStorageConfig {
        ObjectStorageConfig {
            endpoint: "minio.internal:9000".to_string(),
            bucket: "build-cache".to_string(),
            root_dir: "ci".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_run_mode_from_str() {
        assert_eq!("persist".parse::<RunMode>().unwrap(), RunMode::Persist);
        assert_eq!("Retrieve".parse::<RunMode>().unwrap(), RunMode::Retrieve);
        assert!(matches!(
            "rebuild".parse::<RunMode>(),
            Err(CacheError::Configuration(_))
        ));
    }

    #[test]
    fn test_run_mode_from_flags() {
        assert_eq!(RunMode::from_flags(true, false).unwrap(), RunMode::Persist);
        assert_eq!(RunMode::from_flags(false, true).unwrap(), RunMode::Retrieve);

        let both = RunMode::from_flags(true, true).unwrap_err();
        assert!(both.to_string().contains("exclusive"));

        let neither = RunMode::from_flags(false, false).unwrap_err();
        assert!(matches!(neither, CacheError::Configuration(_)));
    }

    #[test]
    fn test_storage_backend_from_str() {
        assert_eq!(
            "s3".parse::<StorageBackend>().unwrap(),
            StorageBackend::ObjectStorage
        );
        assert_eq!(
            "volume".parse::<StorageBackend>().unwrap(),
            StorageBackend::Volume
        );
        assert!("gcs".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_validate_volume_config() {
        let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/cache");
        assert!(config.validate().is_ok());

        config.volume_root = None;
        assert!(config.validate().is_err());

        config.volume_root = Some(PathBuf::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_object_storage_config() {
        let mut config = CacheConfig::object_storage(RunMode::Retrieve, object_settings());
        assert!(config.validate().is_ok());

        config.object_storage.as_mut().unwrap().bucket.clear();
        assert!(config.validate().is_err());

        config.object_storage = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_cache_paths() {
        let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/cache");
        config.relative_paths = vec!["build/output".to_string(), "node_modules".to_string()];
        config.absolute_paths = vec!["/opt/cache/data".to_string()];
        assert!(config.validate().is_ok());

        config.relative_paths = vec!["/build".to_string()];
        assert!(config.validate().is_err());

        config.relative_paths = vec!["../outside".to_string()];
        assert!(config.validate().is_err());

        config.relative_paths.clear();
        config.absolute_paths = vec!["opt/cache".to_string()];
        assert!(config.validate().is_err());

        config.absolute_paths = vec!["/".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_compression_level() {
        let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/cache");
        config.compression_level = Some(9);
        assert!(config.validate().is_ok());

        config.compression_level = Some(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_url() {
        let mut settings = object_settings();
        assert_eq!(settings.endpoint_url(), "https://minio.internal:9000");

        settings.insecure = true;
        assert_eq!(settings.endpoint_url(), "http://minio.internal:9000");

        settings.endpoint = "http://localhost:4566".to_string();
        assert_eq!(settings.endpoint_url(), "http://localhost:4566");
        assert_eq!(settings.region_or_default(), DEFAULT_REGION);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let mut settings = object_settings();
        settings.secret_access_key = Some("hunter2".to_string());

        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_resolved_scratch_dir() {
        let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/cache");
        config.work_dir = PathBuf::from("/workspace");
        assert_eq!(
            config.resolved_scratch_dir(),
            PathBuf::from("/workspace/.cache")
        );
    }
}
