/*!
Error types for the pipecache core engine.
*/

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type used throughout the pipecache core.
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors that can occur while persisting or retrieving a cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Invalid or contradictory configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Filesystem failures, tagged with the path they happened at
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unsupported archive contents
    #[error("Archive error: {0}")]
    Archive(String),

    /// Object-storage transport failures, including missing keys
    #[error("Backend error: {0}")]
    Backend(String),

    /// A complete cache location is missing an expected entry
    #[error("Consistency error: cache marked complete but {} is missing", path.display())]
    Consistency { path: PathBuf },

    /// Completion marker serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new backend error
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a new archive error
    pub fn archive<S: Into<String>>(msg: S) -> Self {
        Self::Archive(msg.into())
    }

    /// Create a new I/O error for `path`
    pub fn io<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl From<walkdir::Error> for CacheError {
    fn from(err: walkdir::Error) -> Self {
        let path = err.path().map(Path::to_path_buf).unwrap_or_default();
        match err.into_io_error() {
            Some(source) => Self::Io { path, source },
            None => Self::Io {
                path,
                source: std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "filesystem loop detected while walking tree",
                ),
            },
        }
    }
}

/// Attach a path to `std::io::Result` failures.
pub(crate) trait IoResultExt<T> {
    fn at<P: AsRef<Path>>(self, path: P) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at<P: AsRef<Path>>(self, path: P) -> Result<T> {
        self.map_err(|e| CacheError::io(path, e))
    }
}
