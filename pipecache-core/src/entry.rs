/*!
Cache entries and the storage keys derived from them.

Relative and absolute entries live in separate key namespaces
(`relative/…` and `absolute/…`) so the two can never collide.
*/

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;

pub const RELATIVE_PREFIX: &str = "relative";
pub const ABSOLUTE_PREFIX: &str = "absolute";

/// How a configured path is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Resolved against the working directory
    Relative,
    /// Used as-is
    Absolute,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Relative => f.write_str(RELATIVE_PREFIX),
            EntryKind::Absolute => f.write_str(ABSOLUTE_PREFIX),
        }
    }
}

/// One configured path to cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Position within its own configured list; names the scratch archive
    pub index: usize,
    pub kind: EntryKind,
    /// The path exactly as configured
    pub path: String,
}

impl CacheEntry {
    pub fn relative<S: Into<String>>(index: usize, path: S) -> Self {
        Self {
            index,
            kind: EntryKind::Relative,
            path: path.into(),
        }
    }

    pub fn absolute<S: Into<String>>(index: usize, path: S) -> Self {
        Self {
            index,
            kind: EntryKind::Absolute,
            path: path.into(),
        }
    }

    /// All entries of a configuration in processing order
    ///
    /// Relative paths come first, then absolute paths, each list in its
    /// configured order. Each list counts its indices from zero, so the
    /// first relative and the first absolute entry share index 0.
    pub fn from_config(config: &CacheConfig) -> Vec<CacheEntry> {
        let relative = config
            .relative_paths
            .iter()
            .enumerate()
            .map(|(index, path)| CacheEntry::relative(index, path.as_str()));
        let absolute = config
            .absolute_paths
            .iter()
            .enumerate()
            .map(|(index, path)| CacheEntry::absolute(index, path.as_str()));

        relative.chain(absolute).collect()
    }

    /// Namespaced identifier this entry is stored under
    ///
    /// Absolute paths lose exactly one leading separator; nothing else is
    /// normalized.
    pub fn path_key(&self) -> String {
        match self.kind {
            EntryKind::Relative => format!("{RELATIVE_PREFIX}/{}", self.path),
            EntryKind::Absolute => {
                let stripped = self.path.strip_prefix('/').unwrap_or(&self.path);
                format!("{ABSOLUTE_PREFIX}/{stripped}")
            }
        }
    }

    /// Live location of this entry on the build host
    pub fn local_path(&self, work_dir: &Path) -> PathBuf {
        match self.kind {
            EntryKind::Relative => work_dir.join(&self.path),
            EntryKind::Absolute => PathBuf::from(&self.path),
        }
    }

    /// Location of this entry inside a volume persist directory
    pub fn cache_path(&self, persist_dir: &Path) -> PathBuf {
        persist_dir.join(self.path_key())
    }
}

/// Full object key for a path key under the configured root prefix
pub fn object_key(root_prefix: &str, path_key: &str) -> String {
    let root = root_prefix.trim_end_matches('/');
    if root.is_empty() {
        path_key.to_string()
    } else {
        format!("{root}/{path_key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunMode;

    #[test]
    fn test_relative_path_key() {
        let entry = CacheEntry::relative(0, "build/output");
        assert_eq!(entry.path_key(), "relative/build/output");
    }

    #[test]
    fn test_absolute_path_key_strips_one_separator() {
        let entry = CacheEntry::absolute(0, "/etc/app/config");
        assert_eq!(entry.path_key(), "absolute/etc/app/config");

        let entry = CacheEntry::absolute(0, "//srv/data");
        assert_eq!(entry.path_key(), "absolute//srv/data");
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let relative = CacheEntry::relative(0, "opt/cache");
        let absolute = CacheEntry::absolute(1, "/opt/cache");
        assert_ne!(relative.path_key(), absolute.path_key());
    }

    #[test]
    fn test_from_config_orders_relative_before_absolute() {
        let mut config = CacheConfig::volume(RunMode::Persist, "/mnt/cache");
        config.relative_paths = vec!["target".to_string(), "node_modules".to_string()];
        config.absolute_paths = vec![
            "/root/.cargo/registry".to_string(),
            "/root/.rustup".to_string(),
        ];

        let entries = CacheEntry::from_config(&config);
        assert_eq!(
            entries,
            vec![
                CacheEntry::relative(0, "target"),
                CacheEntry::relative(1, "node_modules"),
                CacheEntry::absolute(0, "/root/.cargo/registry"),
                CacheEntry::absolute(1, "/root/.rustup"),
            ]
        );
    }

    #[test]
    fn test_local_and_cache_paths() {
        let relative = CacheEntry::relative(0, "build/output");
        assert_eq!(
            relative.local_path(Path::new("/workspace")),
            PathBuf::from("/workspace/build/output")
        );

        let absolute = CacheEntry::absolute(1, "/opt/cache/data");
        assert_eq!(
            absolute.local_path(Path::new("/workspace")),
            PathBuf::from("/opt/cache/data")
        );
        assert_eq!(
            absolute.cache_path(Path::new("/mnt/cache/org/repo")),
            PathBuf::from("/mnt/cache/org/repo/absolute/opt/cache/data")
        );
    }

    #[test]
    fn test_object_key() {
        assert_eq!(
            object_key("ci/cache", "relative/target"),
            "ci/cache/relative/target"
        );
        assert_eq!(object_key("ci/cache/", "relative/target"), "ci/cache/relative/target");
        assert_eq!(object_key("", "absolute/opt/data"), "absolute/opt/data");
    }
}
