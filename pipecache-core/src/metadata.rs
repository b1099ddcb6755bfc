/*!
Platform file-metadata accessor.

Node type, permission bits and ownership are read without following symlinks
and applied through the helpers below. Ownership only exists on Unix; on other
targets it reads as `None` and applying it is a logged no-op.
*/

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::IoResultExt;
use crate::Result;

/// Type of a filesystem node, never dereferencing symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Directory,
    File,
    Symlink,
    /// FIFOs, sockets and device nodes
    Other,
}

/// Owning user and group of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// The subset of metadata the cache preserves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMetadata {
    pub kind: NodeKind,
    /// Permission bits including setuid/setgid/sticky (`mode & 0o7777`)
    pub mode: u32,
    pub ownership: Option<Ownership>,
}

impl NodeMetadata {
    /// Read metadata for `path` without following a final symlink
    pub fn read(path: &Path) -> Result<Self> {
        let metadata = fs::symlink_metadata(path).at(path)?;
        Ok(Self::from_std(&metadata))
    }

    pub fn from_std(metadata: &fs::Metadata) -> Self {
        let file_type = metadata.file_type();
        let kind = if file_type.is_symlink() {
            NodeKind::Symlink
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else if file_type.is_file() {
            NodeKind::File
        } else {
            NodeKind::Other
        };

        Self {
            kind,
            mode: platform::mode(metadata),
            ownership: platform::ownership(metadata),
        }
    }
}

/// Apply permission bits to `path` (follows symlinks, so never call on one)
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    platform::set_mode(path, mode).at(path)
}

/// Apply ownership to `path` itself, not to a symlink's target
pub fn set_ownership(path: &Path, ownership: Option<Ownership>) -> Result<()> {
    match ownership {
        Some(owner) => platform::set_ownership(path, owner).at(path),
        None => {
            debug!(path = %path.display(), "No ownership recorded, skipping chown");
            Ok(())
        }
    }
}

/// Create `link` pointing at `target` without resolving the target
pub fn create_symlink(target: &Path, link: &Path) -> Result<()> {
    platform::symlink(target, link).at(link)
}

/// Remove whatever node is at `path`; a missing node is not an error
pub fn remove_node(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(crate::CacheError::io(path, e)),
    };

    let result = if metadata.file_type().is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    match result {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(crate::CacheError::io(path, e)),
        _ => Ok(()),
    }
}

/// Whether a node exists at `path`; dangling symlinks count as existing
pub fn node_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(crate::CacheError::io(path, e)),
    }
}

#[cfg(unix)]
mod platform {
    use super::Ownership;
    use std::fs;
    use std::io;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::Path;

    pub fn mode(metadata: &fs::Metadata) -> u32 {
        metadata.mode() & 0o7777
    }

    pub fn ownership(metadata: &fs::Metadata) -> Option<Ownership> {
        Some(Ownership {
            uid: metadata.uid(),
            gid: metadata.gid(),
        })
    }

    pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
    }

    pub fn set_ownership(path: &Path, owner: Ownership) -> io::Result<()> {
        std::os::unix::fs::lchown(path, Some(owner.uid), Some(owner.gid))
    }

    pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }
}

#[cfg(not(unix))]
mod platform {
    use super::Ownership;
    use std::fs;
    use std::io;
    use std::path::Path;

    // Only the read-only bit survives on these targets.
    pub fn mode(metadata: &fs::Metadata) -> u32 {
        if metadata.permissions().readonly() {
            0o444
        } else {
            0o644
        }
    }

    pub fn ownership(_metadata: &fs::Metadata) -> Option<Ownership> {
        None
    }

    pub fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_readonly(mode & 0o222 == 0);
        fs::set_permissions(path, permissions)
    }

    pub fn set_ownership(path: &Path, _owner: Ownership) -> io::Result<()> {
        tracing::debug!(path = %path.display(), "Ownership not supported on this platform");
        Ok(())
    }

    #[cfg(windows)]
    pub fn symlink(target: &Path, link: &Path) -> io::Result<()> {
        if target.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        }
    }

    #[cfg(not(windows))]
    pub fn symlink(_target: &Path, link: &Path) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("cannot create symlink {}", link.display()),
        ))
    }
}
