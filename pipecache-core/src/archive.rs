/*!
Archive codec for cached paths.

A path is packed into a zip container with one deflate-compressed entry per
filesystem node. Entry names are relative to the archived root and use `/`
separators; directory names end in `/` and the root itself is stored as `./`.
A regular file or symlink configured directly is stored as a single entry
named `.`. Each entry carries Unix type and permission bits in its external
attributes, so a symlink is recognised by its type bits and its target is
never restored as file content.

Unpacking recreates the tree over an existing destination without cleaning
it first.
*/

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime as UtcDateTime, Datelike, Timelike, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::error::IoResultExt;
use crate::metadata::{self, NodeKind, NodeMetadata};
use crate::{CacheError, Result};

/// Entry name of a root that is not a directory
pub const ROOT_ENTRY: &str = ".";

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFREG: u32 = 0o100000;
const S_IFLNK: u32 = 0o120000;

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

/// Counts of what a pack or unpack touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    /// Regular-file payload bytes, before compression
    pub bytes: u64,
}

/// Packs cached paths into archives and unpacks them again
///
/// # Example
/// ```rust,no_run
/// use pipecache_core::ArchiveCodec;
/// use std::path::Path;
///
/// let codec = ArchiveCodec::new();
/// codec.pack(Path::new("target"), Path::new(".cache/0.zip"))?;
/// codec.unpack(Path::new(".cache/0.zip"), Path::new("target"))?;
/// # Ok::<(), pipecache_core::CacheError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ArchiveCodec {
    compression_level: i32,
}

impl ArchiveCodec {
    /// Create a codec with the default deflate level (6)
    pub fn new() -> Self {
        Self::with_level(6)
    }

    /// Create a codec with the given deflate level, capped at 9
    pub fn with_level(level: u32) -> Self {
        Self {
            compression_level: level.min(9) as i32,
        }
    }

    /// Create a codec favouring speed over size (level 1)
    pub fn fast() -> Self {
        Self::with_level(1)
    }

    /// Pack the node at `source` into a new archive at `archive_path`
    ///
    /// A directory is walked in directory-listing order and symlinks are
    /// never followed. A regular file or symlink becomes a single root
    /// entry. The first error aborts; whatever was written to
    /// `archive_path` by then is not a usable archive.
    pub fn pack(&self, source: &Path, archive_path: &Path) -> Result<ArchiveStats> {
        let root = NodeMetadata::read(source)?;
        if root.kind == NodeKind::Other {
            return Err(CacheError::archive(format!(
                "archive root {} is not a directory, regular file or symlink",
                source.display()
            )));
        }

        let file = File::create(archive_path).at(archive_path)?;
        let mut writer = ZipWriter::new(BufWriter::new(file));
        let mut stats = ArchiveStats::default();

        if root.kind == NodeKind::Directory {
            for entry in WalkDir::new(source).follow_links(false) {
                let entry = entry?;
                let path = entry.path();
                let rel_path = path.strip_prefix(source).map_err(|_| {
                    CacheError::archive(format!(
                        "{} is not inside {}",
                        path.display(),
                        source.display()
                    ))
                })?;
                let std_metadata = entry.metadata()?;
                let name = entry_name(rel_path)?;
                self.append_node(&mut writer, path, name, &std_metadata, &mut stats)?;
            }
        } else {
            let std_metadata = fs::symlink_metadata(source).at(source)?;
            self.append_node(
                &mut writer,
                source,
                ROOT_ENTRY.to_string(),
                &std_metadata,
                &mut stats,
            )?;
        }

        let mut inner = writer.finish().map_err(|e| zip_error(archive_path, e))?;
        inner.flush().at(archive_path)?;

        Ok(stats)
    }

    fn append_node<W: Write + Seek>(
        &self,
        writer: &mut ZipWriter<W>,
        path: &Path,
        name: String,
        std_metadata: &fs::Metadata,
        stats: &mut ArchiveStats,
    ) -> Result<()> {
        let node = NodeMetadata::from_std(std_metadata);
        let options = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(self.compression_level))
            .unix_permissions(node.mode)
            .last_modified_time(modified_time(std_metadata));

        match node.kind {
            NodeKind::Directory => {
                writer
                    .add_directory(format!("{name}/"), options)
                    .map_err(|e| zip_error(path, e))?;
                stats.directories += 1;
            }
            NodeKind::File => {
                let size = std_metadata.len();
                writer
                    .start_file(name.as_str(), options.large_file(size >= ZIP64_THRESHOLD))
                    .map_err(|e| zip_error(path, e))?;
                let mut source = File::open(path).at(path)?;
                let written = io::copy(&mut source, writer).at(path)?;
                stats.files += 1;
                stats.bytes += written;
            }
            NodeKind::Symlink => {
                let target = fs::read_link(path).at(path)?;
                let target = target.to_str().ok_or_else(|| {
                    CacheError::archive(format!(
                        "symlink {} has a non UTF-8 target",
                        path.display()
                    ))
                })?;
                writer
                    .add_symlink(name.as_str(), target, options)
                    .map_err(|e| zip_error(path, e))?;
                stats.symlinks += 1;
            }
            NodeKind::Other => {
                warn!(path = %path.display(), "Skipping special file while archiving");
                return Ok(());
            }
        }

        debug!(entry = %name, kind = ?node.kind, mode = node.mode, "Archived node");
        Ok(())
    }

    /// Unpack the archive at `archive_path` over `dest`
    ///
    /// Missing directories are created on demand, regular files are truncated
    /// and rewritten, and symlinks are recreated from their stored target once
    /// every regular file is in place. Directory permission bits are applied
    /// exactly after all entries are written. A root entry lands on `dest`
    /// itself. Nodes under `dest` that the archive does not mention are left
    /// alone, and the first error aborts without rolling back what was
    /// already extracted.
    pub fn unpack(&self, archive_path: &Path, dest: &Path) -> Result<ArchiveStats> {
        let file = File::open(archive_path).at(archive_path)?;
        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(archive_path, e))?;

        let mut stats = ArchiveStats::default();
        let mut directories: Vec<(PathBuf, u32)> = Vec::new();
        let mut symlinks: Vec<(PathBuf, PathBuf)> = Vec::new();

        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| zip_error(archive_path, e))?;
            let raw_name = entry.name().to_string();
            let rel_path = sanitize_entry_path(Path::new(&raw_name))?;
            let full_path = if rel_path.as_os_str().is_empty() {
                dest.to_path_buf()
            } else {
                dest.join(&rel_path)
            };

            let unix_mode = entry.unix_mode();
            let file_type = unix_mode.map(|mode| mode & S_IFMT).unwrap_or(0);
            let permissions = unix_mode.map(|mode| mode & 0o7777);

            if file_type == S_IFLNK {
                let mut target = String::new();
                entry.read_to_string(&mut target).at(archive_path)?;
                symlinks.push((full_path, PathBuf::from(target)));
            } else if file_type == S_IFDIR || entry.is_dir() {
                let mode = permissions.unwrap_or(DEFAULT_DIR_MODE);
                prepare_directory(&full_path, mode)?;
                directories.push((full_path, mode));
                stats.directories += 1;
            } else if file_type == S_IFREG || file_type == 0 {
                ensure_parent(&full_path)?;
                replace_non_directory(&full_path)?;
                let mut output = File::create(&full_path).at(&full_path)?;
                let written = io::copy(&mut entry, &mut output).at(&full_path)?;
                output.flush().at(&full_path)?;
                drop(output);
                metadata::set_mode(&full_path, permissions.unwrap_or(DEFAULT_FILE_MODE))?;
                stats.files += 1;
                stats.bytes += written;
            } else {
                warn!(
                    entry = %raw_name,
                    mode = ?unix_mode,
                    "Skipping unsupported archive entry"
                );
            }
        }

        for (link, target) in symlinks {
            ensure_parent(&link)?;
            metadata::remove_node(&link)?;
            metadata::create_symlink(&target, &link)?;
            stats.symlinks += 1;
        }

        // Deepest directories first so a read-only parent never blocks a child.
        for (dir, mode) in directories.iter().rev() {
            metadata::set_mode(dir, *mode)?;
        }

        Ok(stats)
    }
}

impl Default for ArchiveCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// `/`-separated entry name for a path relative to the archived root
fn entry_name(rel_path: &Path) -> Result<String> {
    if rel_path.as_os_str().is_empty() {
        return Ok(ROOT_ENTRY.to_string());
    }
    let parts = rel_path
        .components()
        .map(|component| {
            component.as_os_str().to_str().ok_or_else(|| {
                CacheError::archive(format!("{} is not valid UTF-8", rel_path.display()))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Reject entry names that would land outside the destination
fn sanitize_entry_path(path: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(CacheError::archive(format!(
                    "entry {} escapes the destination directory",
                    path.display()
                )));
            }
        }
    }
    Ok(clean)
}

/// Create a directory owner-writable so its children can be extracted
fn prepare_directory(path: &Path, mode: u32) -> Result<()> {
    match NodeMetadata::read(path) {
        Ok(existing) if existing.kind == NodeKind::Directory => {}
        Ok(_) => metadata::remove_node(path)?,
        Err(CacheError::Io { ref source, .. }) if source.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::create_dir_all(path).at(path)?;
    metadata::set_mode(path, mode | 0o700)
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).at(parent)
        }
        _ => Ok(()),
    }
}

/// Clear a symlink or file at `path` so writing never goes through a link
fn replace_non_directory(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(existing) if !existing.is_dir() => fs::remove_file(path).at(path),
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

fn zip_error(path: &Path, err: ZipError) -> CacheError {
    match err {
        ZipError::Io(source) => CacheError::io(path, source),
        other => CacheError::archive(format!("{}: {other}", path.display())),
    }
}

/// Modification time in the container's resolution, 1980-01-01 when unknown
fn modified_time(std_metadata: &fs::Metadata) -> DateTime {
    std_metadata
        .modified()
        .ok()
        .and_then(|time| {
            let utc: UtcDateTime<Utc> = time.into();
            DateTime::from_date_and_time(
                u16::try_from(utc.year()).ok()?,
                utc.month() as u8,
                utc.day() as u8,
                utc.hour() as u8,
                utc.minute() as u8,
                utc.second() as u8,
            )
            .ok()
        })
        .unwrap_or_default()
}
