/*!
Recursive tree copy that keeps node type, permission bits and ownership.
*/

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tracing::debug;

use crate::error::IoResultExt;
use crate::metadata::{self, NodeKind, NodeMetadata};
use crate::Result;

/// Counts of nodes created by a copy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Copy `src` to `dest`, replacing anything already at `dest`
///
/// Symlinks are recreated with their literal target. Ownership is applied to
/// each node after it exists; a directory gets its exact permission bits once
/// its children are in place. The first error aborts and leaves a partial
/// tree at `dest` for the caller to clean up.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<CopyStats> {
    let mut stats = CopyStats::default();
    copy_node(src, dest, &mut stats)?;
    Ok(stats)
}

fn copy_node(src: &Path, dest: &Path, stats: &mut CopyStats) -> Result<()> {
    metadata::remove_node(dest)?;
    let node = NodeMetadata::read(src)?;

    match node.kind {
        NodeKind::Directory => {
            fs::create_dir_all(dest).at(dest)?;
            metadata::set_mode(dest, node.mode | 0o700)?;

            for child in fs::read_dir(src).at(src)? {
                let child = child.at(src)?;
                let name = child.file_name();
                copy_node(&src.join(&name), &dest.join(&name), stats)?;
            }

            metadata::set_mode(dest, node.mode)?;
            stats.directories += 1;
        }
        NodeKind::Symlink => {
            let target = fs::read_link(src).at(src)?;
            metadata::create_symlink(&target, dest)?;
            stats.symlinks += 1;
        }
        NodeKind::File | NodeKind::Other => {
            stats.bytes += copy_contents(src, dest)?;
            metadata::set_mode(dest, node.mode)?;
            stats.files += 1;
        }
    }

    metadata::set_ownership(dest, node.ownership)?;
    // chown clears setuid/setgid on regular files
    if node.kind != NodeKind::Symlink && node.mode & 0o6000 != 0 {
        metadata::set_mode(dest, node.mode)?;
    }
    debug!(src = %src.display(), dest = %dest.display(), kind = ?node.kind, "Copied node");
    Ok(())
}

fn copy_contents(src: &Path, dest: &Path) -> Result<u64> {
    let mut input = File::open(src).at(src)?;
    let mut output = File::create(dest).at(dest)?;
    let written = io::copy(&mut input, &mut output).at(dest)?;
    output.flush().at(dest)?;
    Ok(written)
}
