/*!
Scratch directory that stages archives for one run.

The directory is cleared and recreated on acquire and removed again when the
guard is released or dropped, so no exit path leaves it behind. The path is
fixed per working directory: two runs sharing a working directory will
clobber each other's scratch files.
*/

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::IoResultExt;
use crate::metadata;
use crate::Result;

/// Extension of staged archive files
pub const ARCHIVE_EXTENSION: &str = "zip";

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
    released: bool,
}

impl ScratchDir {
    /// Clear anything at `path` and create an empty directory there
    pub fn acquire<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        metadata::remove_node(&path)?;
        fs::create_dir_all(&path).at(&path)?;
        debug!(path = %path.display(), "Acquired scratch directory");
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staging file for the entry at `index`
    pub fn archive_path(&self, index: usize) -> PathBuf {
        self.path.join(format!("{index}.{ARCHIVE_EXTENSION}"))
    }

    /// Remove the directory, reporting failure to the caller
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        metadata::remove_node(&self.path)?;
        debug!(path = %self.path.display(), "Released scratch directory");
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = metadata::remove_node(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}
