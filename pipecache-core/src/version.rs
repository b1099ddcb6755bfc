/*!
Content hash of the version file that scopes a volume persist location.
*/

use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::IoResultExt;
use crate::Result;

/// Lowercase hex SHA-256 of a file's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionHash(String);

impl VersionHash {
    /// Hash the file at `path`, streaming its content
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).at(path)?;
        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher).at(path)?;
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VersionHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
