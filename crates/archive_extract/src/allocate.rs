//! Allocation of fresh extraction directories

use crate::{
    error::{ArchiveError, Result},
    sandbox::set_mode,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Prefix of every allocated directory name
pub const EXTRACT_DIR_PREFIX: &str = "extract";

/// Creates uniquely named extraction directories.
///
/// Uniqueness comes from the file system: a random name is created with `mkdir`, which fails
/// if the name exists, and another name is tried. This holds across threads and processes
/// sharing the same root.
#[derive(Debug, Clone)]
pub struct DestinationAllocator {
    prefix: String,
    dir_mode: u32,
}

impl DestinationAllocator {
    /// Create an allocator producing directories with `dir_mode`
    pub fn new(dir_mode: u32) -> Self {
        Self {
            prefix: EXTRACT_DIR_PREFIX.to_string(),
            dir_mode,
        }
    }

    /// Use a different name prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Create a new directory inside `dest_root`
    pub fn allocate(&self, dest_root: &Path) -> Result<AllocatedDir> {
        let dir = tempfile::Builder::new()
            .prefix(&self.prefix)
            .tempdir_in(dest_root)
            .map_err(|e| ArchiveError::allocation(dest_root, e))?;
        set_mode(dir.path(), self.dir_mode).map_err(|e| ArchiveError::allocation(dest_root, e))?;

        tracing::debug!("allocated extraction directory {}", dir.path().display());
        Ok(AllocatedDir(dir))
    }
}

/// A directory created by [`DestinationAllocator::allocate`].
///
/// The directory and everything in it is removed when this value is dropped, unless
/// [`AllocatedDir::keep`] was called.
#[derive(Debug)]
pub struct AllocatedDir(TempDir);

impl AllocatedDir {
    /// Path of the directory
    pub fn path(&self) -> &Path {
        self.0.path()
    }

    /// Keep the directory on disk and return its path
    pub fn keep(self) -> PathBuf {
        self.0.keep()
    }

    /// Remove the directory tree. Failures are logged and otherwise ignored.
    pub fn discard(self) {
        let path = self.path().to_path_buf();
        match self.0.close() {
            Ok(()) => tracing::debug!("removed extraction directory {}", path.display()),
            Err(err) => tracing::warn!(
                "failed to remove extraction directory {}: {err}",
                path.display()
            ),
        }
    }
}
