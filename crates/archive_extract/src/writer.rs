//! Writes archive entries beneath the extraction directory

use crate::{
    config::{ExtractConfig, SymlinkPolicy},
    entry::{ArchiveEntry, EntryHandler, EntryKind},
    error::ExtractionError,
    progress::ProgressReporter,
    sandbox::{set_mode, PathSandbox},
};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// [`EntryHandler`] that materializes every entry on disk through a [`PathSandbox`]
pub struct EntryWriter<'a, P: ProgressReporter + ?Sized> {
    sandbox: PathSandbox,
    config: ExtractConfig,
    cancellation: &'a CancellationToken,
    reporter: &'a P,
    buffer: Box<[u8]>,
    bytes_written: u64,
}

impl<'a, P: ProgressReporter + ?Sized> EntryWriter<'a, P> {
    /// Create a writer for the directory `destination`
    pub fn new(
        destination: &Path,
        config: ExtractConfig,
        cancellation: &'a CancellationToken,
        reporter: &'a P,
    ) -> Self {
        Self {
            sandbox: PathSandbox::new(destination),
            config,
            cancellation,
            reporter,
            buffer: vec![0; COPY_BUFFER_SIZE].into_boxed_slice(),
            bytes_written: 0,
        }
    }

    /// Number of content bytes written so far
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn write_directory(&self, name: &str) -> Result<(), ExtractionError> {
        let relative = PathSandbox::normalize(name)?;
        self.sandbox.create_dir_all(&relative, self.config.dir_mode, name)
    }

    fn write_file(&mut self, name: &str, reader: &mut dyn Read) -> Result<(), ExtractionError> {
        let path = self.prepare_leaf(name)?;

        let mut file = fs_err::File::create(&path)?;
        set_file_mode(&file, self.config.file_mode)?;
        let written = self.copy(reader, &mut file)?;
        self.bytes_written += written;
        Ok(())
    }

    fn write_symlink(&self, name: &str, target: &str) -> Result<(), ExtractionError> {
        match self.config.symlinks {
            SymlinkPolicy::Skip => {
                tracing::debug!("skipping symlink `{name}` -> `{target}`");
                Ok(())
            }
            SymlinkPolicy::Reject => Err(ExtractionError::SymlinkRejected {
                entry: name.to_string(),
            }),
            SymlinkPolicy::Confine => {
                let relative = PathSandbox::normalize(name)?;
                self.sandbox.check_symlink_target(&relative, name, target)?;
                let path = self.prepare_leaf(name)?;
                create_symlink(target, &path)
            }
        }
    }

    fn write_hard_link(&mut self, name: &str, target: &str) -> Result<(), ExtractionError> {
        let source_relative = PathSandbox::normalize(target)?;
        if source_relative.as_os_str().is_empty() {
            return Err(ExtractionError::invalid_name(target));
        }
        self.sandbox.ensure_no_symlinks(&source_relative, name)?;
        let source = self.sandbox.root().join(&source_relative);
        if self.sandbox.resolve(name)? == source {
            return Err(ExtractionError::invalid_name(name));
        }

        let path = self.prepare_leaf(name)?;
        self.bytes_written += fs_err::copy(&source, &path)?;
        set_mode(&path, self.config.file_mode)?;
        Ok(())
    }

    /// Resolve a non-directory entry, create its parent directories and clear whatever
    /// non-directory is already at its location, without following symlinks.
    fn prepare_leaf(&self, name: &str) -> Result<PathBuf, ExtractionError> {
        let relative = PathSandbox::normalize(name)?;
        let Some(parent) = relative.parent() else {
            return Err(ExtractionError::invalid_name(name));
        };
        self.sandbox.create_dir_all(parent, self.config.dir_mode, name)?;

        let path = self.sandbox.root().join(&relative);
        match fs_err::symlink_metadata(&path) {
            Ok(metadata) if metadata.is_dir() => Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} is a directory", path.display()),
            )
            .into()),
            Ok(_) => {
                fs_err::remove_file(&path)?;
                Ok(path)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(path),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy `reader` into `writer`, checking for cancellation between chunks
    fn copy(
        &mut self,
        reader: &mut dyn Read,
        writer: &mut impl Write,
    ) -> Result<u64, ExtractionError> {
        let mut written = 0;
        loop {
            if self.cancellation.is_cancelled() {
                return Err(ExtractionError::Cancelled);
            }
            let read = match reader.read(&mut self.buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            writer.write_all(&self.buffer[..read])?;
            written += read as u64;
        }
        writer.flush()?;
        Ok(written)
    }
}

impl<P: ProgressReporter + ?Sized> EntryHandler for EntryWriter<'_, P> {
    fn handle(&mut self, entry: ArchiveEntry<'_>) -> Result<(), ExtractionError> {
        if self.cancellation.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let ArchiveEntry { name, kind, reader } = entry;
        tracing::trace!("writing {kind:?} entry `{name}`");
        self.reporter.on_entry(&name);

        match kind {
            EntryKind::Directory => self.write_directory(&name),
            EntryKind::File => self.write_file(&name, reader),
            EntryKind::Symlink { target } => self.write_symlink(&name, &target),
            EntryKind::HardLink { target } => self.write_hard_link(&name, &target),
            EntryKind::Other => {
                tracing::warn!("skipping unsupported archive entry `{name}`");
                Ok(())
            }
        }
    }
}

/// Apply `mode` through the open handle, so it lands on the inode that was just created.
#[cfg(unix)]
fn set_file_mode(file: &fs_err::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_file_mode(_file: &fs_err::File, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &str, path: &Path) -> Result<(), ExtractionError> {
    fs_err::os::unix::fs::symlink(target, path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_symlink(target: &str, path: &Path) -> Result<(), ExtractionError> {
    tracing::warn!(
        "skipping symlink {} -> `{target}`, symlinks are only created on unix",
        path.display()
    );
    Ok(())
}
