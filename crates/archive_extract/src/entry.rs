//! Archive entries and the per-format streams that yield them

use crate::error::ExtractionError;
use std::io::{BufReader, Read};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Set in 7z attributes when the high 16 bits carry a unix mode
#[cfg(feature = "sevenz")]
const SEVENZ_UNIX_EXTENSION: u32 = 0x8000;

/// The kind of record an entry describes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file, its content is the entry reader
    File,
    /// A directory
    Directory,
    /// A symbolic link pointing at `target`
    Symlink { target: String },
    /// A hard link to the entry named `target` earlier in the archive
    HardLink { target: String },
    /// Anything else (devices, fifos, global headers)
    Other,
}

/// One entry of an archive.
///
/// `name` comes straight from the archive and must never be joined onto a path without
/// going through a [`crate::sandbox::PathSandbox`].
pub struct ArchiveEntry<'a> {
    /// Name of the entry inside the archive
    pub name: String,
    /// What the entry describes
    pub kind: EntryKind,
    /// The entry content
    pub reader: &'a mut dyn Read,
}

/// Strategy invoked for every entry of an [`EntryStream`], in stream order.
///
/// Returning an error stops the stream; no further entries are handed out.
pub trait EntryHandler {
    /// Handle a single entry
    fn handle(&mut self, entry: ArchiveEntry<'_>) -> Result<(), ExtractionError>;
}

/// An opened archive, one variant per container family.
///
/// A stream can be consumed once; extracting again means opening the source again.
pub enum EntryStream<'r> {
    /// Any tar archive, already wrapped in its decompressor
    Tar(tar::Archive<Box<dyn Read + 'r>>),
    /// A zip archive
    Zip(zip::ZipArchive<BufReader<fs_err::File>>),
    /// A 7z archive
    #[cfg(feature = "sevenz")]
    SevenZip(sevenz_rust2::SevenZReader<std::fs::File>),
}

impl EntryStream<'_> {
    /// Feed every entry to `handler`, stopping at the first error. Returns the number of
    /// entries handled.
    pub fn for_each_entry<H: EntryHandler>(
        self,
        handler: &mut H,
    ) -> Result<usize, ExtractionError> {
        match self {
            EntryStream::Tar(archive) => for_each_tar_entry(archive, handler),
            EntryStream::Zip(archive) => for_each_zip_entry(archive, handler),
            #[cfg(feature = "sevenz")]
            EntryStream::SevenZip(archive) => for_each_sevenz_entry(archive, handler),
        }
    }
}

fn for_each_tar_entry<R: Read, H: EntryHandler>(
    mut archive: tar::Archive<R>,
    handler: &mut H,
) -> Result<usize, ExtractionError> {
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let kind = match entry.header().entry_type() {
            tar::EntryType::Directory => EntryKind::Directory,
            tar::EntryType::Regular | tar::EntryType::Continuous | tar::EntryType::GNUSparse => {
                if name.ends_with('/') {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                }
            }
            tar::EntryType::Symlink => EntryKind::Symlink {
                target: tar_link_name(&entry, &name)?,
            },
            tar::EntryType::Link => EntryKind::HardLink {
                target: tar_link_name(&entry, &name)?,
            },
            _ => EntryKind::Other,
        };

        handler.handle(ArchiveEntry {
            name,
            kind,
            reader: &mut entry,
        })?;
        count += 1;
    }
    Ok(count)
}

fn tar_link_name<R: Read>(
    entry: &tar::Entry<'_, R>,
    name: &str,
) -> Result<String, ExtractionError> {
    entry
        .link_name_bytes()
        .map(|target| String::from_utf8_lossy(&target).into_owned())
        .ok_or_else(|| ExtractionError::invalid_name(name))
}

fn for_each_zip_entry<H: EntryHandler>(
    mut archive: zip::ZipArchive<BufReader<fs_err::File>>,
    handler: &mut H,
) -> Result<usize, ExtractionError> {
    for index in 0..archive.len() {
        let mut file = archive.by_index(index)?;
        let name = file.name().to_owned();
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else if file.unix_mode().is_some_and(is_symlink_mode) {
            // The content of a symlink entry is its target
            let mut target = String::new();
            file.read_to_string(&mut target)?;
            EntryKind::Symlink { target }
        } else {
            EntryKind::File
        };

        handler.handle(ArchiveEntry {
            name,
            kind,
            reader: &mut file,
        })?;
    }
    Ok(archive.len())
}

#[cfg(feature = "sevenz")]
fn for_each_sevenz_entry<H: EntryHandler>(
    mut archive: sevenz_rust2::SevenZReader<std::fs::File>,
    handler: &mut H,
) -> Result<usize, ExtractionError> {
    // The reader drives a callback, so the handler error is parked here and the callback
    // asks the reader to stop.
    let mut failure = None;
    let mut count = 0;
    archive
        .for_each_entries(|entry, reader| {
            let attributes = entry
                .has_windows_attributes
                .then_some(entry.windows_attributes);
            let result = sevenz_entry_kind(entry.is_directory(), attributes, reader).and_then(
                |kind| {
                    handler.handle(ArchiveEntry {
                        name: entry.name().to_owned(),
                        kind,
                        reader,
                    })
                },
            );
            match result {
                Ok(()) => {
                    count += 1;
                    Ok(true)
                }
                Err(err) => {
                    failure = Some(err);
                    Ok(false)
                }
            }
        })
        .map_err(|e| ExtractionError::sevenz(e.to_string()))?;

    match failure {
        Some(err) => Err(err),
        None => Ok(count),
    }
}

fn is_symlink_mode(mode: u32) -> bool {
    mode & S_IFMT == S_IFLNK
}

/// Classify a 7z entry. Symlinks are stored as files whose content is the target, marked by
/// a unix mode in the attributes.
#[cfg(feature = "sevenz")]
fn sevenz_entry_kind(
    is_directory: bool,
    attributes: Option<u32>,
    reader: &mut dyn Read,
) -> Result<EntryKind, ExtractionError> {
    if is_directory {
        return Ok(EntryKind::Directory);
    }
    let unix_mode = attributes
        .filter(|attributes| attributes & SEVENZ_UNIX_EXTENSION != 0)
        .map(|attributes| attributes >> 16);
    if unix_mode.is_some_and(is_symlink_mode) {
        let mut target = String::new();
        reader.read_to_string(&mut target)?;
        return Ok(EntryKind::Symlink { target });
    }
    Ok(EntryKind::File)
}
