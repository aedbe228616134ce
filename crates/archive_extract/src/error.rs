//! Error types for the archive_extract crate

use crate::format::ArchiveFormat;
use std::path::PathBuf;

/// Result type for archive operations
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error type returned by [`crate::Extractor::extract`].
///
/// The variants map onto the kinds a caller needs to tell apart: input defects
/// ([`ArchiveError::NotAFile`], [`ArchiveError::InvalidArchive`]) are permanent, while
/// [`ArchiveError::Extraction`] and [`ArchiveError::Allocation`] wrap an I/O cause that may
/// or may not be transient.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// I/O error before any archive work started, e.g. the source does not exist
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The source path names a directory or another non-regular file
    #[error("not a file: {}", path.display())]
    NotAFile { path: PathBuf },

    /// The source is readable but no supported format recognizes it
    #[error("invalid archive: {}", path.display())]
    InvalidArchive { path: PathBuf },

    /// The extraction directory could not be created
    #[error("failed to create an extraction directory in {}", root.display())]
    Allocation {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Reading the archive or writing the destination failed after identification
    #[error("failed to extract {} archive {}", format.name(), path.display())]
    Extraction {
        path: PathBuf,
        format: ArchiveFormat,
        #[source]
        source: ExtractionError,
    },

    /// The extraction was cancelled before it completed
    #[error("extraction of {} was cancelled", path.display())]
    Cancelled { path: PathBuf },
}

impl ArchiveError {
    /// Create a new not-a-file error
    pub fn not_a_file(path: impl Into<PathBuf>) -> Self {
        Self::NotAFile { path: path.into() }
    }

    /// Create a new invalid archive error
    pub fn invalid_archive(path: impl Into<PathBuf>) -> Self {
        Self::InvalidArchive { path: path.into() }
    }

    /// Create a new allocation error
    pub fn allocation(root: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Allocation {
            root: root.into(),
            source,
        }
    }

    /// Wrap an entry-level error. A cancelled entry stream becomes [`ArchiveError::Cancelled`].
    pub fn extraction(
        path: impl Into<PathBuf>,
        format: ArchiveFormat,
        source: ExtractionError,
    ) -> Self {
        match source {
            ExtractionError::Cancelled => Self::Cancelled { path: path.into() },
            source => Self::Extraction {
                path: path.into(),
                format,
                source,
            },
        }
    }

    /// Returns true if retrying with the same input can never succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::NotAFile { .. } | Self::InvalidArchive { .. })
    }
}

/// Error raised while streaming entries out of an identified archive
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    /// I/O error reading the source or writing the destination
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Error reported by the zip reader
    #[error("failed to read zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Error reported by the 7z reader
    #[cfg(feature = "sevenz")]
    #[error("failed to read 7z archive: {message}")]
    SevenZip { message: String },

    /// An entry name resolves outside of the extraction directory
    #[error("entry `{entry}` resolves outside of the extraction directory")]
    PathEscape { entry: String },

    /// A symlink entry points outside of the extraction directory
    #[error("symlink `{entry}` points outside of the extraction directory: `{target}`")]
    SymlinkEscape { entry: String, target: String },

    /// Writing an entry would go through a symlink created earlier
    #[error("refusing to write `{entry}` through the symlink at {}", link.display())]
    ThroughSymlink { entry: String, link: PathBuf },

    /// The configured policy does not allow symlink entries
    #[error("symlink entries are not allowed: `{entry}`")]
    SymlinkRejected { entry: String },

    /// The entry name cannot be mapped to a path
    #[error("invalid entry name `{entry}`")]
    InvalidName { entry: String },

    /// The extraction was cancelled
    #[error("the extraction was cancelled")]
    Cancelled,
}

impl ExtractionError {
    /// Create a new path escape error
    pub fn path_escape(entry: impl Into<String>) -> Self {
        Self::PathEscape {
            entry: entry.into(),
        }
    }

    /// Create a new invalid name error
    pub fn invalid_name(entry: impl Into<String>) -> Self {
        Self::InvalidName {
            entry: entry.into(),
        }
    }

    /// Create a new 7z error
    #[cfg(feature = "sevenz")]
    pub fn sevenz(message: impl Into<String>) -> Self {
        Self::SevenZip {
            message: message.into(),
        }
    }
}
