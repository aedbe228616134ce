//! Safe extraction of untrusted archives
//!
//! This crate extracts tar (plain, gzip, bzip2, xz, zstd), zip and 7z archives into a
//! freshly allocated directory, making sure no entry can be written outside of it.
//!
//! # Features
//!
//! - Format identification from file content, with the file name as a fallback
//! - Entry names are confined to the extraction directory, symlinks are never followed
//! - Every extraction gets its own uniquely named directory, also under concurrent use
//! - Partial output is removed on failure and on cancellation
//! - A redundant top-level directory is looked through
//! - Progress reporting via `indicatif` and an async API on top of tokio
//!
//! # Examples
//!
//! ## Basic extraction
//!
//! ```no_run
//! use archive_extract::{ExtractionRequest, ExtractorBuilder};
//!
//! let extractor = ExtractorBuilder::new().build();
//!
//! let result = extractor.extract(
//!     &ExtractionRequest::new("transfer.tar.gz").with_dest_root("output_dir"),
//! )?;
//! println!("extracted to {}", result.extract_path.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Custom permissions and progress reporting
//!
//! ```no_run
//! use archive_extract::{ExtractionRequest, ExtractorBuilder};
//! # #[cfg(feature = "progress")]
//! use indicatif::{ProgressBar, ProgressStyle};
//!
//! # #[cfg(feature = "progress")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let progress_bar = ProgressBar::new(0);
//! progress_bar.set_style(ProgressStyle::default_bar());
//!
//! let extractor = ExtractorBuilder::new()
//!     .with_dir_mode(0o750)
//!     .with_file_mode(0o640)
//!     .with_progress_bar(progress_bar)
//!     .build();
//!
//! extractor.extract(&ExtractionRequest::new("transfer.zip"))?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "progress"))]
//! # fn main() {}
//! ```

pub mod allocate;
pub mod config;
pub mod entry;
pub mod error;
pub mod extractor;
pub mod flatten;
pub mod format;
pub mod progress;
pub mod sandbox;
pub mod writer;

#[cfg(feature = "tokio")]
pub mod r#async;

pub use config::{ExtractConfig, SymlinkPolicy, DEFAULT_DIR_MODE, DEFAULT_FILE_MODE};
pub use error::{ArchiveError, ExtractionError, Result};
pub use extractor::{ExtractionRequest, ExtractionResult, Extractor, ExtractorBuilder};
pub use format::ArchiveFormat;
pub use progress::{NoProgressReporter, ProgressReporter};
pub use tokio_util::sync::CancellationToken;

#[cfg(feature = "progress")]
pub use progress::IndicatifProgressReporter;

#[cfg(feature = "tokio")]
pub use r#async::AsyncExtractor;

use std::path::Path;

/// Extract `source` with the default configuration.
///
/// The extraction directory is created in `dest_root`, or next to `source` if no root is
/// given.
pub fn extract(source: &Path, dest_root: Option<&Path>) -> Result<ExtractionResult> {
    let mut request = ExtractionRequest::new(source);
    if let Some(root) = dest_root {
        request = request.with_dest_root(root);
    }
    ExtractorBuilder::new().build().extract(&request)
}

/// Check if a filename has a known archive extension
pub fn is_archive(filename: &str) -> bool {
    ArchiveFormat::detect_from_filename(filename).is_some()
}

/// Check if a filename is a tarball
pub fn is_tarball(filename: &str) -> bool {
    ArchiveFormat::detect_from_filename(filename).is_some_and(|format| format.is_tar_based())
}
