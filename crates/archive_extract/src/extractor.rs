//! Main extractor implementation

use crate::{
    allocate::DestinationAllocator,
    config::{ExtractConfig, SymlinkPolicy},
    error::{ArchiveError, Result},
    flatten::flatten,
    format::{read_header, ArchiveFormat},
    progress::{NoProgressReporter, ProgressReporter},
    writer::EntryWriter,
};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// What to extract and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    source_path: PathBuf,
    dest_root: Option<PathBuf>,
}

impl ExtractionRequest {
    /// Extract `source_path` next to itself
    pub fn new(source_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            dest_root: None,
        }
    }

    /// Allocate the extraction directory inside `dest_root` instead of next to the source.
    /// The directory must already exist.
    pub fn with_dest_root(mut self, dest_root: impl Into<PathBuf>) -> Self {
        self.dest_root = Some(dest_root.into());
        self
    }

    /// The archive to extract
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// The directory the extraction directory is created in
    pub fn dest_root(&self) -> &Path {
        match &self.dest_root {
            Some(root) => root,
            None => match self.source_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            },
        }
    }
}

/// Outcome of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Directory holding the extracted content, after flattening
    pub extract_path: PathBuf,
    /// The directory that was allocated for this extraction
    pub allocated_path: PathBuf,
    /// The format the archive was read as
    pub format: ArchiveFormat,
    /// Number of entries read from the archive
    pub entries: usize,
    /// Number of content bytes written
    pub bytes_written: u64,
}

/// Builder for configuring archive extraction
pub struct ExtractorBuilder<P: ProgressReporter = NoProgressReporter> {
    config: ExtractConfig,
    flatten: bool,
    progress_reporter: P,
    format: Option<ArchiveFormat>,
    cancellation_token: Option<CancellationToken>,
}

impl ExtractorBuilder<NoProgressReporter> {
    /// Create a new extractor builder
    pub fn new() -> Self {
        Self {
            config: ExtractConfig::default(),
            flatten: true,
            progress_reporter: NoProgressReporter,
            format: None,
            cancellation_token: None,
        }
    }
}

impl<P: ProgressReporter> ExtractorBuilder<P> {
    /// Replace the whole extraction configuration
    pub fn with_config(mut self, config: ExtractConfig) -> Self {
        self.config = config;
        self
    }

    /// Permission bits of created directories
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.config = self.config.with_dir_mode(mode);
        self
    }

    /// Permission bits of created files
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.config = self.config.with_file_mode(mode);
        self
    }

    /// How symlink entries are treated
    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.config = self.config.with_symlink_policy(policy);
        self
    }

    /// Whether to return the single top-level directory of the extraction instead of the
    /// allocated directory when there is nothing else next to it
    pub fn with_flatten(mut self, flatten: bool) -> Self {
        self.flatten = flatten;
        self
    }

    /// Set a custom progress reporter
    pub fn with_progress_reporter<R: ProgressReporter>(self, reporter: R) -> ExtractorBuilder<R> {
        ExtractorBuilder {
            config: self.config,
            flatten: self.flatten,
            progress_reporter: reporter,
            format: self.format,
            cancellation_token: self.cancellation_token,
        }
    }

    /// Set the archive format explicitly (bypassing identification)
    pub fn with_format(mut self, format: ArchiveFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Cancel every extraction of the built extractor when `token` is cancelled
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Build the extractor
    pub fn build(self) -> Extractor<P> {
        Extractor {
            config: self.config,
            flatten: self.flatten,
            progress_reporter: self.progress_reporter,
            format: self.format,
            cancellation_token: self.cancellation_token.unwrap_or_default(),
        }
    }

    /// Build an extractor that runs on the tokio blocking pool
    #[cfg(feature = "tokio")]
    pub fn build_async(self) -> crate::r#async::AsyncExtractor<P>
    where
        P: Send + Sync + 'static,
    {
        self.build().into()
    }
}

impl Default for ExtractorBuilder<NoProgressReporter> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "progress")]
impl ExtractorBuilder<NoProgressReporter> {
    /// Set an indicatif progress bar
    pub fn with_progress_bar(
        self,
        progress_bar: indicatif::ProgressBar,
    ) -> ExtractorBuilder<crate::progress::IndicatifProgressReporter> {
        self.with_progress_reporter(crate::progress::IndicatifProgressReporter::new(
            progress_bar,
        ))
    }
}

/// Archive extractor.
///
/// An extractor holds no per-call state; one instance can serve any number of concurrent
/// extractions, also into the same destination root.
pub struct Extractor<P: ProgressReporter = NoProgressReporter> {
    config: ExtractConfig,
    flatten: bool,
    progress_reporter: P,
    format: Option<ArchiveFormat>,
    cancellation_token: CancellationToken,
}

impl<P: ProgressReporter> Extractor<P> {
    /// The configuration applied to every extraction
    pub fn config(&self) -> &ExtractConfig {
        &self.config
    }

    /// The token cancelling every extraction of this extractor
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Extract an archive into a freshly allocated directory
    pub fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        self.extract_with_cancellation(request, &self.cancellation_token)
    }

    /// Like [`Extractor::extract`], stopping early once `cancellation` is cancelled.
    ///
    /// On any failure after the extraction directory was allocated, the directory is removed
    /// again, so an error never leaves a result behind that looks complete.
    pub fn extract_with_cancellation(
        &self,
        request: &ExtractionRequest,
        cancellation: &CancellationToken,
    ) -> Result<ExtractionResult> {
        let source = request.source_path();
        let metadata = fs_err::metadata(source)?;
        if !metadata.is_file() {
            return Err(ArchiveError::not_a_file(source));
        }

        let format = match self.format {
            Some(format) => format,
            None => {
                let header = read_header(fs_err::File::open(source)?)?;
                ArchiveFormat::identify(source, &header)?
                    .ok_or_else(|| ArchiveError::invalid_archive(source))?
            }
        };
        tracing::debug!("extracting {} as {}", source.display(), format.name());

        if cancellation.is_cancelled() {
            return Err(ArchiveError::Cancelled {
                path: source.to_path_buf(),
            });
        }

        let allocated =
            DestinationAllocator::new(self.config.dir_mode).allocate(request.dest_root())?;
        self.progress_reporter.on_start(Some(metadata.len()));

        let mut writer = EntryWriter::new(
            allocated.path(),
            self.config,
            cancellation,
            &self.progress_reporter,
        );
        let entries = match format
            .open(source, &self.progress_reporter)
            .and_then(|stream| stream.for_each_entry(&mut writer))
        {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!("extraction of {} failed: {err}", source.display());
                allocated.discard();
                return Err(ArchiveError::extraction(source, format, err));
            }
        };
        let bytes_written = writer.bytes_written();

        let extract_path = if self.flatten {
            match flatten(allocated.path()) {
                Ok(path) => path,
                Err(err) => {
                    allocated.discard();
                    return Err(err.into());
                }
            }
        } else {
            allocated.path().to_path_buf()
        };
        tracing::debug!(
            "extracted {entries} entries of {} to {}",
            source.display(),
            extract_path.display()
        );

        let allocated_path = allocated.keep();
        self.progress_reporter
            .on_finish(&format!("Extracted {} archive", format.name()));

        Ok(ExtractionResult {
            extract_path,
            allocated_path,
            format,
            entries,
            bytes_written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs::File;
    use tempfile::TempDir;

    fn create_test_tar_gz(entries: &[(&str, &str)]) -> (TempDir, PathBuf) {
        let temp_dir = tempfile::tempdir().unwrap();
        let tar_path = temp_dir.path().join("test.tar.gz");

        let file = File::create(&tar_path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut tar = tar::Builder::new(encoder);

        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tar.append(&header, content.as_bytes()).unwrap();
        }

        tar.into_inner().unwrap().finish().unwrap();
        (temp_dir, tar_path)
    }

    #[test]
    fn test_extract_tar_gz() {
        let (_archive_dir, archive_path) = create_test_tar_gz(&[("test.txt", "hello")]);
        let dest_root = tempfile::tempdir().unwrap();

        let extractor = ExtractorBuilder::new().build();
        let result = extractor
            .extract(&ExtractionRequest::new(&archive_path).with_dest_root(dest_root.path()))
            .unwrap();

        assert_eq!(result.format, ArchiveFormat::TarGz);
        assert_eq!(result.entries, 1);
        assert_eq!(result.bytes_written, 5);
        assert_eq!(result.extract_path, result.allocated_path);
        assert_eq!(result.allocated_path.parent(), Some(dest_root.path()));
        assert_eq!(
            fs_err::read_to_string(result.extract_path.join("test.txt")).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_flatten_can_be_disabled() {
        let (_archive_dir, archive_path) = create_test_tar_gz(&[("payload/a.txt", "a")]);
        let request = ExtractionRequest::new(&archive_path);

        let flattened = ExtractorBuilder::new().build().extract(&request).unwrap();
        assert_eq!(
            flattened.extract_path,
            flattened.allocated_path.join("payload")
        );

        let kept = ExtractorBuilder::new()
            .with_flatten(false)
            .build()
            .extract(&request)
            .unwrap();
        assert_eq!(kept.extract_path, kept.allocated_path);
        assert!(kept.extract_path.join("payload/a.txt").is_file());
    }

    #[test]
    fn test_explicit_format_bypasses_identification() {
        let (_archive_dir, archive_path) = create_test_tar_gz(&[("test.txt", "hello")]);

        let result = ExtractorBuilder::new()
            .with_format(ArchiveFormat::Zip)
            .build()
            .extract(&ExtractionRequest::new(&archive_path));

        assert_matches!(
            result,
            Err(ArchiveError::Extraction {
                format: ArchiveFormat::Zip,
                ..
            })
        );
    }

    #[test]
    fn test_cancelled_token_allocates_nothing() {
        let (archive_dir, archive_path) = create_test_tar_gz(&[("test.txt", "hello")]);
        let token = CancellationToken::new();
        token.cancel();

        let result = ExtractorBuilder::new()
            .with_cancellation_token(token)
            .build()
            .extract(&ExtractionRequest::new(&archive_path));

        assert_matches!(result, Err(ArchiveError::Cancelled { .. }));
        assert_eq!(fs_err::read_dir(archive_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_dest_root_defaults_to_the_source_directory() {
        assert_eq!(
            ExtractionRequest::new("/data/in/transfer.zip").dest_root(),
            Path::new("/data/in")
        );
        assert_eq!(
            ExtractionRequest::new("transfer.zip").dest_root(),
            Path::new(".")
        );
        assert_eq!(
            ExtractionRequest::new("/data/in/transfer.zip")
                .with_dest_root("/data/out")
                .dest_root(),
            Path::new("/data/out")
        );
    }

    #[test]
    fn test_builder_pattern() {
        let extractor = ExtractorBuilder::new()
            .with_dir_mode(0o750)
            .with_file_mode(0o640)
            .with_symlink_policy(SymlinkPolicy::Reject)
            .with_flatten(false)
            .with_format(ArchiveFormat::TarGz)
            .build();

        assert_eq!(extractor.config().dir_mode, 0o750);
        assert_eq!(extractor.config().file_mode, 0o640);
        assert_eq!(extractor.config().symlinks, SymlinkPolicy::Reject);
        assert!(!extractor.flatten);
        assert_eq!(extractor.format, Some(ArchiveFormat::TarGz));
    }
}
