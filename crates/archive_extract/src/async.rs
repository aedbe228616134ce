//! Async archive extraction using tokio

use crate::{
    error::{ArchiveError, Result},
    extractor::{ExtractionRequest, ExtractionResult, Extractor},
    progress::{NoProgressReporter, ProgressReporter},
};
use std::sync::Arc;
use tokio::task;

/// Async archive extractor.
///
/// Extraction runs on the blocking thread pool. Dropping the future returned by
/// [`AsyncExtractor::extract`] cancels the extraction, which then removes its partial output.
pub struct AsyncExtractor<P: ProgressReporter + Send + Sync = NoProgressReporter> {
    inner: Arc<Extractor<P>>,
}

impl<P: ProgressReporter + Send + Sync> From<Extractor<P>> for AsyncExtractor<P> {
    fn from(inner: Extractor<P>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }
}

impl<P: ProgressReporter + Send + Sync> Clone for AsyncExtractor<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: ProgressReporter + Send + Sync + 'static> AsyncExtractor<P> {
    /// Extract an archive into a freshly allocated directory
    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        let cancellation = self.inner.cancellation_token().child_token();
        let guard = cancellation.clone().drop_guard();

        let inner = self.inner.clone();
        let result = task::spawn_blocking(move || {
            inner.extract_with_cancellation(&request, &cancellation)
        })
        .await;
        guard.disarm();

        result.map_err(|e| ArchiveError::Io(std::io::Error::other(e)))?
    }
}
