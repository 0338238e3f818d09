//! Download executor capability
//!
//! This module provides a trait-based architecture for performing one
//! transfer. The queue never knows how a transfer happens; it selects an
//! implementation by the item's [`TargetKind`] and consumes the uniform
//! success/failure/progress contract.
//!
//! ## Architecture
//!
//! The core abstraction is the [`DownloadExecutor`] trait. Two
//! implementations are provided:
//!
//! - [`HttpExecutor`]: redirect-following streaming GET for plain resources
//! - [`MediaExecutor`]: delegates provider-hosted video to an external
//!   media-fetch backend behind the [`MediaFetcher`] trait

mod http;
mod media;

pub use http::HttpExecutor;
pub use media::{CliMediaFetcher, DisabledMediaFetcher, MediaExecutor, MediaFetcher};

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransferError;
use crate::types::{LessonId, ProgressUpdate, TargetKind};

/// Advisory progress callback handed to executors
///
/// Invoked with incremental percentages during long transfers. Purely
/// informational; it never affects scheduling.
pub type ProgressFn = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

/// A no-op progress callback
pub fn no_progress() -> ProgressFn {
    Arc::new(|_| {})
}

/// One transfer to perform
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// Lesson the transfer belongs to (for progress reporting)
    pub lesson_id: LessonId,
    /// Resolved target URL
    pub url: String,
    /// Destination path without a guaranteed extension; the executor derives
    /// the final name from it
    pub dest_stem: PathBuf,
}

/// Successful transfer result
#[must_use]
#[derive(Clone, Debug)]
pub struct TransferOutcome {
    /// Where the artifact landed (extension resolved by the executor)
    pub final_path: PathBuf,
}

/// Capability that performs one concrete transfer
///
/// Implementations must not panic across this boundary: every failure mode
/// surfaces as a classified [`TransferError`]. On success exactly one
/// artifact (plus optional sidecars such as subtitles) exists at a
/// deterministic location derived from the destination stem; on failure no
/// partial file indistinguishable from a completed download is left behind.
#[async_trait]
pub trait DownloadExecutor: Send + Sync {
    /// Perform the transfer described by `request`
    async fn execute(
        &self,
        request: &TransferRequest,
        progress: ProgressFn,
    ) -> std::result::Result<TransferOutcome, TransferError>;

    /// Short implementation name for logging
    fn name(&self) -> &'static str;
}

/// Executor selection keyed by [`TargetKind`]
///
/// Media targets of any provider route to the media executor; everything
/// else routes to the resource executor.
#[derive(Clone)]
pub struct ExecutorSet {
    media: Arc<dyn DownloadExecutor>,
    resource: Arc<dyn DownloadExecutor>,
}

impl ExecutorSet {
    /// Build a set from the two capability variants
    pub fn new(media: Arc<dyn DownloadExecutor>, resource: Arc<dyn DownloadExecutor>) -> Self {
        Self { media, resource }
    }

    /// Select the executor responsible for a target kind
    pub fn select(&self, kind: &TargetKind) -> Arc<dyn DownloadExecutor> {
        match kind {
            TargetKind::Media { .. } => Arc::clone(&self.media),
            TargetKind::Resource => Arc::clone(&self.resource),
        }
    }
}
