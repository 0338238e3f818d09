//! # course-dl
//!
//! Resumable download orchestrator for mirroring per-lesson course
//! artifacts (video, attachments) into a durable local mirror.
//!
//! ## Design Philosophy
//!
//! course-dl is designed to be:
//! - **Resumable first** - every lesson's state is durably tracked, so a
//!   crash, network loss, or rate limit loses at most a few in-memory
//!   updates and never completed work
//! - **Library-first** - no CLI or UI, purely a Rust crate for embedding
//! - **Capability-driven** - discovery, extraction, and media fetching are
//!   traits the embedder implements; the core never parses a page or
//!   hard-codes a tool's flags
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use course_dl::{Config, CourseDownloader, CourseSource, RunOptions};
//! use course_dl::{Discovery, Extractor, LessonDescriptor, ResolvedTarget};
//!
//! # struct MyDiscovery;
//! # #[async_trait::async_trait]
//! # impl Discovery for MyDiscovery {
//! #     async fn discover(&self, _s: &CourseSource) -> course_dl::Result<Vec<LessonDescriptor>> {
//! #         Ok(vec![])
//! #     }
//! # }
//! # struct MyExtractor;
//! # #[async_trait::async_trait]
//! # impl Extractor for MyExtractor {
//! #     async fn resolve(&self, _l: &str) -> course_dl::Result<Option<ResolvedTarget>> {
//! #         Ok(None)
//! #     }
//! # }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = CourseDownloader::new(Config::default())?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let source = CourseSource {
//!         url: "https://learn.example.com/courses/42".to_string(),
//!         name: "Advanced Widgets".to_string(),
//!     };
//!     let summary = downloader
//!         .run(&source, &MyDiscovery, &MyExtractor, RunOptions::default())
//!         .await?;
//!     println!(
//!         "completed {} failed {} skipped {} pending {}",
//!         summary.completed, summary.failed, summary.skipped, summary.pending
//!     );
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Download executor capability (HTTP resources, external media tool)
pub mod executor;
/// Durable per-course lesson state
pub mod ledger;
/// Pipeline coordinator and public facade
pub mod pipeline;
/// Bounded-concurrency download queue
pub mod queue;
/// Core types
pub mod types;

pub use config::{Config, DownloadConfig, MediaConfig, PersistenceConfig};
pub use error::{Error, LedgerError, Result, TransferError};
pub use executor::{
    CliMediaFetcher, DisabledMediaFetcher, DownloadExecutor, ExecutorSet, HttpExecutor,
    MediaExecutor, MediaFetcher, ProgressFn, TransferOutcome, TransferRequest,
};
pub use ledger::{Ledger, LessonPatch};
pub use pipeline::{CourseDownloader, CourseSource, Discovery, Extractor, RunOptions};
pub use queue::{DownloadQueue, WorkItem};
pub use types::{
    CourseState, Event, LessonDescriptor, LessonId, LessonRecord, LessonStatus, ProgressUpdate,
    ResolvedTarget, RunSummary, TargetKind,
};
