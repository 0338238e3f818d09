//! Pipeline coordinator and public facade
//!
//! Drives one run end to end:
//! `load-ledger → discover → seed → persist → schedule → wait → persist →
//! report`. Discovery and per-lesson target extraction are external
//! collaborators consumed through the [`Discovery`] and [`Extractor`]
//! traits; the coordinator owns everything between them and the disk.
//!
//! The ledger is persisted on every exit path, including errors bubbling
//! out of discovery or scheduling, so the next resume always sees the most
//! recent state reachable before the failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::executor::{ExecutorSet, HttpExecutor, MediaExecutor};
use crate::ledger::{Ledger, LessonPatch};
use crate::queue::{DownloadQueue, WorkItem};
use crate::types::{Event, LessonDescriptor, LessonRecord, LessonStatus, ResolvedTarget, RunSummary};

/// Identity of the course being mirrored
///
/// One ledger document exists per distinct source; the document name is a
/// slug of the course name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CourseSource {
    /// Source URL the course is discovered from
    pub url: String,
    /// Display name, also used to derive ledger and output locations
    pub name: String,
}

impl CourseSource {
    fn ledger_file(&self) -> String {
        format!("{}.json", slug(&self.name))
    }
}

/// Options for one run
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Skip discovery when prior state exists and schedule only the
    /// ledger's eligible records
    pub resume: bool,
}

/// External collaborator that enumerates lessons from the source
///
/// Discovery may fail entirely (fatal for the run) but not partially: the
/// returned list is the complete, ordered enumeration.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Enumerate all lessons of the course
    async fn discover(&self, source: &CourseSource) -> Result<Vec<LessonDescriptor>>;
}

/// External collaborator that resolves a lesson to a downloadable target
///
/// Per-item and best-effort: `Ok(None)` or an error means this lesson has
/// no target, which degrades the lesson to skipped without affecting the
/// run.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Resolve a concrete target from the lesson's source locator
    async fn resolve(&self, locator: &str) -> Result<Option<ResolvedTarget>>;
}

/// Skip reason recorded when extraction yields no target
const NO_TARGET_REASON: &str = "no target found";

/// Main downloader facade (cloneable - shared fields are Arc-wrapped)
#[derive(Clone)]
pub struct CourseDownloader {
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
}

impl CourseDownloader {
    /// Create a new CourseDownloader instance
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        // Buffered so slow subscribers don't stall the pipeline
        let (event_tx, _rx) = broadcast::channel(1000);
        Ok(Self {
            config: Arc::new(config),
            event_tx,
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber lagging more than 1000 events behind
    /// receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Last-persisted summary for a course, without running any work
    ///
    /// A course with no prior state reports all-zero counts.
    pub async fn status(&self, source: &CourseSource) -> RunSummary {
        let ledger = self.open_ledger(source);
        ledger.load().await;
        ledger.stats().await
    }

    /// Execute one run for the given course
    ///
    /// Discovery seeds the ledger idempotently, the queue drains every
    /// eligible record, and the final summary reflects the persisted state.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: total discovery failure, or a ledger that
    /// cannot be written at all. Per-lesson failures are recorded in the
    /// ledger and reflected in the returned summary instead.
    pub async fn run(
        &self,
        source: &CourseSource,
        discovery: &dyn Discovery,
        extractor: &dyn Extractor,
        options: RunOptions,
    ) -> Result<RunSummary> {
        let ledger = Arc::new(self.open_ledger(source));
        let found = ledger.load().await;
        ledger.initialize(&source.url, &source.name).await;

        let result = self
            .run_inner(source, &ledger, discovery, extractor, options, found)
            .await;

        // Unconditional persist: the resume point must reflect everything
        // that happened before a failure as well as after success.
        let persisted = ledger.persist().await;

        match (result, persisted) {
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e),
            (Ok(summary), Ok(())) => {
                self.event_tx
                    .send(Event::RunFinished { summary })
                    .ok();
                Ok(summary)
            }
        }
    }

    async fn run_inner(
        &self,
        source: &CourseSource,
        ledger: &Arc<Ledger>,
        discovery: &dyn Discovery,
        extractor: &dyn Extractor,
        options: RunOptions,
        prior_state_found: bool,
    ) -> Result<RunSummary> {
        let resuming = options.resume && prior_state_found;

        if resuming {
            tracing::info!(course = %source.name, "Resuming from persisted ledger, skipping discovery");
        } else {
            self.discover_and_seed(source, ledger, discovery, extractor)
                .await?;
            ledger.persist().await?;
        }

        let eligible = ledger.pending(self.config.download.max_attempts).await;
        tracing::info!(
            course = %source.name,
            eligible = eligible.len(),
            "Scheduling eligible lessons"
        );

        let queue = DownloadQueue::new(
            Arc::clone(ledger),
            self.build_executors()?,
            self.config.download.max_concurrent_downloads,
            self.event_tx.clone(),
        );
        let processor = queue.start_processor();

        for record in eligible {
            self.schedule_record(source, ledger, extractor, &queue, record)
                .await?;
        }

        queue.wait_for_all().await;
        queue.shutdown();
        processor.await.ok();

        let summary = ledger.stats().await;
        tracing::info!(
            course = %source.name,
            completed = summary.completed,
            failed = summary.failed,
            skipped = summary.skipped,
            pending = summary.pending,
            "Run complete"
        );
        Ok(summary)
    }

    /// Enumerate lessons and seed the ledger, resolving targets for records
    /// seen for the first time
    async fn discover_and_seed(
        &self,
        source: &CourseSource,
        ledger: &Arc<Ledger>,
        discovery: &dyn Discovery,
        extractor: &dyn Extractor,
    ) -> Result<()> {
        let descriptors = discovery.discover(source).await?;
        if descriptors.is_empty() {
            return Err(Error::Discovery(format!(
                "no lessons enumerated for {}",
                source.url
            )));
        }
        tracing::info!(course = %source.name, lessons = descriptors.len(), "Discovery complete");

        for descriptor in &descriptors {
            let inserted = ledger.add_lesson(descriptor).await;
            if !inserted {
                // Known id: history stays untouched, target stays cached
                continue;
            }
            self.resolve_into_ledger(ledger, extractor, &descriptor.id, &descriptor.source_locator)
                .await;
        }
        Ok(())
    }

    /// Run extraction for one lesson and record the outcome
    ///
    /// A miss (no target, or extractor error) degrades the lesson to
    /// skipped; it is never enqueued.
    async fn resolve_into_ledger(
        &self,
        ledger: &Arc<Ledger>,
        extractor: &dyn Extractor,
        id: &crate::types::LessonId,
        locator: &str,
    ) {
        match extractor.resolve(locator).await {
            Ok(Some(target)) => {
                ledger
                    .update_lesson(
                        id,
                        LessonPatch {
                            target_url: Some(target.url),
                            target_kind: Some(target.kind),
                            status: Some(LessonStatus::Pending),
                            ..LessonPatch::default()
                        },
                    )
                    .await;
            }
            Ok(None) => {
                tracing::warn!(lesson_id = %id, "Extraction found no target");
                ledger.mark_skipped(id, NO_TARGET_REASON).await;
            }
            Err(e) => {
                tracing::warn!(lesson_id = %id, error = %e, "Extraction failed");
                ledger.mark_skipped(id, NO_TARGET_REASON).await;
            }
        }
    }

    /// Enqueue one eligible record, re-running extraction first when its
    /// cached target is missing
    async fn schedule_record(
        &self,
        source: &CourseSource,
        ledger: &Arc<Ledger>,
        extractor: &dyn Extractor,
        queue: &DownloadQueue,
        record: LessonRecord,
    ) -> Result<()> {
        let record = if record.target_url.is_none() {
            // Explicit needs_extraction state instead of a silent skip: the
            // locator is persisted, so re-resolution can happen on resume.
            ledger.mark_needs_extraction(&record.id).await;
            self.resolve_into_ledger(ledger, extractor, &record.id, &record.source_locator)
                .await;
            match ledger.get(&record.id).await {
                Some(updated) if updated.target_url.is_some() => updated,
                _ => return Ok(()), // degraded to skipped
            }
        } else {
            record
        };

        let (Some(url), Some(kind)) = (record.target_url.clone(), record.target_kind.clone())
        else {
            return Ok(());
        };

        queue
            .enqueue(WorkItem {
                lesson_id: record.id.clone(),
                url,
                kind,
                dest_stem: self.dest_stem(source, &record),
            })
            .await
    }

    /// Deterministic output location: `<download_dir>/<course>/<MM-LL title>`
    fn dest_stem(&self, source: &CourseSource, record: &LessonRecord) -> PathBuf {
        let name = format!(
            "{:02}-{:02} {}",
            record.module_index,
            record.lesson_index,
            sanitize_component(&record.lesson_title),
        );
        self.config
            .download
            .download_dir
            .join(slug(&source.name))
            .join(name)
    }

    fn build_executors(&self) -> Result<ExecutorSet> {
        let http = HttpExecutor::new(
            self.config.download.request_timeout_secs,
            self.config.download.max_redirects,
            self.config.media.referer.clone(),
        )?;
        let media = MediaExecutor::from_config(
            &self.config.media,
            Duration::from_secs(self.config.download.request_timeout_secs),
        );
        Ok(ExecutorSet::new(Arc::new(media), Arc::new(http)))
    }

    fn open_ledger(&self, source: &CourseSource) -> Ledger {
        Ledger::new(
            self.config.persistence.state_dir.join(source.ledger_file()),
            self.config.persistence.flush_every,
        )
    }
}

/// Filesystem-safe slug for directory and ledger naming
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("course");
    }
    out
}

/// Strip characters that are unsafe in a single path component
fn sanitize_component(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_matches('.');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}
