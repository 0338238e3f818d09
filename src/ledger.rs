//! Lesson ledger — the durable source of truth for what has been attempted
//! and what remains.
//!
//! One ledger document exists per course, stored as pretty-printed JSON so
//! operators can inspect or edit it between runs. Every state transition in
//! the library goes through this module; neither the queue nor the
//! coordinator mutates lesson records directly.
//!
//! Durability model: the document is rewritten whole via a temp-file rename
//! (a partially written file is never observed as valid), with an automatic
//! flush after a bounded number of mutations plus explicit flush points at
//! the coordinator's state-machine boundaries. A corrupt or unreadable
//! document on load is treated as "no existing progress" — the pipeline
//! never refuses to run because of a damaged state file.

use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

use crate::error::{LedgerError, Result};
use crate::types::{
    CourseState, LessonDescriptor, LessonId, LessonRecord, LessonStatus, RunSummary, TargetKind,
};

/// Partial update applied to an existing lesson record
///
/// Only the fields set to `Some` are merged; everything else is left
/// untouched. Used by the coordinator after extraction resolves a target.
#[derive(Clone, Debug, Default)]
pub struct LessonPatch {
    /// New resolved download URL
    pub target_url: Option<String>,
    /// New target kind
    pub target_kind: Option<TargetKind>,
    /// New status
    pub status: Option<LessonStatus>,
    /// New output path
    pub output_path: Option<PathBuf>,
    /// New last-error string (`Some(None)` clears it)
    pub last_error: Option<Option<String>>,
}

struct LedgerInner {
    state: CourseState,
    /// Mutations since the last successful persist
    unflushed: u32,
}

/// Durable per-course lesson state store
///
/// All operations are safe under concurrent invocation from in-flight
/// executor completions; mutations for a single lesson id are strictly
/// ordered by the internal mutex.
pub struct Ledger {
    path: PathBuf,
    flush_every: u32,
    inner: Mutex<LedgerInner>,
}

impl Ledger {
    /// Create a ledger backed by the given document path
    ///
    /// The document is not read until [`Ledger::load`] is called; a fresh
    /// ledger starts with an empty [`CourseState`].
    pub fn new(path: impl Into<PathBuf>, flush_every: u32) -> Self {
        Self {
            path: path.into(),
            flush_every,
            inner: Mutex::new(LedgerInner {
                state: CourseState::new(),
                unflushed: 0,
            }),
        }
    }

    /// Path of the backing document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted state if present
    ///
    /// Returns `true` if a valid prior state was loaded. Absence, unreadable
    /// content, and parse failures all return `false` (fresh start) — the
    /// latter two with a warning, never an error.
    pub async fn load(&self) -> bool {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No existing ledger, starting fresh");
                return false;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ledger unreadable, starting fresh"
                );
                return false;
            }
        };

        match serde_json::from_slice::<CourseState>(&bytes) {
            Ok(state) => {
                let mut inner = self.inner.lock().await;
                tracing::info!(
                    path = %self.path.display(),
                    lessons = state.lessons.len(),
                    "Loaded existing ledger"
                );
                inner.state = state;
                inner.unflushed = 0;
                true
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ledger corrupt, starting fresh"
                );
                false
            }
        }
    }

    /// Set course identity fields
    ///
    /// Safe to call repeatedly: identity is overwritten, the lesson list and
    /// its history are not.
    pub async fn initialize(&self, source_url: &str, course_name: &str) {
        let mut inner = self.inner.lock().await;
        inner.state.source_url = source_url.to_string();
        inner.state.course_name = course_name.to_string();
        inner.state.last_updated = chrono::Utc::now();
    }

    /// Insert a lesson record if its id is not already known
    ///
    /// Seeding is idempotent: re-adding an existing id is a no-op that must
    /// not reset the record's status or attempt history. Returns `true` if
    /// the record was inserted.
    pub async fn add_lesson(&self, descriptor: &LessonDescriptor) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state.lessons.iter().any(|l| l.id == descriptor.id) {
            tracing::debug!(lesson_id = %descriptor.id, "Lesson already known, keeping history");
            return false;
        }
        inner.state.lessons.push(LessonRecord {
            id: descriptor.id.clone(),
            module_index: descriptor.module_index,
            lesson_index: descriptor.lesson_index,
            module_title: descriptor.module_title.clone(),
            lesson_title: descriptor.lesson_title.clone(),
            source_locator: descriptor.source_locator.clone(),
            target_url: None,
            target_kind: None,
            status: LessonStatus::Pending,
            output_path: None,
            last_error: None,
            attempts: 0,
        });
        self.touch(&mut inner).await;
        true
    }

    /// Merge partial fields into an existing record
    ///
    /// Unknown ids are logged and ignored.
    pub async fn update_lesson(&self, id: &LessonId, patch: LessonPatch) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "update_lesson for unknown id, ignoring");
            return;
        };
        if let Some(url) = patch.target_url {
            record.target_url = Some(url);
        }
        if let Some(kind) = patch.target_kind {
            record.target_kind = Some(kind);
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(path) = patch.output_path {
            record.output_path = Some(path);
        }
        if let Some(error) = patch.last_error {
            record.last_error = error;
        }
        self.touch(&mut inner).await;
    }

    /// Record the start of an executor invocation
    ///
    /// Sets `in_progress` and increments the attempt counter *before* the
    /// invocation begins, so a crash mid-download is visible as an attempt
    /// without a terminal status. Returns the new attempt number, or `None`
    /// if the id is unknown.
    pub async fn mark_started(&self, id: &LessonId) -> Option<u32> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "mark_started for unknown id, ignoring");
            return None;
        };
        record.status = LessonStatus::InProgress;
        record.attempts += 1;
        let attempts = record.attempts;
        self.touch(&mut inner).await;
        Some(attempts)
    }

    /// Record a successful transfer: terminal `completed`, error cleared
    pub async fn mark_completed(&self, id: &LessonId, output_path: &Path) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "mark_completed for unknown id, ignoring");
            return;
        };
        record.status = LessonStatus::Completed;
        record.output_path = Some(output_path.to_path_buf());
        record.last_error = None;
        self.touch(&mut inner).await;
    }

    /// Record a failed transfer
    ///
    /// Does not touch the attempt counter (already incremented at start);
    /// the record stays retryable while under the attempt cap.
    pub async fn mark_failed(&self, id: &LessonId, reason: &str) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "mark_failed for unknown id, ignoring");
            return;
        };
        record.status = LessonStatus::Failed;
        record.last_error = Some(reason.to_string());
        self.touch(&mut inner).await;
    }

    /// Record a permanent skip; terminal, never retried
    pub async fn mark_skipped(&self, id: &LessonId, reason: &str) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "mark_skipped for unknown id, ignoring");
            return;
        };
        record.status = LessonStatus::Skipped;
        record.last_error = Some(reason.to_string());
        self.touch(&mut inner).await;
    }

    /// Flag a record as needing target re-resolution before scheduling
    ///
    /// Used on resume for eligible records whose cached target URL is
    /// missing, instead of silently skipping them.
    pub async fn mark_needs_extraction(&self, id: &LessonId) {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.state.lessons.iter_mut().find(|l| &l.id == id) else {
            tracing::warn!(lesson_id = %id, "mark_needs_extraction for unknown id, ignoring");
            return;
        };
        record.status = LessonStatus::NeedsExtraction;
        self.touch(&mut inner).await;
    }

    /// Fetch a snapshot of one record
    pub async fn get(&self, id: &LessonId) -> Option<LessonRecord> {
        let inner = self.inner.lock().await;
        inner.state.lessons.iter().find(|l| &l.id == id).cloned()
    }

    /// Records eligible for (re)scheduling, in insertion order
    ///
    /// Eligible means `pending`, `needs_extraction`, or `failed` with
    /// attempts under the cap. `in_progress` records are not returned: they
    /// belong to an active scheduler and must not be double-processed.
    pub async fn pending(&self, max_attempts: u32) -> Vec<LessonRecord> {
        let inner = self.inner.lock().await;
        inner
            .state
            .lessons
            .iter()
            .filter(|l| l.is_eligible(max_attempts))
            .cloned()
            .collect()
    }

    /// Aggregate counts by status
    ///
    /// Full scan; n is bounded by course size (hundreds, not millions).
    /// `in_progress` and `needs_extraction` count as pending — they
    /// represent unfinished work from this or an interrupted run.
    pub async fn stats(&self) -> RunSummary {
        let inner = self.inner.lock().await;
        let mut summary = RunSummary {
            total: inner.state.lessons.len(),
            ..RunSummary::default()
        };
        for lesson in &inner.state.lessons {
            match lesson.status {
                LessonStatus::Completed => summary.completed += 1,
                LessonStatus::Failed => summary.failed += 1,
                LessonStatus::Skipped => summary.skipped += 1,
                LessonStatus::Pending
                | LessonStatus::NeedsExtraction
                | LessonStatus::InProgress => summary.pending += 1,
            }
        }
        summary
    }

    /// Snapshot of the full course state
    pub async fn snapshot(&self) -> CourseState {
        let inner = self.inner.lock().await;
        inner.state.clone()
    }

    /// Durably write the full state, overwriting prior content
    ///
    /// Writes to `<path>.tmp` and renames over the document so a crash mid-
    /// write never leaves a half-written file that parses as valid state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WriteFailed`] if the document cannot be
    /// written at all — the one persistence failure treated as fatal.
    pub async fn persist(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.persist_locked(&mut inner).await?;
        Ok(())
    }

    async fn persist_locked(&self, inner: &mut LedgerInner) -> Result<()> {
        inner.state.last_updated = chrono::Utc::now();
        let json = serde_json::to_vec_pretty(&inner.state).map_err(LedgerError::Serialize)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LedgerError::WriteFailed {
                    path: self.path.clone(),
                    source: e,
                })?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &json)
            .await
            .map_err(|e| LedgerError::WriteFailed {
                path: self.path.clone(),
                source: e,
            })?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| LedgerError::WriteFailed {
                path: self.path.clone(),
                source: e,
            })?;

        inner.unflushed = 0;
        tracing::debug!(path = %self.path.display(), "Ledger persisted");
        Ok(())
    }

    /// Bump the mutation counter and auto-flush once the bound is reached
    ///
    /// A failed auto-flush is logged and leaves the counter intact, so the
    /// next explicit `persist()` retries and surfaces the error to the
    /// coordinator.
    async fn touch(&self, inner: &mut LedgerInner) {
        inner.state.last_updated = chrono::Utc::now();
        inner.unflushed += 1;
        if inner.unflushed >= self.flush_every
            && let Err(e) = self.persist_locked(inner).await
        {
            tracing::error!(path = %self.path.display(), error = %e, "Ledger auto-flush failed");
        }
    }
}
