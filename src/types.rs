//! Core types for course-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier of a lesson within a course
///
/// The value is an opaque string taken from the source; the library never
/// inspects its structure, only compares it for equality.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LessonId(pub String);

impl LessonId {
    /// Create a new LessonId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LessonId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for LessonId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for LessonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lesson status within the ledger state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LessonStatus {
    /// Discovered and waiting to be downloaded
    Pending,
    /// Eligible for retry but the cached target URL is missing; the
    /// coordinator must re-run extraction before scheduling
    NeedsExtraction,
    /// An executor is currently working on it
    InProgress,
    /// Artifact downloaded successfully
    Completed,
    /// Last attempt failed; retryable while under the attempt cap
    Failed,
    /// Permanently skipped (no target, or authentication required)
    Skipped,
}

impl std::fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LessonStatus::Pending => "pending",
            LessonStatus::NeedsExtraction => "needs_extraction",
            LessonStatus::InProgress => "in_progress",
            LessonStatus::Completed => "completed",
            LessonStatus::Failed => "failed",
            LessonStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Which executor must handle a resolved target
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetKind {
    /// Video hosted by a streaming provider, fetched via the media backend
    Media {
        /// Provider label (e.g. "vimeo", "wistia") — informational only,
        /// the media backend receives it verbatim
        provider: String,
    },
    /// Plain file fetched with a direct HTTP GET
    Resource,
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetKind::Media { provider } => write!(f, "media:{}", provider),
            TargetKind::Resource => write!(f, "resource"),
        }
    }
}

/// One unit of work in the ledger
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LessonRecord {
    /// Stable identifier from the source, unique within a course
    pub id: LessonId,
    /// Ordinal position of the containing module (for output naming)
    pub module_index: usize,
    /// Ordinal position within the module (for output naming)
    pub lesson_index: usize,
    /// Display title of the containing module
    pub module_title: String,
    /// Display title of the lesson
    pub lesson_title: String,
    /// Opaque locator the extractor resolves targets from; persisted so a
    /// resume can re-run extraction when the cached target URL is missing
    #[serde(default)]
    pub source_locator: String,
    /// Resolved download URL; absent until extraction succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    /// Which executor handles the target; absent until extraction succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_kind: Option<TargetKind>,
    /// Current state-machine position
    pub status: LessonStatus,
    /// Final artifact location, set on completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Human-readable reason for the last failure or skip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Number of executor invocations so far; only ever increases
    #[serde(default)]
    pub attempts: u32,
}

impl LessonRecord {
    /// Whether this record may be (re)scheduled given the attempt cap
    ///
    /// Eligible iff `pending`, `needs_extraction`, or `failed` with attempts
    /// still under the cap. Terminal statuses and in-flight work are never
    /// eligible.
    pub fn is_eligible(&self, max_attempts: u32) -> bool {
        match self.status {
            LessonStatus::Pending | LessonStatus::NeedsExtraction => true,
            LessonStatus::Failed => self.attempts < max_attempts,
            _ => false,
        }
    }
}

/// The ledger's persisted root: everything known about one course
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CourseState {
    /// Source the course was discovered from
    pub source_url: String,
    /// Display name of the course
    pub course_name: String,
    /// When the first run for this course started
    pub started_at: DateTime<Utc>,
    /// Last time the state was mutated
    pub last_updated: DateTime<Utc>,
    /// Lesson records in discovery order
    pub lessons: Vec<LessonRecord>,
}

impl CourseState {
    /// Create an empty state for a fresh course
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            source_url: String::new(),
            course_name: String::new(),
            started_at: now,
            last_updated: now,
            lessons: Vec::new(),
        }
    }
}

impl Default for CourseState {
    fn default() -> Self {
        Self::new()
    }
}

/// One lesson as enumerated by the external discovery collaborator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LessonDescriptor {
    /// Stable identifier from the source
    pub id: LessonId,
    /// Ordinal position of the containing module
    pub module_index: usize,
    /// Ordinal position within the module
    pub lesson_index: usize,
    /// Display title of the containing module
    pub module_title: String,
    /// Display title of the lesson
    pub lesson_title: String,
    /// Opaque locator the extractor needs to resolve a concrete target
    pub source_locator: String,
}

/// Concrete downloadable target produced by the external extractor
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// Resolved download URL
    pub url: String,
    /// Which executor must handle it
    pub kind: TargetKind,
}

/// Aggregate lesson counts, reported at the end of a run and by `status()`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Total lessons known to the ledger
    pub total: usize,
    /// Lessons with a downloaded artifact
    pub completed: usize,
    /// Lessons whose last attempt failed
    pub failed: usize,
    /// Lessons still waiting (pending, needs_extraction, or in_progress)
    pub pending: usize,
    /// Lessons permanently skipped
    pub skipped: usize,
}

/// Advisory percentage update for a long transfer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// Lesson the transfer belongs to
    pub lesson_id: LessonId,
    /// Completion estimate in percent, 0.0–100.0
    pub percent: f64,
}

/// Events emitted on the broadcast channel
///
/// Consumers subscribe via `CourseDownloader::subscribe()`; progress events
/// are advisory and never influence scheduling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A lesson was accepted by the download queue
    LessonQueued {
        /// Lesson identifier
        id: LessonId,
    },
    /// An executor invocation began (attempt count already incremented)
    LessonStarted {
        /// Lesson identifier
        id: LessonId,
        /// Attempt number for this invocation (1-based)
        attempt: u32,
    },
    /// Incremental progress for a long transfer
    LessonProgress {
        /// Lesson identifier
        id: LessonId,
        /// Completion estimate in percent, 0.0–100.0
        percent: f64,
    },
    /// A lesson's artifact landed on disk
    LessonCompleted {
        /// Lesson identifier
        id: LessonId,
        /// Final artifact location
        output_path: PathBuf,
    },
    /// A lesson's transfer failed (retryable up to the attempt cap)
    LessonFailed {
        /// Lesson identifier
        id: LessonId,
        /// Classified failure reason
        error: String,
    },
    /// A lesson was permanently skipped
    LessonSkipped {
        /// Lesson identifier
        id: LessonId,
        /// Why it was skipped
        reason: String,
    },
    /// A run finished and the ledger was persisted
    RunFinished {
        /// Aggregate counts at the end of the run
        summary: RunSummary,
    },
}
