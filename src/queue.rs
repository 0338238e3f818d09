//! Download queue — bounded-concurrency scheduler
//!
//! Accepts work items in FIFO order and runs at most `concurrency` executor
//! invocations at once. Each dequeued item is mapped to exactly one ledger
//! transition sequence: `mark_started`, execute, then exactly one of
//! `mark_completed` / `mark_failed` / `mark_skipped` — no other component
//! observes an intermediate state.
//!
//! Items are dequeued in enqueue order when concurrency slots open up, but
//! completion order is unconstrained. Pausing the queue stops new dequeues;
//! in-flight transfers always finish naturally (the per-transfer timeout
//! inside the executor is the only bounded-duration guarantee).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify, Semaphore, broadcast};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result, TransferError};
use crate::executor::{ExecutorSet, ProgressFn, TransferRequest};
use crate::ledger::Ledger;
use crate::types::{Event, LessonId, TargetKind};

/// Interval between queue polling attempts when the queue is empty or paused
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Skip reason recorded when a transfer is refused for missing credentials
pub const AUTH_REQUIRED_REASON: &str = "Authentication required";

/// One item of work referencing a ledger record
#[derive(Clone, Debug)]
pub struct WorkItem {
    /// Ledger record the item belongs to
    pub lesson_id: LessonId,
    /// Resolved target URL
    pub url: String,
    /// Executor-selection metadata
    pub kind: TargetKind,
    /// Destination path without a guaranteed extension
    pub dest_stem: PathBuf,
}

struct QueueState {
    queue: Mutex<VecDeque<WorkItem>>,
    concurrent_limit: Arc<Semaphore>,
    paused: AtomicBool,
    accepting_new: AtomicBool,
    enqueued: AtomicUsize,
    finished: AtomicUsize,
    done: Notify,
}

/// Bounded-concurrency download scheduler
///
/// Cloneable; all clones share the same queue and counters.
#[derive(Clone)]
pub struct DownloadQueue {
    state: Arc<QueueState>,
    ledger: Arc<Ledger>,
    executors: ExecutorSet,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl DownloadQueue {
    /// Create a queue with a fixed concurrency bound
    ///
    /// The bound is never exceeded regardless of how many items are
    /// enqueued. Call [`DownloadQueue::start_processor`] to begin draining.
    pub fn new(
        ledger: Arc<Ledger>,
        executors: ExecutorSet,
        concurrency: usize,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        Self {
            state: Arc::new(QueueState {
                queue: Mutex::new(VecDeque::new()),
                concurrent_limit: Arc::new(Semaphore::new(concurrency)),
                paused: AtomicBool::new(false),
                accepting_new: AtomicBool::new(true),
                enqueued: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                done: Notify::new(),
            }),
            ledger,
            executors,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Accept a work item
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] once `shutdown()` has been called.
    pub async fn enqueue(&self, item: WorkItem) -> Result<()> {
        if !self.state.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }
        self.emit(Event::LessonQueued {
            id: item.lesson_id.clone(),
        });
        self.state.enqueued.fetch_add(1, Ordering::SeqCst);
        self.state.queue.lock().await.push_back(item);
        Ok(())
    }

    /// Prevent new dequeues; active transfers finish naturally
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
    }

    /// Allow dequeues again after a pause
    pub fn unpause(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
    }

    /// Stop accepting work and wind down the processor loop
    ///
    /// In-flight transfers still finish; queued-but-unstarted items are left
    /// in their current ledger state for the next run to pick up.
    pub fn shutdown(&self) {
        self.state.accepting_new.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    /// Suspend the caller until every enqueued item has finished
    ///
    /// "Finished" means the item's terminal ledger transition has been
    /// recorded. Does not retry failures; retry is an explicit re-enqueue on
    /// a subsequent run.
    pub async fn wait_for_all(&self) {
        loop {
            let notified = self.state.done.notified();
            if self.state.finished.load(Ordering::SeqCst)
                >= self.state.enqueued.load(Ordering::SeqCst)
            {
                return;
            }
            notified.await;
        }
    }

    /// Start the processor task
    ///
    /// The task continuously takes the next queued item, waits for a
    /// concurrency permit, and spawns the item's transfer. It exits when
    /// `shutdown()` is called.
    pub fn start_processor(&self) -> tokio::task::JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                if queue.cancel.is_cancelled() {
                    break;
                }
                if queue.state.paused.load(Ordering::SeqCst) {
                    tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
                    continue;
                }

                let item = { queue.state.queue.lock().await.pop_front() };

                if let Some(item) = item {
                    let permit = tokio::select! {
                        permit = queue.state.concurrent_limit.clone().acquire_owned() => {
                            match permit {
                                Ok(p) => p,
                                Err(_) => break, // semaphore closed
                            }
                        }
                        _ = queue.cancel.cancelled() => {
                            // Re-queue so the item is not lost before shutdown
                            // persists state.
                            queue.state.queue.lock().await.push_front(item);
                            break;
                        }
                    };

                    let worker = queue.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.run_item(item).await;
                        worker.state.finished.fetch_add(1, Ordering::SeqCst);
                        worker.state.done.notify_waiters();
                    });
                } else {
                    tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
                }
            }
        })
    }

    /// The atomic unit of scheduling: started, executed, one terminal mark
    async fn run_item(&self, item: WorkItem) {
        let id = item.lesson_id.clone();

        let Some(attempt) = self.ledger.mark_started(&id).await else {
            // Unknown id — ledger already logged it; nothing to transfer.
            return;
        };
        self.emit(Event::LessonStarted {
            id: id.clone(),
            attempt,
        });
        tracing::info!(lesson_id = %id, attempt, target = %item.kind, "Transfer started");

        let executor = self.executors.select(&item.kind);
        let request = TransferRequest {
            lesson_id: id.clone(),
            url: item.url.clone(),
            dest_stem: item.dest_stem.clone(),
        };
        let progress = self.progress_fn();

        match executor.execute(&request, progress).await {
            Ok(outcome) => {
                self.ledger.mark_completed(&id, &outcome.final_path).await;
                tracing::info!(
                    lesson_id = %id,
                    path = %outcome.final_path.display(),
                    "Transfer completed"
                );
                self.emit(Event::LessonCompleted {
                    id,
                    output_path: outcome.final_path,
                });
            }
            Err(e @ TransferError::AuthRequired { .. }) => {
                // Not retryable by changing nothing: terminal skip, not a
                // failure that burns attempts.
                self.ledger.mark_skipped(&id, AUTH_REQUIRED_REASON).await;
                tracing::warn!(lesson_id = %id, error = %e, "Transfer skipped");
                self.emit(Event::LessonSkipped {
                    id,
                    reason: AUTH_REQUIRED_REASON.to_string(),
                });
            }
            Err(e) => {
                let reason = e.to_string();
                self.ledger.mark_failed(&id, &reason).await;
                tracing::warn!(lesson_id = %id, error = %reason, "Transfer failed");
                self.emit(Event::LessonFailed { id, error: reason });
            }
        }
    }

    /// Advisory progress hook forwarded to executors
    fn progress_fn(&self) -> ProgressFn {
        let event_tx = self.event_tx.clone();
        Arc::new(move |update| {
            event_tx
                .send(Event::LessonProgress {
                    id: update.lesson_id,
                    percent: update.percent,
                })
                .ok();
        })
    }

    fn emit(&self, event: Event) {
        // send() fails only when nobody is subscribed, which is fine
        self.event_tx.send(event).ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{DownloadExecutor, TransferOutcome};
    use crate::types::{LessonDescriptor, LessonStatus};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI32;

    /// Executor that sleeps, tracks concurrency, and succeeds or fails by URL
    struct FakeExecutor {
        active: AtomicI32,
        max_seen: AtomicI32,
        delay: Duration,
    }

    impl FakeExecutor {
        fn slow() -> Self {
            Self {
                active: AtomicI32::new(0),
                max_seen: AtomicI32::new(0),
                delay: Duration::from_millis(100),
            }
        }
    }

    #[async_trait]
    impl DownloadExecutor for FakeExecutor {
        async fn execute(
            &self,
            request: &TransferRequest,
            _progress: ProgressFn,
        ) -> std::result::Result<TransferOutcome, TransferError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.url.contains("fail") {
                Err(TransferError::HttpStatus { status: 500 })
            } else if request.url.contains("auth") {
                Err(TransferError::AuthRequired { status: 403 })
            } else {
                Ok(TransferOutcome {
                    final_path: request.dest_stem.with_extension("mp4"),
                })
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn descriptor(id: &str) -> LessonDescriptor {
        LessonDescriptor {
            id: LessonId::new(id),
            module_index: 0,
            lesson_index: 0,
            module_title: "M".into(),
            lesson_title: id.to_string(),
            source_locator: String::new(),
        }
    }

    fn work_item(id: &str, url: &str) -> WorkItem {
        WorkItem {
            lesson_id: LessonId::new(id),
            url: url.to_string(),
            kind: TargetKind::Resource,
            dest_stem: PathBuf::from(format!("out/{}", id)),
        }
    }

    async fn queue_with(
        executor: Arc<FakeExecutor>,
        concurrency: usize,
        dir: &tempfile::TempDir,
    ) -> (DownloadQueue, Arc<Ledger>) {
        let ledger = Arc::new(Ledger::new(dir.path().join("course.json"), 1000));
        let set = ExecutorSet::new(executor.clone(), executor);
        let (event_tx, _rx) = broadcast::channel(1000);
        let queue = DownloadQueue::new(Arc::clone(&ledger), set, concurrency, event_tx);
        (queue, ledger)
    }

    #[tokio::test]
    async fn test_concurrency_bound_is_never_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, ledger) = queue_with(Arc::clone(&executor), 2, &dir).await;

        for i in 0..10 {
            let id = format!("l{}", i);
            ledger.add_lesson(&descriptor(&id)).await;
            queue
                .enqueue(work_item(&id, "https://cdn.example.com/ok"))
                .await
                .unwrap();
        }

        let handle = queue.start_processor();
        queue.wait_for_all().await;
        queue.shutdown();
        handle.await.unwrap();

        assert!(
            executor.max_seen.load(Ordering::SeqCst) <= 2,
            "observed {} concurrent transfers with a bound of 2",
            executor.max_seen.load(Ordering::SeqCst)
        );
        assert_eq!(ledger.stats().await.completed, 10);
    }

    #[tokio::test]
    async fn test_each_item_gets_exactly_one_terminal_transition() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, ledger) = queue_with(executor, 2, &dir).await;

        for (id, url) in [
            ("ok1", "https://cdn.example.com/ok"),
            ("bad", "https://cdn.example.com/fail"),
            ("locked", "https://cdn.example.com/auth"),
        ] {
            ledger.add_lesson(&descriptor(id)).await;
            queue.enqueue(work_item(id, url)).await.unwrap();
        }

        let handle = queue.start_processor();
        queue.wait_for_all().await;
        queue.shutdown();
        handle.await.unwrap();

        let ok = ledger.get(&LessonId::new("ok1")).await.unwrap();
        assert_eq!(ok.status, LessonStatus::Completed);
        assert_eq!(ok.attempts, 1, "attempts must equal scheduler invocations");

        let bad = ledger.get(&LessonId::new("bad")).await.unwrap();
        assert_eq!(bad.status, LessonStatus::Failed);
        assert_eq!(bad.last_error.as_deref(), Some("HTTP error status 500"));
        assert_eq!(bad.attempts, 1);

        let locked = ledger.get(&LessonId::new("locked")).await.unwrap();
        assert_eq!(
            locked.status,
            LessonStatus::Skipped,
            "403 must degrade to skipped, not failed"
        );
        assert_eq!(locked.last_error.as_deref(), Some(AUTH_REQUIRED_REASON));
    }

    #[tokio::test]
    async fn test_pause_prevents_new_dequeues() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, ledger) = queue_with(executor, 2, &dir).await;

        queue.pause();
        ledger.add_lesson(&descriptor("l1")).await;
        queue
            .enqueue(work_item("l1", "https://cdn.example.com/ok"))
            .await
            .unwrap();

        let handle = queue.start_processor();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            ledger.get(&LessonId::new("l1")).await.unwrap().status,
            LessonStatus::Pending,
            "paused queue must not start work"
        );

        queue.unpause();
        queue.wait_for_all().await;
        queue.shutdown();
        handle.await.unwrap();
        assert_eq!(
            ledger.get(&LessonId::new("l1")).await.unwrap().status,
            LessonStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_enqueue_after_shutdown_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, _ledger) = queue_with(executor, 2, &dir).await;

        queue.shutdown();
        let err = queue
            .enqueue(work_item("l1", "https://cdn.example.com/ok"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ShuttingDown));
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_lifecycle_order() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, ledger) = queue_with(executor, 1, &dir).await;
        let mut events = queue.event_tx.subscribe();

        ledger.add_lesson(&descriptor("l1")).await;
        queue
            .enqueue(work_item("l1", "https://cdn.example.com/ok"))
            .await
            .unwrap();

        let handle = queue.start_processor();
        queue.wait_for_all().await;
        queue.shutdown();
        handle.await.unwrap();

        let first = events.recv().await.unwrap();
        assert!(matches!(first, Event::LessonQueued { .. }));
        let second = events.recv().await.unwrap();
        assert!(matches!(second, Event::LessonStarted { attempt: 1, .. }));
        let third = events.recv().await.unwrap();
        assert!(matches!(third, Event::LessonCompleted { .. }));
    }

    #[tokio::test]
    async fn test_wait_for_all_returns_immediately_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(FakeExecutor::slow());
        let (queue, _ledger) = queue_with(executor, 2, &dir).await;

        // no processor, nothing enqueued
        tokio::time::timeout(Duration::from_millis(100), queue.wait_for_all())
            .await
            .expect("idle wait_for_all must not block");
    }
}
