//! End-to-end pipeline tests: discovery seeding, scheduling against a real
//! HTTP server, crash-resume, and failure degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use course_dl::{
    Config, CourseDownloader, CourseSource, Discovery, Error, Extractor, Ledger, LessonDescriptor,
    LessonId, LessonStatus, ResolvedTarget, RunOptions, TargetKind,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct StubDiscovery {
    lessons: Vec<LessonDescriptor>,
    calls: AtomicUsize,
}

impl StubDiscovery {
    fn new(lessons: Vec<LessonDescriptor>) -> Self {
        Self {
            lessons,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Discovery for StubDiscovery {
    async fn discover(&self, _source: &CourseSource) -> course_dl::Result<Vec<LessonDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.lessons.clone())
    }
}

struct FailingDiscovery;

#[async_trait]
impl Discovery for FailingDiscovery {
    async fn discover(&self, source: &CourseSource) -> course_dl::Result<Vec<LessonDescriptor>> {
        Err(Error::Discovery(format!("cannot reach {}", source.url)))
    }
}

/// Maps locators to targets; locators absent from the map resolve to None
struct MapExtractor {
    targets: HashMap<String, ResolvedTarget>,
    calls: AtomicUsize,
}

impl MapExtractor {
    fn new(targets: HashMap<String, ResolvedTarget>) -> Self {
        Self {
            targets,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Extractor for MapExtractor {
    async fn resolve(&self, locator: &str) -> course_dl::Result<Option<ResolvedTarget>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.targets.get(locator).cloned())
    }
}

fn lesson(id: &str, module: usize, index: usize) -> LessonDescriptor {
    LessonDescriptor {
        id: LessonId::new(id),
        module_index: module,
        lesson_index: index,
        module_title: format!("Module {}", module),
        lesson_title: format!("Lesson {}", id),
        source_locator: format!("locator:{}", id),
    }
}

fn resource(url: &str) -> ResolvedTarget {
    ResolvedTarget {
        url: url.to_string(),
        kind: TargetKind::Resource,
    }
}

fn test_config(dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.persistence.state_dir = dir.path().join("state");
    config.download.request_timeout_secs = 10;
    config
}

fn course() -> CourseSource {
    CourseSource {
        url: "https://learn.example.com/courses/42".into(),
        name: "Test Course".into(),
    }
}

async fn serve_ok(server: &MockServer, route: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/pdf")
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_full_run_downloads_every_discovered_lesson() {
    let server = MockServer::start().await;
    serve_ok(&server, "/a.pdf", b"content a").await;
    serve_ok(&server, "/b.pdf", b"content b").await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();

    let discovery = StubDiscovery::new(vec![lesson("a", 1, 1), lesson("b", 1, 2)]);
    let extractor = MapExtractor::new(HashMap::from([
        ("locator:a".into(), resource(&format!("{}/a.pdf", server.uri()))),
        ("locator:b".into(), resource(&format!("{}/b.pdf", server.uri()))),
    ]));

    let summary = downloader
        .run(&course(), &discovery, &extractor, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 0);

    let artifact = dir
        .path()
        .join("downloads/test-course/01-01 Lesson a.pdf");
    assert_eq!(std::fs::read(&artifact).unwrap(), b"content a");

    // ledger is on disk and inspectable
    let state_file = dir.path().join("state/test-course.json");
    let raw = std::fs::read_to_string(&state_file).unwrap();
    assert!(raw.contains("\"completed\""), "ledger must be human-readable JSON");
}

#[tokio::test]
async fn test_resume_skips_discovery_and_retries_only_eligible() {
    let server = MockServer::start().await;
    serve_ok(&server, "/ok.pdf", b"fine").await;
    Mock::given(method("GET"))
        .and(path("/locked.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();

    let discovery = StubDiscovery::new(vec![
        lesson("ok", 1, 1),
        lesson("locked", 1, 2),
        lesson("flaky", 1, 3),
    ]);
    let extractor = MapExtractor::new(HashMap::from([
        ("locator:ok".into(), resource(&format!("{}/ok.pdf", server.uri()))),
        ("locator:locked".into(), resource(&format!("{}/locked.pdf", server.uri()))),
        ("locator:flaky".into(), resource(&format!("{}/flaky.pdf", server.uri()))),
    ]));

    let first = downloader
        .run(&course(), &discovery, &extractor, RunOptions::default())
        .await
        .unwrap();
    assert_eq!(first.completed, 1);
    assert_eq!(first.skipped, 1, "403 must degrade to skipped");
    assert_eq!(first.failed, 1);
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);

    // second run resumes: no discovery, only the failed item is retried
    let second = downloader
        .run(&course(), &discovery, &extractor, RunOptions { resume: true })
        .await
        .unwrap();
    assert_eq!(
        discovery.calls.load(Ordering::SeqCst),
        1,
        "resume must not re-run discovery"
    );
    assert_eq!(second.completed, 1, "completed work is never redone");
    assert_eq!(second.skipped, 1, "skipped is terminal");
    assert_eq!(second.failed, 1);

    // the flaky item accrued a second attempt
    let ledger = Ledger::new(dir.path().join("state/test-course.json"), 25);
    assert!(ledger.load().await);
    let flaky = ledger.get(&LessonId::new("flaky")).await.unwrap();
    assert_eq!(flaky.attempts, 2);
    assert_eq!(flaky.status, LessonStatus::Failed);

    let locked = ledger.get(&LessonId::new("locked")).await.unwrap();
    assert_eq!(locked.attempts, 1, "skipped items must not be re-attempted");
}

#[tokio::test]
async fn test_attempt_cap_retires_persistent_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.pdf"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();
    let discovery = StubDiscovery::new(vec![lesson("broken", 1, 1)]);
    let extractor = MapExtractor::new(HashMap::from([(
        "locator:broken".into(),
        resource(&format!("{}/broken.pdf", server.uri())),
    )]));

    for _ in 0..3 {
        downloader
            .run(&course(), &discovery, &extractor, RunOptions { resume: true })
            .await
            .unwrap();
    }

    let ledger = Ledger::new(dir.path().join("state/test-course.json"), 25);
    ledger.load().await;
    let broken = ledger.get(&LessonId::new("broken")).await.unwrap();
    assert_eq!(broken.attempts, 3);

    // a fourth run schedules nothing for it
    downloader
        .run(&course(), &discovery, &extractor, RunOptions { resume: true })
        .await
        .unwrap();
    ledger.load().await;
    let broken = ledger.get(&LessonId::new("broken")).await.unwrap();
    assert_eq!(broken.attempts, 3, "attempt cap must retire the item");
}

#[tokio::test]
async fn test_extraction_miss_degrades_to_skipped() {
    let server = MockServer::start().await;
    serve_ok(&server, "/good.pdf", b"data").await;

    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();
    let discovery = StubDiscovery::new(vec![lesson("good", 1, 1), lesson("mystery", 1, 2)]);
    // "mystery" has no mapping: extraction yields None
    let extractor = MapExtractor::new(HashMap::from([(
        "locator:good".into(),
        resource(&format!("{}/good.pdf", server.uri())),
    )]));

    let summary = downloader
        .run(&course(), &discovery, &extractor, RunOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped, 1);

    let ledger = Ledger::new(dir.path().join("state/test-course.json"), 25);
    ledger.load().await;
    let mystery = ledger.get(&LessonId::new("mystery")).await.unwrap();
    assert_eq!(mystery.status, LessonStatus::Skipped);
    assert_eq!(mystery.last_error.as_deref(), Some("no target found"));
    assert_eq!(mystery.attempts, 0, "skipped at seed time, never enqueued");
}

#[tokio::test]
async fn test_discovery_failure_is_fatal_but_state_persists() {
    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();
    let extractor = MapExtractor::new(HashMap::new());

    let err = downloader
        .run(&course(), &FailingDiscovery, &extractor, RunOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Discovery(_)));

    // ledger still persisted on the error path
    assert!(dir.path().join("state/test-course.json").exists());
    let status = downloader.status(&course()).await;
    assert_eq!(status.total, 0);
}

#[tokio::test]
async fn test_eligible_record_without_target_is_re_extracted_on_resume() {
    let server = MockServer::start().await;
    serve_ok(&server, "/late.pdf", b"finally").await;

    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    // Craft a prior-run ledger: a pending record with no cached target URL
    let ledger = Ledger::new(dir.path().join("state/test-course.json"), 25);
    ledger
        .initialize("https://learn.example.com/courses/42", "Test Course")
        .await;
    ledger.add_lesson(&lesson("late", 2, 3)).await;
    ledger.persist().await.unwrap();

    let downloader = CourseDownloader::new(config).unwrap();
    let discovery = StubDiscovery::new(vec![]);
    let extractor = MapExtractor::new(HashMap::from([(
        "locator:late".into(),
        resource(&format!("{}/late.pdf", server.uri())),
    )]));

    let summary = downloader
        .run(&course(), &discovery, &extractor, RunOptions { resume: true })
        .await
        .unwrap();

    assert_eq!(
        extractor.calls.load(Ordering::SeqCst),
        1,
        "missing target must be re-extracted, not silently skipped"
    );
    assert_eq!(summary.completed, 1);

    let artifact = dir.path().join("downloads/test-course/02-03 Lesson late.pdf");
    assert_eq!(std::fs::read(&artifact).unwrap(), b"finally");
}

#[tokio::test]
async fn test_status_reports_without_running_work() {
    let dir = tempfile::tempdir().unwrap();
    let downloader = CourseDownloader::new(test_config(&dir)).unwrap();

    // nothing persisted yet: all-zero summary
    let empty = downloader.status(&course()).await;
    assert_eq!(empty.total, 0);

    let ledger = Ledger::new(dir.path().join("state/test-course.json"), 25);
    ledger.initialize("https://learn.example.com/courses/42", "Test Course").await;
    ledger.add_lesson(&lesson("a", 1, 1)).await;
    ledger.persist().await.unwrap();

    let status = downloader.status(&course()).await;
    assert_eq!(status.total, 1);
    assert_eq!(status.pending, 1);
}
