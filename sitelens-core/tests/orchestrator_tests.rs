// End-to-end tests for the audit state machine

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use sitelens_core::collaborators::{
    AuditEvent, AuditStore, Collaborators, DiagnosticsProvider, DiagnosticsStrategy, ImageStore,
    Notifier, PerformanceDiagnostics, ScreenCapture, Site, SummaryGenerator, VisionAnalyzer,
};
use sitelens_core::config::AuditConfig;
use sitelens_core::data::Database;
use sitelens_core::error::{AuditError, StoreError, StoreResult};
use sitelens_core::orchestrator::{Auditor, SCAN_PROGRESS_CEILING};
use sitelens_core::run::{AuditRun, Progress, RunStatus, RunUpdate};
use sitelens_core::scoring::{CategoryScores, score};
use sitelens_scanner::discovery::{CachedSitemap, DiscoveryMethod, StoredEntity};
use sitelens_scanner::issue::{Category, DeviceType, Issue, IssueSource, Severity, messages};
use sitelens_scanner::page::{PageScanner, ScanOptions};
use sitelens_scanner::result::{DeviceCapture, PageScanResult, ScanStrategy};
use sitelens_scanner::{ScanError, StaticAnalyzer};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Fakes
// ============================================================================

struct FakeScanner {
    name: &'static str,
    strategy: ScanStrategy,
    broken: bool,
    full_page: bool,
    calls: AtomicUsize,
}

impl FakeScanner {
    fn working(name: &'static str, strategy: ScanStrategy) -> Self {
        Self {
            name,
            strategy,
            broken: false,
            full_page: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Captures segments but never a full-page screenshot.
    fn segments_only(name: &'static str) -> Self {
        Self {
            full_page: false,
            ..Self::working(name, ScanStrategy::Browser)
        }
    }

    fn broken(name: &'static str) -> Self {
        Self {
            name,
            strategy: ScanStrategy::Failed,
            broken: true,
            full_page: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageScanner for FakeScanner {
    async fn scan(&self, url: &str, _options: &ScanOptions) -> Result<PageScanResult, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        if self.broken {
            return Err(ScanError::BrowserError("browser crashed".to_string()));
        }

        let mut result = PageScanResult::new(url, self.strategy);
        result.status_code = Some(200);
        result.ttfb = Some(Duration::from_millis(90));
        result.html = Some(r#"<html lang="en"><body></body></html>"#.to_string());

        let mut capture = DeviceCapture::new(DeviceType::Desktop);
        if self.full_page {
            capture.screenshot = Some(Bytes::from_static(b"\x89PNG"));
        }
        capture.segments.push(Bytes::from_static(b"\x89PNG"));
        result.captures.push(capture);

        let is_homepage = url::Url::parse(url).is_ok_and(|u| u.path() == "/");
        if is_homepage {
            result.dom.title = Some("Home".to_string());
            result.issues.push(
                Issue::new(Category::Technical, Severity::Warning, messages::MISSING_H1, IssueSource::Browser)
                    .with_url(url),
            );
        }
        Ok(result)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

struct FakeSiteChecks;

#[async_trait]
impl StaticAnalyzer for FakeSiteChecks {
    fn analyze(&self, _html: &str, _url: &str, _headers: &HeaderMap, _ttfb: Duration) -> Vec<Issue> {
        Vec::new()
    }

    async fn check_robots_and_sitemap(&self, base_url: &str) -> Vec<Issue> {
        vec![
            Issue::new(Category::Technical, Severity::Passed, messages::ROBOTS_OK, IssueSource::SiteChecks)
                .with_url(format!("{}robots.txt", base_url)),
        ]
    }
}

#[derive(Default)]
struct FakeDiagnostics {
    urls: Mutex<Vec<String>>,
}

#[async_trait]
impl DiagnosticsProvider for FakeDiagnostics {
    async fn get_diagnostics(
        &self,
        url: &str,
        strategy: DiagnosticsStrategy,
    ) -> Option<PerformanceDiagnostics> {
        assert_eq!(strategy, DiagnosticsStrategy::Mobile);
        self.urls.lock().unwrap().push(url.to_string());
        Some(PerformanceDiagnostics {
            score: Some(0.72),
            lcp: Some(3100.0),
            issues: vec![
                Issue::new(Category::Performance, Severity::Warning, "render_blocking_resources", IssueSource::Diagnostics)
                    .with_url(url),
            ],
            ..Default::default()
        })
    }
}

#[derive(Default)]
struct FakeVision {
    batches: Mutex<Vec<usize>>,
}

#[async_trait]
impl VisionAnalyzer for FakeVision {
    async fn analyze_screens(&self, pages: &[ScreenCapture], site_url: &str) -> Vec<Issue> {
        self.batches.lock().unwrap().push(pages.len());
        vec![
            Issue::new(Category::Visual, Severity::Error, "overlapping_text", IssueSource::Vision)
                .with_url(site_url)
                .with_device(DeviceType::Desktop),
        ]
    }
}

#[derive(Default)]
struct MemoryImages {
    uploads: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageStore for MemoryImages {
    async fn upload_image(&self, _image: Bytes, folder: &str, name: &str) -> Option<String> {
        let reference = format!("mem://{}/{}", folder, name);
        self.uploads.lock().unwrap().push(reference.clone());
        Some(reference)
    }
}

struct FixedSummary;

#[async_trait]
impl SummaryGenerator for FixedSummary {
    async fn summarize(
        &self,
        _issues: &[Issue],
        score: u8,
        _categories: &CategoryScores,
        _url: &str,
        page_count: usize,
    ) -> Option<String> {
        Some(format!("{} pages, score {}", page_count, score))
    }
}

struct ChannelNotifier {
    tx: mpsc::UnboundedSender<(String, AuditEvent)>,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, account_id: &str, event: AuditEvent) {
        let _ = self.tx.send((account_id.to_string(), event));
    }
}

/// Delegates to a real database but refuses writes of the listed statuses.
struct RejectStatuses {
    inner: Arc<Database>,
    rejected: Vec<RunStatus>,
}

#[async_trait]
impl AuditStore for RejectStatuses {
    async fn create_run(&self, run: &AuditRun) -> StoreResult<()> {
        self.inner.create_run(run).await
    }

    async fn update_run(&self, id: &str, update: RunUpdate) -> StoreResult<AuditRun> {
        if update.status.is_some_and(|status| self.rejected.contains(&status)) {
            return Err(StoreError::LockPoisoned);
        }
        self.inner.update_run(id, update).await
    }

    async fn find_site(&self, id: &str) -> StoreResult<Option<Site>> {
        self.inner.find_site(id).await
    }

    async fn find_cached_sitemaps(&self, site_id: &str) -> StoreResult<Vec<CachedSitemap>> {
        self.inner.find_cached_sitemaps(site_id).await
    }

    async fn find_stored_entities(&self, site_id: &str) -> StoreResult<Vec<StoredEntity>> {
        self.inner.find_stored_entities(site_id).await
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    db: Arc<Database>,
    diagnostics: Arc<FakeDiagnostics>,
    vision: Arc<FakeVision>,
    images: Arc<MemoryImages>,
    events: mpsc::UnboundedReceiver<(String, AuditEvent)>,
    collaborators: Collaborators,
}

impl Harness {
    fn new() -> Self {
        let db = Arc::new(Database::in_memory().unwrap());
        let diagnostics = Arc::new(FakeDiagnostics::default());
        let vision = Arc::new(FakeVision::default());
        let images = Arc::new(MemoryImages::default());
        let (tx, events) = mpsc::unbounded_channel();

        let collaborators = Collaborators {
            store: db.clone(),
            static_analyzer: Arc::new(FakeSiteChecks),
            diagnostics: diagnostics.clone(),
            vision: vision.clone(),
            images: images.clone(),
            summary: Arc::new(FixedSummary),
            notifier: Arc::new(ChannelNotifier { tx }),
        };

        Self {
            db,
            diagnostics,
            vision,
            images,
            events,
            collaborators,
        }
    }

    fn site(&self, url: &str) -> Site {
        self.db.insert_site(url, Some("Test"), Some("acct-9"), None).unwrap()
    }

    async fn next_event(&mut self) -> (String, AuditEvent) {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("notification not sent")
            .expect("notifier channel closed")
    }
}

fn test_config() -> AuditConfig {
    let mut config = AuditConfig {
        max_pages: 10,
        scan_concurrency: 2,
        diagnostics_pages: 1,
        ..AuditConfig::default()
    };
    config.discovery.robots_timeout_secs = 2;
    config.discovery.sitemap_timeout_secs = 2;
    config.discovery.api_timeout_secs = 2;
    config.discovery.crawl_timeout_secs = 2;
    config
}

async fn site_with_sitemap() -> MockServer {
    let server = MockServer::start().await;
    let uri = server.uri();
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"><url><loc>{0}/</loc></url><url><loc>{0}/about</loc></url><url><loc>{0}/contact</loc></url></urlset>"#,
        uri
    );
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/xml")
                .set_body_string(body),
        )
        .mount(&server)
        .await;
    server
}

fn recording_callback() -> (Arc<Mutex<Vec<Progress>>>, sitelens_core::ProgressCallback) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: sitelens_core::ProgressCallback =
        Arc::new(move |p: &Progress| sink.lock().unwrap().push(p.clone()));
    (seen, callback)
}

// ============================================================================
// Completed Run Tests
// ============================================================================

#[tokio::test]
async fn test_completed_audit() {
    let server = site_with_sitemap().await;
    let mut harness = Harness::new();
    let site = harness.site(&server.uri());
    let browser = Arc::new(FakeScanner::working("browser", ScanStrategy::Browser));
    let fetch = Arc::new(FakeScanner::working("fetch", ScanStrategy::Fetch));
    let (progress, callback) = recording_callback();

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(browser.clone())
        .with_fetch_scanner(fetch.clone())
        .with_progress_callback(callback);

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.discovery_method, Some(DiscoveryMethod::Sitemap));
    assert!(run.has_sitemap);
    assert_eq!(run.pages_found, 3);
    assert_eq!(run.pages_scanned, 3);
    assert!(run.counts_toward_usage);
    assert!(run.started_at.is_some());
    assert!(run.completed_at.is_some());
    assert_eq!(browser.calls(), 3);
    assert_eq!(fetch.calls(), 0);

    // Pages keep discovery order, homepage first
    let homepage = format!("{}/", server.uri());
    let urls: Vec<&str> = run.pages.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            homepage.clone(),
            format!("{}/about", server.uri()),
            format!("{}/contact", server.uri())
        ]
    );
    assert_eq!(run.pages[0].title, "Home");
    assert_eq!(run.pages[1].title, "/about");
    assert_eq!(run.pages[1].language.as_deref(), Some("en"));
    assert!(run.pages[0].diagnostics.is_some());
    assert!(run.pages[1].diagnostics.is_none());
    assert_eq!(*harness.diagnostics.urls.lock().unwrap(), vec![homepage.clone()]);

    // Issues from scans, diagnostics, site checks and vision
    let names: Vec<&str> = run.issues.iter().map(|i| i.message.as_str()).collect();
    assert!(names.contains(&messages::MISSING_H1));
    assert!(names.contains(&"render_blocking_resources"));
    assert!(names.contains(&messages::ROBOTS_OK));
    assert!(names.contains(&"overlapping_text"));
    assert_eq!(*harness.vision.batches.lock().unwrap(), vec![3]);

    let card = score(&run.issues);
    assert_eq!(run.overall_score, Some(card.overall));
    assert_eq!(run.category_scores, Some(card.categories));
    assert_eq!(card.categories.visual, 90);
    assert_eq!(run.summary.as_deref(), Some(format!("3 pages, score {}", card.overall).as_str()));

    // Images
    let run_prefix = format!("mem://{}", run.id);
    assert_eq!(
        run.homepage_screenshots.desktop,
        Some(format!("{}/homepage/desktop.png", run_prefix))
    );
    assert!(run.homepage_screenshots.mobile.is_none());
    assert_eq!(
        run.pages[2].screenshots.desktop,
        Some(format!("{}/pages/2/desktop.png", run_prefix))
    );
    assert_eq!(run.pages[2].segments.len(), 1);
    assert_eq!(run.pages[2].segments[0].url, format!("{}/pages/2/desktop-segment-0.png", run_prefix));
    assert_eq!(harness.images.uploads.lock().unwrap().len(), 7);

    // Final state matches what was persisted
    assert_eq!(run.progress.percentage, 100);
    assert_eq!(run.progress.label, "Audit complete");
    assert_eq!(harness.db.get_run(&run.id).unwrap().unwrap(), run);

    let (account, event) = harness.next_event().await;
    assert_eq!(account, "acct-9");
    assert_eq!(
        event,
        AuditEvent::AuditCompleted {
            run_id: run.id.clone(),
            site_id: site.id.clone(),
            site_url: site.url.clone(),
            score: card.overall,
        }
    );

    let progress = progress.lock().unwrap();
    assert!(progress.len() >= 7);
    assert!(
        progress.windows(2).all(|w| w[0].percentage <= w[1].percentage),
        "progress went backwards: {:?}",
        progress.iter().map(|p| p.percentage).collect::<Vec<_>>()
    );
    let scan_steps: Vec<&Progress> = progress
        .iter()
        .filter(|p| p.label.starts_with("Scanned "))
        .collect();
    assert_eq!(scan_steps.len(), 3);
    assert!(scan_steps.iter().all(|p| p.percentage <= SCAN_PROGRESS_CEILING));
    assert_eq!(progress.last().unwrap().label, "Audit complete");
}

#[tokio::test]
async fn test_browser_failure_falls_back_to_fetch() {
    let server = site_with_sitemap().await;
    let harness = Harness::new();
    let site = harness.site(&server.uri());
    let browser = Arc::new(FakeScanner::broken("browser"));
    let fetch = Arc::new(FakeScanner::working("fetch", ScanStrategy::Fetch));

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(browser.clone())
        .with_fetch_scanner(fetch.clone());

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(browser.calls(), 3);
    assert_eq!(fetch.calls(), 3);
    assert!(run.pages.iter().all(|p| p.strategy == ScanStrategy::Fetch));
}

#[tokio::test]
async fn test_unreachable_pages_still_complete() {
    let server = site_with_sitemap().await;
    let harness = Harness::new();
    let site = harness.site(&server.uri());

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(Arc::new(FakeScanner::broken("browser")))
        .with_fetch_scanner(Arc::new(FakeScanner::broken("fetch")));

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.pages_scanned, 3);
    assert!(run.pages.iter().all(|p| p.strategy == ScanStrategy::Failed));
    let load_failures = run
        .issues
        .iter()
        .filter(|i| i.message == messages::PAGE_LOAD_FAILED)
        .count();
    assert_eq!(load_failures, 3);
    // No screenshots means no vision call
    assert!(harness.vision.batches.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_segments_without_screenshots_skip_vision() {
    let server = site_with_sitemap().await;
    let harness = Harness::new();
    let site = harness.site(&server.uri());

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(Arc::new(FakeScanner::segments_only("browser")));

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert!(harness.vision.batches.lock().unwrap().is_empty());
    assert!(run.homepage_screenshots.desktop.is_none());
    assert_eq!(run.pages[0].segments.len(), 1);
}

#[tokio::test]
async fn test_page_budget_limits_scan() {
    let server = site_with_sitemap().await;
    let harness = Harness::new();
    let site = harness.site(&server.uri());
    let browser = Arc::new(FakeScanner::working("browser", ScanStrategy::Browser));

    let config = AuditConfig {
        max_pages: 2,
        ..test_config()
    };
    let auditor = Auditor::new(harness.collaborators.clone(), config)
        .unwrap()
        .with_browser(browser.clone());

    let run = auditor.run(&site.id).await.unwrap();
    assert_eq!(run.pages_found, 3);
    assert_eq!(run.pages_scanned, 2);
    assert_eq!(browser.calls(), 2);
}

// ============================================================================
// Failed Run Tests
// ============================================================================

#[tokio::test]
async fn test_missing_sitemap_fails_without_scanning() {
    let server = MockServer::start().await;
    let mut harness = Harness::new();
    let site = harness.site(&server.uri());
    let browser = Arc::new(FakeScanner::working("browser", ScanStrategy::Browser));

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(browser.clone());

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.has_sitemap);
    assert_eq!(run.pages_scanned, 0);
    assert!(!run.counts_toward_usage);
    assert_eq!(run.overall_score, Some(0));
    assert_eq!(run.category_scores, Some(CategoryScores::zero()));
    assert_eq!(run.issues.len(), 1);
    assert_eq!(run.issues[0].message, messages::NO_SITEMAP);
    assert_eq!(run.issues[0].severity, Severity::Error);
    assert_eq!(run.progress.percentage, 100);
    assert_eq!(browser.calls(), 0);

    let (_, event) = harness.next_event().await;
    assert!(matches!(event, AuditEvent::AuditFailed { ref reason, .. } if reason == messages::NO_SITEMAP));
}

#[tokio::test]
async fn test_unknown_site_is_rejected() {
    let harness = Harness::new();
    let auditor = Auditor::new(harness.collaborators.clone(), test_config()).unwrap();

    let err = auditor.run("no-such-site").await.unwrap_err();
    assert!(matches!(err, AuditError::SiteNotFound(ref id) if id == "no-such-site"));
}

#[tokio::test]
async fn test_store_failure_records_failed_run() {
    let server = site_with_sitemap().await;
    let mut harness = Harness::new();
    let site = harness.site(&server.uri());
    harness.collaborators.store = Arc::new(RejectStatuses {
        inner: harness.db.clone(),
        rejected: vec![RunStatus::Completed],
    });

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(Arc::new(FakeScanner::working("browser", ScanStrategy::Browser)));

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.issues.len(), 1);
    assert_eq!(run.issues[0].message, messages::AUDIT_FAILED);
    let detail = run.issues[0].details.as_ref().unwrap()["error"].as_str().unwrap();
    assert!(!detail.is_empty());
    assert!(detail.chars().count() <= 500);
    assert_eq!(harness.db.get_run(&run.id).unwrap().unwrap().status, RunStatus::Failed);

    let (_, event) = harness.next_event().await;
    assert!(matches!(event, AuditEvent::AuditFailed { .. }));
}

#[tokio::test]
async fn test_unrecordable_failure_returns_last_known_run() {
    let server = site_with_sitemap().await;
    let mut harness = Harness::new();
    let site = harness.site(&server.uri());
    harness.collaborators.store = Arc::new(RejectStatuses {
        inner: harness.db.clone(),
        rejected: vec![RunStatus::Completed, RunStatus::Failed],
    });

    let auditor = Auditor::new(harness.collaborators.clone(), test_config())
        .unwrap()
        .with_browser(Arc::new(FakeScanner::working("browser", ScanStrategy::Browser)));

    let run = auditor.run(&site.id).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert_eq!(run.issues.len(), 1);
    assert_eq!(run.issues[0].message, messages::AUDIT_FAILED);
    // The store never saw the failure
    let stored = harness.db.get_run(&run.id).unwrap().unwrap();
    assert_ne!(stored.status, RunStatus::Failed);

    let (_, event) = harness.next_event().await;
    assert!(matches!(event, AuditEvent::AuditFailed { .. }));
}

// ============================================================================
// Background Run Tests
// ============================================================================

#[tokio::test]
async fn test_start_runs_in_background() {
    let server = site_with_sitemap().await;
    let harness = Harness::new();
    let site = harness.site(&server.uri());

    let auditor = Arc::new(
        Auditor::new(harness.collaborators.clone(), test_config())
            .unwrap()
            .with_browser(Arc::new(FakeScanner::working("browser", ScanStrategy::Browser))),
    );

    let run_id = auditor.start(&site.id).await.unwrap();
    let created = harness.db.get_run(&run_id).unwrap().unwrap();
    assert_eq!(created.site_id, site.id);

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let run = harness.db.get_run(&run_id).unwrap().unwrap();
            if run.status.is_terminal() {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("background audit did not finish");

    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(harness.db.list_runs_for_site(&site.id).unwrap().len(), 1);
}
