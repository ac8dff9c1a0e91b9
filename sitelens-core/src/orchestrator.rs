//! The audit state machine: `PENDING -> RUNNING -> COMPLETED | FAILED`.
//!
//! One [`Auditor`] drives a run end to end. All writes to the run record are
//! made from the task driving [`Auditor::run`]; worker tasks only hand back
//! their results.

use crate::collaborators::{
    AuditEvent, Collaborators, DiagnosticsStrategy, PerformanceDiagnostics, ScreenCapture, Site,
};
use crate::config::AuditConfig;
use crate::error::{AuditError, Result};
use crate::merge::{non_blank, resolve_optional, resolve_text, title_from_url};
use crate::pool::{Limiter, WorkerPool};
use crate::run::{
    AuditRun, FilmstripRef, PageRecord, Progress, RunStatus, RunUpdate, ScreenshotRefs, SegmentRef,
};
use crate::scoring::{self, CategoryScores};
use crate::security::document_language;
use chrono::Utc;
use futures::future::join_all;
use reqwest::Client;
use serde_json::json;
use sitelens_scanner::discovery::{Discovery, SiteProfile, homepage_of};
use sitelens_scanner::issue::{Category, Issue, IssueSource, Severity, dedupe_issues, messages};
use sitelens_scanner::page::{DESKTOP_USER_AGENT, PageScanner, ScanOptions, scan_with_fallback};
use sitelens_scanner::result::{DeviceCapture, PageScanResult};
use sitelens_scanner::{DeviceType, FetchScanner, ScanError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use url::Url;

/// Receives every progress snapshot, in order.
pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// Scan-phase progress stays under this until the post-scan phases run.
pub const SCAN_PROGRESS_CEILING: u8 = 84;

/// Longest error text persisted on a failed run.
pub const MAX_FAILURE_DETAIL: usize = 500;

/// Discovery, vision analysis and scoring, on top of one step per page.
const EXTRA_STEPS: usize = 3;

type ScanOutcome = (PageScanResult, Option<PerformanceDiagnostics>);

pub struct Auditor {
    collaborators: Collaborators,
    config: AuditConfig,
    client: Client,
    browser: Option<Arc<dyn PageScanner>>,
    fetch: Arc<dyn PageScanner>,
    progress_callback: Option<ProgressCallback>,
}

impl Auditor {
    pub fn new(collaborators: Collaborators, config: AuditConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(ScanError::from)?;
        let fetch = FetchScanner::with_client(client.clone(), collaborators.static_analyzer.clone())
            .with_timeout(config.fetch_timeout());

        Ok(Self {
            collaborators,
            config,
            client,
            browser: None,
            fetch: Arc::new(fetch),
            progress_callback: None,
        })
    }

    /// Scanner tried first for every page.
    pub fn with_browser(mut self, scanner: Arc<dyn PageScanner>) -> Self {
        self.browser = Some(scanner);
        self
    }

    /// Replace the fetch scanner used as fallback.
    pub fn with_fetch_scanner(mut self, scanner: Arc<dyn PageScanner>) -> Self {
        self.fetch = scanner;
        self
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Create a run for `site_id` and drive it to a terminal state.
    pub async fn run(&self, site_id: &str) -> Result<AuditRun> {
        let (run, site) = self.prepare(site_id).await?;
        self.execute(run, site).await
    }

    /// Create a run and drive it on a background task. Returns the run id.
    pub async fn start(self: Arc<Self>, site_id: &str) -> Result<String> {
        let (run, site) = self.prepare(site_id).await?;
        let run_id = run.id.clone();
        tokio::spawn(async move {
            if let Err(e) = self.execute(run, site).await {
                error!("Background audit failed: {}", e);
            }
        });
        Ok(run_id)
    }

    async fn prepare(&self, site_id: &str) -> Result<(AuditRun, Site)> {
        let site = self
            .collaborators
            .store
            .find_site(site_id)
            .await?
            .ok_or_else(|| AuditError::SiteNotFound(site_id.to_string()))?;

        let run = AuditRun::new(&site.id);
        self.collaborators.store.create_run(&run).await?;
        info!("Created audit run {} for {}", run.id, site.url);
        Ok((run, site))
    }

    /// Outer safety net: any pipeline error turns into one FAILED write.
    /// If even that write fails, the failure is applied to the last known
    /// run and returned without surfacing the store error.
    async fn execute(&self, mut run: AuditRun, site: Site) -> Result<AuditRun> {
        let e = match self.pipeline(&run.id, &site).await {
            Ok(finished) => return Ok(finished),
            Err(e) => e,
        };
        error!("Audit {} of {} failed: {}", run.id, site.url, e);

        let detail = truncate(&e.to_string(), MAX_FAILURE_DETAIL);
        let update = failure_update(&site, &detail);
        match self.update(&run.id, update.clone()).await {
            Ok(failed) => run = failed,
            Err(write_err) => {
                error!("Could not record failure of {}: {}", run.id, write_err);
                run.apply(update);
            }
        }

        self.notify(
            &site,
            AuditEvent::AuditFailed {
                run_id: run.id.clone(),
                site_id: site.id.clone(),
                site_url: site.url.clone(),
                reason: detail,
            },
        );
        Ok(run)
    }

    async fn pipeline(&self, run_id: &str, site: &Site) -> Result<AuditRun> {
        let store = &self.collaborators.store;

        let starting = Progress::new(0, 0, 0, "Discovering pages");
        self.update(
            run_id,
            RunUpdate {
                status: Some(RunStatus::Running),
                started_at: Some(Utc::now()),
                progress: Some(starting.clone()),
                ..Default::default()
            },
        )
        .await?;
        self.emit(&starting);

        // Discovery
        let profile = self.site_profile(site).await;
        let discovery = Discovery::new(self.client.clone(), self.config.discovery.clone());
        let found = discovery.discover(&profile).await;
        info!(
            "Discovered {} pages for {} via {} (sitemap: {})",
            found.urls.len(),
            site.url,
            found.method,
            found.has_sitemap
        );

        if !found.has_sitemap {
            return self.fail_without_sitemap(run_id, site, &found.urls).await;
        }

        let urls: Vec<String> = found
            .urls
            .iter()
            .take(self.config.page_budget())
            .cloned()
            .collect();
        let total_steps = urls.len() + EXTRA_STEPS;

        let discovered = Progress::new(
            1,
            total_steps,
            percentage(1, total_steps),
            format!("Found {} pages", urls.len()),
        );
        self.update(
            run_id,
            RunUpdate {
                discovery_method: Some(found.method),
                has_sitemap: Some(true),
                pages_found: Some(found.urls.len()),
                progress: Some(discovered.clone()),
                ..Default::default()
            },
        )
        .await?;
        self.emit(&discovered);

        // Scanning
        let outcomes = self.scan_pages(run_id, &urls, total_steps).await?;

        let mut issues: Vec<Issue> = Vec::new();
        for (result, diagnostics) in &outcomes {
            issues.extend(result.issues.iter().cloned());
            if let Some(diagnostics) = diagnostics {
                issues.extend(diagnostics.issues.iter().cloned());
            }
        }

        // Site-wide checks, once per run
        let checks = self
            .collaborators
            .static_analyzer
            .check_robots_and_sitemap(&homepage_of(&site.url))
            .await;
        debug!("Site checks produced {} issues", checks.len());
        issues.extend(checks);

        // Vision
        let vision_step = urls.len() + 2;
        let analyzing = Progress::new(
            vision_step,
            total_steps,
            percentage(vision_step, total_steps),
            "Analyzing screenshots",
        );
        store.update_run(run_id, RunUpdate::progress(analyzing.clone())).await?;
        self.emit(&analyzing);
        issues.extend(self.analyze_screens(&outcomes, &site.url).await);

        // Scoring
        let scoring_step = urls.len() + 3;
        let scoring_progress = Progress::new(
            scoring_step,
            total_steps,
            percentage(scoring_step, total_steps),
            "Calculating scores",
        );
        store
            .update_run(run_id, RunUpdate::progress(scoring_progress.clone()))
            .await?;
        self.emit(&scoring_progress);

        let issues = dedupe_issues(issues);
        let card = scoring::score(&issues);
        info!(
            "Audit {} scored {} (technical {}, performance {}, visual {}, accessibility {})",
            run_id,
            card.overall,
            card.categories.technical,
            card.categories.performance,
            card.categories.visual,
            card.categories.accessibility
        );

        // The summary has to land before the terminal write.
        let summary = self
            .collaborators
            .summary
            .summarize(&issues, card.overall, &card.categories, &site.url, outcomes.len())
            .await;
        if summary.is_none() {
            debug!("No summary produced for {}", run_id);
        }

        let (homepage_screenshots, pages) = self.persist_images(run_id, &outcomes).await;

        let done = Progress::new(total_steps, total_steps, 100, "Audit complete");
        let finished = self
            .update(
                run_id,
                RunUpdate {
                    status: Some(RunStatus::Completed),
                    pages_scanned: Some(outcomes.len()),
                    overall_score: Some(card.overall),
                    category_scores: Some(card.categories),
                    issues: Some(issues),
                    pages: Some(pages),
                    progress: Some(done.clone()),
                    summary,
                    homepage_screenshots: Some(homepage_screenshots),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(&done);

        self.notify(
            site,
            AuditEvent::AuditCompleted {
                run_id: run_id.to_string(),
                site_id: site.id.clone(),
                site_url: site.url.clone(),
                score: card.overall,
            },
        );
        Ok(finished)
    }

    /// Discovery inputs from the store. Lookup failures leave them empty.
    async fn site_profile(&self, site: &Site) -> SiteProfile {
        let store = &self.collaborators.store;
        let cached_sitemaps = store.find_cached_sitemaps(&site.id).await.unwrap_or_else(|e| {
            warn!("Could not load cached sitemaps for {}: {}", site.id, e);
            Vec::new()
        });
        let stored_entities = store.find_stored_entities(&site.id).await.unwrap_or_else(|e| {
            warn!("Could not load stored entities for {}: {}", site.id, e);
            Vec::new()
        });

        SiteProfile {
            root_url: site.url.clone(),
            credentials: site.credentials.clone(),
            cached_sitemaps,
            stored_entities,
        }
    }

    /// No sitemap: fail straight away without scanning or charging usage.
    async fn fail_without_sitemap(
        &self,
        run_id: &str,
        site: &Site,
        urls: &[String],
    ) -> Result<AuditRun> {
        warn!("No sitemap found for {}, not scanning", site.url);
        let issue = Issue::new(
            Category::Technical,
            Severity::Error,
            messages::NO_SITEMAP,
            IssueSource::Discovery,
        )
        .with_url(&site.url)
        .with_suggestion(messages::SUGGEST_ADD_SITEMAP);

        let progress = Progress::new(1, 1, 100, "No sitemap found");
        let failed = self
            .update(
                run_id,
                RunUpdate {
                    status: Some(RunStatus::Failed),
                    has_sitemap: Some(false),
                    pages_found: Some(urls.len()),
                    pages_scanned: Some(0),
                    overall_score: Some(0),
                    category_scores: Some(CategoryScores::zero()),
                    issues: Some(vec![issue]),
                    progress: Some(progress.clone()),
                    counts_toward_usage: Some(false),
                    completed_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(&progress);

        self.notify(
            site,
            AuditEvent::AuditFailed {
                run_id: run_id.to_string(),
                site_id: site.id.clone(),
                site_url: site.url.clone(),
                reason: messages::NO_SITEMAP.to_string(),
            },
        );
        Ok(failed)
    }

    /// Scan every page through the pool; results come back in submission order.
    async fn scan_pages(
        &self,
        run_id: &str,
        urls: &[String],
        total_steps: usize,
    ) -> Result<Vec<ScanOutcome>> {
        let pool = WorkerPool::new(self.config.scan_concurrency);
        let limiter = Limiter::new(self.config.diagnostics_concurrency);
        let options = ScanOptions {
            capture_screenshots: self.config.capture_screenshots,
            run_accessibility: self.config.run_accessibility,
            ..ScanOptions::default()
        };
        let diagnostics_pages = self.config.diagnostics_pages;
        let diagnostics_timeout = self.config.diagnostics_timeout();

        let browser = self.browser.clone();
        let fetch = self.fetch.clone();
        let diagnostics = self.collaborators.diagnostics.clone();

        info!(
            "Scanning {} pages with {} workers",
            urls.len(),
            pool.concurrency()
        );

        let mut run = pool.run(urls.to_vec(), move |index, url: String| {
            let browser = browser.clone();
            let fetch = fetch.clone();
            let diagnostics = diagnostics.clone();
            let limiter = limiter.clone();
            let options = options.clone();
            async move {
                let result =
                    scan_with_fallback(browser.as_deref(), fetch.as_ref(), &url, &options).await;

                let metrics = if index < diagnostics_pages {
                    let call = tokio::time::timeout(
                        diagnostics_timeout,
                        diagnostics.get_diagnostics(&url, DiagnosticsStrategy::Mobile),
                    );
                    match limiter.run(call).await {
                        Some(Ok(metrics)) => metrics,
                        Some(Err(_)) => {
                            warn!("Diagnostics for {} timed out", url);
                            None
                        }
                        None => None,
                    }
                } else {
                    None
                };

                (result, metrics)
            }
        });

        let mut slots: Vec<Option<ScanOutcome>> = (0..urls.len()).map(|_| None).collect();
        while let Some(done) = run.next().await {
            let url = &urls[done.index];
            let outcome = done.outcome.unwrap_or_else(|panic| {
                warn!("Scan task for {} panicked: {}", url, panic);
                (
                    PageScanResult::failed(url, IssueSource::Orchestrator, &panic),
                    None,
                )
            });
            debug!(
                "Scanned {} ({}/{}) via {:?} with {} issues",
                url,
                done.completed,
                done.total,
                outcome.0.strategy,
                outcome.0.issues.len()
            );

            let step = 1 + done.completed;
            let progress = Progress::new(
                step,
                total_steps,
                percentage(step, total_steps).min(SCAN_PROGRESS_CEILING),
                format!("Scanned {}", page_label(url)),
            );
            self.update(
                run_id,
                RunUpdate {
                    pages_scanned: Some(done.completed),
                    progress: Some(progress.clone()),
                    ..Default::default()
                },
            )
            .await?;
            self.emit(&progress);

            slots[done.index] = Some(outcome);
        }

        Ok(slots
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| {
                    (
                        PageScanResult::failed(url, IssueSource::Orchestrator, "scan task lost"),
                        None,
                    )
                })
            })
            .collect())
    }

    /// One batched vision call. Never fatal.
    async fn analyze_screens(&self, outcomes: &[ScanOutcome], site_url: &str) -> Vec<Issue> {
        let captures: Vec<ScreenCapture> = outcomes
            .iter()
            .map(|(result, _)| result)
            .filter(|result| result.has_screenshots())
            .map(|result| ScreenCapture {
                url: result.url.clone(),
                desktop: result.screenshot(DeviceType::Desktop).cloned(),
                mobile: result.screenshot(DeviceType::Mobile).cloned(),
            })
            .collect();

        if captures.is_empty() {
            debug!("No screenshots captured, skipping vision analysis");
            return Vec::new();
        }

        match tokio::time::timeout(
            self.config.vision_timeout(),
            self.collaborators.vision.analyze_screens(&captures, site_url),
        )
        .await
        {
            Ok(issues) => issues,
            Err(_) => {
                warn!(
                    "Vision analysis of {} pages timed out after {:?}",
                    captures.len(),
                    self.config.vision_timeout()
                );
                Vec::new()
            }
        }
    }

    /// Upload every captured image in parallel and build the page records.
    async fn persist_images(
        &self,
        run_id: &str,
        outcomes: &[ScanOutcome],
    ) -> (ScreenshotRefs, Vec<PageRecord>) {
        let homepage = async {
            let mut refs = ScreenshotRefs::default();
            let Some((first, _)) = outcomes.first() else {
                return refs;
            };
            let folder = format!("{}/homepage", run_id);
            let uploads = first
                .captures
                .iter()
                .filter_map(|c| c.screenshot.clone().map(|image| (c.device, image)))
                .map(|(device, image)| {
                    let folder = folder.clone();
                    async move {
                        let name = format!("{}.png", device.as_str());
                        (device, self.collaborators.images.upload_image(image, &folder, &name).await)
                    }
                });
            for (device, reference) in join_all(uploads).await {
                if let Some(reference) = reference {
                    refs.set(device, reference);
                }
            }
            refs
        };

        let pages = join_all(
            outcomes
                .iter()
                .enumerate()
                .map(|(index, (result, diagnostics))| {
                    self.page_record(run_id, index, result, diagnostics.clone())
                }),
        );

        futures::join!(homepage, pages)
    }

    async fn page_record(
        &self,
        run_id: &str,
        index: usize,
        result: &PageScanResult,
        diagnostics: Option<PerformanceDiagnostics>,
    ) -> PageRecord {
        let folder = format!("{}/pages/{}", run_id, index);
        let uploads = join_all(
            result
                .captures
                .iter()
                .map(|capture| self.upload_capture(&folder, capture)),
        )
        .await;

        let mut screenshots = ScreenshotRefs::default();
        let mut segments = Vec::new();
        let mut filmstrip = Vec::new();
        for (device, screenshot, device_segments, device_frames) in uploads {
            if let Some(reference) = screenshot {
                screenshots.set(device, reference);
            }
            segments.extend(device_segments);
            filmstrip.extend(device_frames);
        }

        let dom = &result.dom;
        let title = resolve_text(dom.title.as_deref(), dom.first_h1(), || {
            title_from_url(&result.url)
        });
        let language = resolve_optional(
            non_blank(dom.language.as_deref()),
            result.html.as_deref().and_then(document_language),
        );

        PageRecord {
            url: result.url.clone(),
            strategy: result.strategy,
            status_code: result.status_code,
            ttfb_ms: result.ttfb_ms(),
            title,
            language,
            issue_count: result.issues.len(),
            console_error_count: result.console_errors.len(),
            broken_resource_count: result.broken_resources.len(),
            screenshots,
            segments,
            filmstrip,
            diagnostics,
        }
    }

    async fn upload_capture(
        &self,
        folder: &str,
        capture: &DeviceCapture,
    ) -> (DeviceType, Option<String>, Vec<SegmentRef>, Vec<FilmstripRef>) {
        let images = &self.collaborators.images;
        let device = capture.device;
        let prefix = device.as_str();

        let screenshot = async {
            match capture.screenshot.clone() {
                Some(image) => {
                    images
                        .upload_image(image, folder, &format!("{}.png", prefix))
                        .await
                }
                None => None,
            }
        };

        let segments = join_all(capture.segments.iter().enumerate().map(|(index, image)| {
            let name = format!("{}-segment-{}.png", prefix, index);
            async move {
                images
                    .upload_image(image.clone(), folder, &name)
                    .await
                    .map(|url| SegmentRef { device, index, url })
            }
        }));

        let frames = join_all(capture.filmstrip.iter().map(|frame| {
            let name = format!("{}-{}.png", prefix, frame.stage.as_str());
            async move {
                images
                    .upload_image(frame.image.clone(), folder, &name)
                    .await
                    .map(|url| FilmstripRef {
                        device,
                        stage: frame.stage,
                        elapsed_ms: frame.elapsed.as_millis() as u64,
                        url,
                    })
            }
        }));

        let (screenshot, segments, frames) = futures::join!(screenshot, segments, frames);
        (
            device,
            screenshot,
            segments.into_iter().flatten().collect(),
            frames.into_iter().flatten().collect(),
        )
    }

    async fn update(&self, run_id: &str, update: RunUpdate) -> Result<AuditRun> {
        Ok(self.collaborators.store.update_run(run_id, update).await?)
    }

    fn emit(&self, progress: &Progress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }

    /// Fire and forget. The notifier's outcome never reaches the run.
    fn notify(&self, site: &Site, event: AuditEvent) {
        let Some(account_id) = site.account_id.clone() else {
            debug!("Site {} has no account, skipping notification", site.id);
            return;
        };
        let notifier = self.collaborators.notifier.clone();
        tokio::spawn(async move {
            notifier.notify(&account_id, event).await;
        });
    }
}

fn percentage(step: usize, total_steps: usize) -> u8 {
    if total_steps == 0 {
        return 0;
    }
    ((step * 100) / total_steps).min(100) as u8
}

/// Path of a page URL for progress labels.
pub fn page_label(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path().to_string();
            if path.is_empty() || path == "/" {
                "/".to_string()
            } else {
                path
            }
        })
        .unwrap_or_else(|| url.to_string())
}

fn failure_update(site: &Site, detail: &str) -> RunUpdate {
    let issue = Issue::new(
        Category::Technical,
        Severity::Error,
        messages::AUDIT_FAILED,
        IssueSource::Orchestrator,
    )
    .with_url(&site.url)
    .with_details(json!({ "error": detail }));

    RunUpdate {
        status: Some(RunStatus::Failed),
        issues: Some(vec![issue]),
        completed_at: Some(Utc::now()),
        ..Default::default()
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(1, 8), 12);
        assert_eq!(percentage(8, 8), 100);
        assert_eq!(percentage(3, 0), 0);
    }

    #[test]
    fn test_page_label() {
        assert_eq!(page_label("https://example.com"), "/");
        assert_eq!(page_label("https://example.com/about/team"), "/about/team");
        assert_eq!(page_label("not a url"), "not a url");
    }

    #[test]
    fn test_truncate_counts_chars() {
        let long = "é".repeat(600);
        assert_eq!(truncate(&long, MAX_FAILURE_DETAIL).chars().count(), 500);
        assert_eq!(truncate("short", 500), "short");
    }
}
