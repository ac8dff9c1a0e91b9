//! Browser-backed page scanning over the Chrome DevTools Protocol.
//!
//! A [`BrowserSession`] owns one headless Chromium process and its event
//! handler task. It is opened and closed explicitly and shared by reference
//! across concurrent scans. Every device pass runs in its own browser context
//! so cookies, storage and cache never leak between pages.

use crate::analyzer::AccessibilityAnalyzer;
use crate::checks::analyze_rendered_page;
use crate::error::{Result, ScanError};
use crate::issue::{DeviceType, Issue, IssueSource};
use crate::page::{PageScanner, ScanOptions};
use crate::result::{
    BrokenResource, ConsoleError, DeviceCapture, DomSummary, FilmstripFrame, LifecycleStage,
    PageScanResult, ScanStrategy,
};
use async_trait::async_trait;
use bytes::Bytes;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, NavigateParams, SetLifecycleEventsEnabledParams,
    Viewport,
};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, StackTrace,
};
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DOM_READY: &str = "DOMContentLoaded";
const NETWORK_IDLE: &str = "networkIdle";

/// In-page script producing a [`DomSummary`].
const DOM_SUMMARY_SCRIPT: &str = r#"(() => {
    const text = (el) => (el && el.textContent || '').replace(/\s+/g, ' ').trim();
    const attr = (sel, name) => {
        const el = document.querySelector(sel);
        return el ? el.getAttribute(name) : null;
    };
    const images = Array.from(document.images);
    return {
        title: document.title || null,
        metaDescription: attr('meta[name="description" i]', 'content'),
        headings: Array.from(document.querySelectorAll('h1,h2,h3,h4,h5,h6')).slice(0, 100).map((h) => ({
            level: Number(h.tagName.substring(1)),
            text: text(h).substring(0, 300),
        })),
        canonical: attr('link[rel="canonical" i]', 'href'),
        language: document.documentElement.getAttribute('lang'),
        hasViewport: !!document.querySelector('meta[name="viewport" i]'),
        imageCount: images.length,
        imagesMissingAlt: images.filter((img) => !img.hasAttribute('alt')).length,
        linkCount: document.querySelectorAll('a[href]').length,
        pageHeight: Math.max(
            document.body ? document.body.scrollHeight : 0,
            document.documentElement ? document.documentElement.scrollHeight : 0
        ),
    };
})()"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub navigation_timeout_secs: u64,
    pub network_idle_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub max_segments: usize,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            navigation_timeout_secs: 30,
            network_idle_timeout_secs: 15,
            settle_delay_ms: 1500,
            max_segments: 8,
        }
    }
}

/// A launched browser engine with an explicit lifecycle.
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    pub async fn open(settings: &BrowserSettings) -> Result<Self> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(1920, 1080)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--hide-scrollbars");
        if !settings.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(ScanError::BrowserError)?;

        let (browser, mut handler) = Browser::launch(config).await?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
        });

        info!("Browser session opened");
        Ok(Self { browser, handler })
    }

    pub async fn close(mut self) -> Result<()> {
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        info!("Browser session closed");
        closed.map(|_| ()).map_err(ScanError::from)
    }

    async fn create_context(&self) -> Result<BrowserContextId> {
        let response = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?;
        Ok(response.result.browser_context_id.clone())
    }

    async fn dispose_context(&self, id: BrowserContextId) {
        if let Err(e) = self
            .browser
            .execute(DisposeBrowserContextParams::new(id))
            .await
        {
            debug!("Failed to dispose browser context: {}", e);
        }
    }

    async fn open_page(&self, context: &BrowserContextId) -> Result<Page> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context.clone())
            .build()
            .map_err(ScanError::BrowserError)?;
        Ok(self.browser.new_page(params).await?)
    }
}

#[derive(Debug, Clone)]
struct ObservedResponse {
    frame_id: Option<String>,
    document: bool,
    status: u16,
    url: String,
    ttfb: Option<Duration>,
}

/// Listener output shared with the per-event tasks.
#[derive(Debug, Default)]
struct Telemetry {
    console_errors: Vec<ConsoleError>,
    responses: Vec<ObservedResponse>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LifecycleMark {
    frame_id: String,
    loader_id: String,
    name: String,
}

/// Remembers every lifecycle event so a stage that fired before anyone
/// waited for it still counts.
struct LifecycleWatcher {
    rx: mpsc::UnboundedReceiver<LifecycleMark>,
    seen: Vec<LifecycleMark>,
}

impl LifecycleWatcher {
    async fn wait_for(
        &mut self,
        frame_id: &str,
        loader_id: Option<&str>,
        name: &str,
        timeout: Duration,
    ) -> bool {
        let matches = |mark: &LifecycleMark| {
            mark.frame_id == frame_id
                && mark.name == name
                && loader_id.is_none_or(|l| mark.loader_id == l)
        };
        if self.seen.iter().any(|m| matches(m)) {
            return true;
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Ok(Some(mark)) => {
                    let hit = matches(&mark);
                    self.seen.push(mark);
                    if hit {
                        return true;
                    }
                }
                Ok(None) | Err(_) => return false,
            }
        }
    }
}

/// Aborts its listener tasks when dropped, whichever way the pass ends.
#[derive(Default)]
struct ListenerTasks(Vec<JoinHandle<()>>);

impl ListenerTasks {
    fn push(&mut self, task: JoinHandle<()>) {
        self.0.push(task);
    }
}

impl Drop for ListenerTasks {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

struct PageListeners {
    telemetry: Arc<Mutex<Telemetry>>,
    lifecycle: LifecycleWatcher,
    tasks: ListenerTasks,
}

impl PageListeners {
    async fn attach(page: &Page) -> Result<Self> {
        let telemetry = Arc::new(Mutex::new(Telemetry::default()));
        let mut tasks = ListenerTasks::default();

        let mut exceptions = page.event_listener::<EventExceptionThrown>().await?;
        let sink = telemetry.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = exceptions.next().await {
                let details = &event.exception_details;
                let text = details
                    .exception
                    .as_ref()
                    .and_then(|e| e.description.clone())
                    .unwrap_or_else(|| details.text.clone());
                let stack_trace = details.stack_trace.as_ref().map(format_stack);
                if let Ok(mut t) = sink.lock() {
                    t.console_errors.push(ConsoleError { text, stack_trace });
                }
            }
        }));

        let mut console = page.event_listener::<EventConsoleApiCalled>().await?;
        let sink = telemetry.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = console.next().await {
                if event.r#type != ConsoleApiCalledType::Error {
                    continue;
                }
                let text = event
                    .args
                    .iter()
                    .filter_map(|arg| match &arg.value {
                        Some(serde_json::Value::String(s)) => Some(s.clone()),
                        Some(other) => Some(other.to_string()),
                        None => arg.description.clone(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                let stack_trace = event.stack_trace.as_ref().map(format_stack);
                if let Ok(mut t) = sink.lock() {
                    t.console_errors.push(ConsoleError { text, stack_trace });
                }
            }
        }));

        let mut responses = page.event_listener::<EventResponseReceived>().await?;
        let sink = telemetry.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                let response = &event.response;
                let ttfb = response.timing.as_ref().and_then(|timing| {
                    let ms = timing.receive_headers_end - timing.send_start.max(0.0);
                    (ms.is_finite() && ms >= 0.0).then(|| Duration::from_secs_f64(ms / 1000.0))
                });
                let observed = ObservedResponse {
                    frame_id: event.frame_id.as_ref().map(|f| f.inner().clone()),
                    document: event.r#type == ResourceType::Document,
                    status: u16::try_from(response.status).unwrap_or(0),
                    url: response.url.clone(),
                    ttfb,
                };
                if let Ok(mut t) = sink.lock() {
                    t.responses.push(observed);
                }
            }
        }));

        let (tx, rx) = mpsc::unbounded_channel();
        let mut lifecycle = page.event_listener::<EventLifecycleEvent>().await?;
        tasks.push(tokio::spawn(async move {
            while let Some(event) = lifecycle.next().await {
                let mark = LifecycleMark {
                    frame_id: event.frame_id.inner().clone(),
                    loader_id: event.loader_id.inner().clone(),
                    name: event.name.clone(),
                };
                if tx.send(mark).is_err() {
                    break;
                }
            }
        }));
        page.execute(SetLifecycleEventsEnabledParams::new(true))
            .await?;

        Ok(Self {
            telemetry,
            lifecycle: LifecycleWatcher {
                rx,
                seen: Vec::new(),
            },
            tasks,
        })
    }

    fn detach(self) -> Telemetry {
        drop(self.tasks);
        let Ok(mut guard) = self.telemetry.lock() else {
            return Telemetry::default();
        };
        std::mem::take(&mut *guard)
    }
}

fn format_stack(stack: &StackTrace) -> String {
    stack
        .call_frames
        .iter()
        .map(|frame| {
            let name = if frame.function_name.is_empty() {
                "<anonymous>"
            } else {
                frame.function_name.as_str()
            };
            format!(
                "    at {} ({}:{}:{})",
                name,
                frame.url,
                frame.line_number + 1,
                frame.column_number + 1
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// What one device pass produced.
struct DevicePass {
    capture: DeviceCapture,
    dom: DomSummary,
    html: Option<String>,
    status_code: Option<u16>,
    ttfb: Option<Duration>,
    console_errors: Vec<ConsoleError>,
    broken_resources: Vec<BrokenResource>,
    accessibility: Vec<Issue>,
    load_error: Option<String>,
}

pub struct BrowserScanner {
    session: Arc<BrowserSession>,
    settings: BrowserSettings,
    accessibility: Option<Arc<dyn AccessibilityAnalyzer>>,
}

impl BrowserScanner {
    pub fn new(session: Arc<BrowserSession>, settings: BrowserSettings) -> Self {
        Self {
            session,
            settings,
            accessibility: None,
        }
    }

    pub fn with_accessibility(mut self, analyzer: Arc<dyn AccessibilityAnalyzer>) -> Self {
        self.accessibility = Some(analyzer);
        self
    }

    async fn scan_device(
        &self,
        url: &str,
        device: DeviceType,
        options: &ScanOptions,
    ) -> Result<DevicePass> {
        let context = self.session.create_context().await?;
        let page = match self.session.open_page(&context).await {
            Ok(page) => page,
            Err(e) => {
                self.session.dispose_context(context).await;
                return Err(e);
            }
        };

        let pass = self.drive_page(&page, url, device, options).await;

        if let Err(e) = page.close().await {
            debug!("Failed to close page for {}: {}", url, e);
        }
        self.session.dispose_context(context).await;
        pass
    }

    async fn drive_page(
        &self,
        page: &Page,
        url: &str,
        device: DeviceType,
        options: &ScanOptions,
    ) -> Result<DevicePass> {
        let viewport = device.viewport();
        page.execute(SetDeviceMetricsOverrideParams::new(
            viewport.width as i64,
            viewport.height as i64,
            1.0,
            viewport.mobile,
        ))
        .await?;
        page.execute(SetUserAgentOverrideParams::new(device.user_agent()))
            .await?;

        let mut listeners = PageListeners::attach(page).await?;
        let mut pass = DevicePass {
            capture: DeviceCapture::new(device),
            dom: DomSummary::default(),
            html: None,
            status_code: None,
            ttfb: None,
            console_errors: Vec::new(),
            broken_resources: Vec::new(),
            accessibility: Vec::new(),
            load_error: None,
        };

        debug!("Navigating to {} ({})", url, device.as_str());
        let started = Instant::now();
        let nav_timeout = Duration::from_secs(self.settings.navigation_timeout_secs);
        let navigation =
            tokio::time::timeout(nav_timeout, page.execute(NavigateParams::new(url))).await;

        let (frame_id, loader_id) = match navigation {
            Err(_) => {
                pass.load_error = Some(format!(
                    "navigation timed out after {}s",
                    nav_timeout.as_secs()
                ));
                listeners.detach();
                return Ok(pass);
            }
            Ok(Err(e)) => {
                pass.load_error = Some(e.to_string());
                listeners.detach();
                return Ok(pass);
            }
            Ok(Ok(response)) => {
                if let Some(error) = response.result.error_text.clone() {
                    pass.load_error = Some(error);
                    listeners.detach();
                    return Ok(pass);
                }
                (
                    response.result.frame_id.inner().clone(),
                    response.result.loader_id.as_ref().map(|l| l.inner().clone()),
                )
            }
        };

        let capture = options.capture_screenshots;
        let ready = listeners
            .lifecycle
            .wait_for(&frame_id, loader_id.as_deref(), DOM_READY, nav_timeout)
            .await;
        if !ready {
            debug!("{} never reached DOMContentLoaded", url);
        }
        if capture {
            self.filmstrip_frame(page, &mut pass.capture, LifecycleStage::InitialPaint, started)
                .await;
        }

        let idle = listeners
            .lifecycle
            .wait_for(
                &frame_id,
                loader_id.as_deref(),
                NETWORK_IDLE,
                Duration::from_secs(self.settings.network_idle_timeout_secs),
            )
            .await;
        if !idle {
            debug!("{} never went network-idle", url);
        }
        if capture {
            self.filmstrip_frame(page, &mut pass.capture, LifecycleStage::NetworkSettled, started)
                .await;
        }

        tokio::time::sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;
        if capture {
            self.filmstrip_frame(page, &mut pass.capture, LifecycleStage::FullySettled, started)
                .await;
        }

        pass.dom = page
            .evaluate(DOM_SUMMARY_SCRIPT)
            .await?
            .into_value::<DomSummary>()
            .map_err(|e| ScanError::ParseError(format!("DOM summary for {}: {}", url, e)))?;
        pass.html = Some(page.content().await?);

        if capture {
            match page
                .screenshot(
                    ScreenshotParams::builder()
                        .format(CaptureScreenshotFormat::Png)
                        .full_page(true)
                        .build(),
                )
                .await
            {
                Ok(png) => pass.capture.screenshot = Some(Bytes::from(png)),
                Err(e) => warn!("Full-page screenshot of {} failed: {}", url, e),
            }
            pass.capture.segments = self
                .capture_segments(page, &pass.dom, device)
                .await;
        }

        if options.run_accessibility
            && let Some(analyzer) = &self.accessibility
        {
            pass.accessibility = analyzer
                .analyze(page, url)
                .await
                .into_iter()
                .map(|issue| issue.with_device(device))
                .collect();
        }

        let telemetry = listeners.detach();
        let is_main_document =
            |r: &ObservedResponse| r.document && r.frame_id.as_deref() == Some(frame_id.as_str());
        if let Some(document) = telemetry.responses.iter().find(|r| is_main_document(*r)) {
            pass.status_code = Some(document.status);
            pass.ttfb = document.ttfb;
        }
        pass.broken_resources = telemetry
            .responses
            .iter()
            .filter(|r| r.status >= 400 && !is_main_document(*r))
            .map(|r| BrokenResource {
                status: r.status,
                url: r.url.clone(),
            })
            .collect();
        pass.console_errors = telemetry.console_errors;

        Ok(pass)
    }

    async fn filmstrip_frame(
        &self,
        page: &Page,
        capture: &mut DeviceCapture,
        stage: LifecycleStage,
        started: Instant,
    ) {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        match page.screenshot(params).await {
            Ok(png) => capture.filmstrip.push(FilmstripFrame {
                stage,
                elapsed: started.elapsed(),
                image: Bytes::from(png),
            }),
            Err(e) => debug!("Filmstrip frame {} failed: {}", stage.as_str(), e),
        }
    }

    /// Viewport-height bands down the page, capped at `max_segments`.
    async fn capture_segments(
        &self,
        page: &Page,
        dom: &DomSummary,
        device: DeviceType,
    ) -> Vec<Bytes> {
        let viewport = device.viewport();
        let band = viewport.height as f64;
        let height = dom.page_height.unwrap_or(band).max(band);
        let count = ((height / band).ceil() as usize).clamp(1, self.settings.max_segments.max(1));

        let mut segments = Vec::with_capacity(count);
        for index in 0..count {
            let y = index as f64 * band;
            if let Err(e) = page.evaluate(format!("window.scrollTo(0, {})", y)).await {
                debug!("Scroll to {} failed: {}", y, e);
                break;
            }
            let clip = Viewport {
                x: 0.0,
                y,
                width: viewport.width as f64,
                height: band.min(height - y),
                scale: 1.0,
            };
            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .clip(clip)
                .build();
            match page.screenshot(params).await {
                Ok(png) => segments.push(Bytes::from(png)),
                Err(e) => {
                    debug!("Segment {} failed: {}", index, e);
                    break;
                }
            }
        }
        if let Err(e) = page.evaluate("window.scrollTo(0, 0)").await {
            debug!("Scroll reset failed: {}", e);
        }
        segments
    }
}

/// Fold the device passes into one result. The first pass supplies the
/// DOM and telemetry; a pass that failed to load ends the page.
fn assemble_passes(url: &str, passes: Vec<DevicePass>) -> PageScanResult {
    let mut result = PageScanResult::new(url, ScanStrategy::Browser);
    let mut extra_issues = Vec::new();
    let mut primary = true;

    for pass in passes {
        let device = pass.capture.device;
        if let Some(error) = pass.load_error {
            warn!("Page load failed for {} ({}): {}", url, device.as_str(), error);
            if !pass.capture.is_empty() {
                result.captures.push(pass.capture);
            }
            result.issues =
                vec![Issue::page_load_failed(url, IssueSource::Browser, &error).with_device(device)];
            return result;
        }

        if !pass.capture.is_empty() {
            result.captures.push(pass.capture);
        }
        extra_issues.extend(pass.accessibility);

        if primary {
            result.dom = pass.dom;
            result.html = pass.html;
            result.status_code = pass.status_code;
            result.ttfb = pass.ttfb;
            result.console_errors = pass.console_errors;
            result.broken_resources = pass.broken_resources;
            primary = false;
        } else {
            for resource in pass.broken_resources {
                if !result.broken_resources.contains(&resource) {
                    result.broken_resources.push(resource);
                }
            }
        }
    }

    result.issues = analyze_rendered_page(&result);
    result.issues.extend(extra_issues);
    result
}

#[async_trait]
impl PageScanner for BrowserScanner {
    async fn scan(&self, url: &str, options: &ScanOptions) -> Result<PageScanResult> {
        let mut passes = Vec::new();
        for device in options.devices.devices() {
            let pass = self.scan_device(url, device, options).await?;
            let failed = pass.load_error.is_some();
            passes.push(pass);
            if failed {
                break;
            }
        }

        let result = assemble_passes(url, passes);
        debug!(
            "Rendered {} with {} captures and {} issues",
            url,
            result.captures.len(),
            result.issues.len()
        );
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::{Category, Severity, messages};
    use crate::result::Heading;

    fn mark(frame: &str, loader: &str, name: &str) -> LifecycleMark {
        LifecycleMark {
            frame_id: frame.into(),
            loader_id: loader.into(),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_lifecycle_watcher_remembers_early_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = LifecycleWatcher {
            rx,
            seen: Vec::new(),
        };
        tx.send(mark("f1", "blank", DOM_READY)).unwrap();
        tx.send(mark("f1", "l1", DOM_READY)).unwrap();
        tx.send(mark("f1", "l1", NETWORK_IDLE)).unwrap();

        assert!(
            watcher
                .wait_for("f1", Some("l1"), NETWORK_IDLE, Duration::from_millis(50))
                .await
        );
        // Already drained past this one; it must come from the seen list.
        assert!(
            watcher
                .wait_for("f1", Some("l1"), DOM_READY, Duration::from_millis(50))
                .await
        );
    }

    #[tokio::test]
    async fn test_lifecycle_watcher_ignores_other_loaders() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher = LifecycleWatcher {
            rx,
            seen: Vec::new(),
        };
        tx.send(mark("f1", "blank", NETWORK_IDLE)).unwrap();
        tx.send(mark("f2", "l1", NETWORK_IDLE)).unwrap();

        assert!(
            !watcher
                .wait_for("f1", Some("l1"), NETWORK_IDLE, Duration::from_millis(20))
                .await
        );
    }

    fn rendered_pass(device: DeviceType) -> DevicePass {
        DevicePass {
            capture: DeviceCapture::new(device),
            dom: DomSummary {
                title: Some("Pricing plans for every team".into()),
                meta_description: Some("Compare plans and pick the one that fits.".into()),
                headings: vec![Heading {
                    level: 1,
                    text: "Pricing".into(),
                }],
                language: Some("en".into()),
                has_viewport: true,
                ..DomSummary::default()
            },
            html: Some("<html></html>".into()),
            status_code: Some(200),
            ttfb: Some(Duration::from_millis(120)),
            console_errors: Vec::new(),
            broken_resources: Vec::new(),
            accessibility: Vec::new(),
            load_error: None,
        }
    }

    #[test]
    fn test_accessibility_issues_land_in_result() {
        let mut desktop = rendered_pass(DeviceType::Desktop);
        desktop.accessibility = vec![
            Issue::new(
                Category::Accessibility,
                Severity::Warning,
                "unnamed_buttons",
                IssueSource::Accessibility,
            )
            .with_url("https://example.com/pricing")
            .with_device(DeviceType::Desktop),
        ];
        let mobile = rendered_pass(DeviceType::Mobile);

        let result = assemble_passes("https://example.com/pricing", vec![desktop, mobile]);
        let found: Vec<_> = result
            .issues
            .iter()
            .filter(|i| i.source == IssueSource::Accessibility)
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message, "unnamed_buttons");
        assert_eq!(found[0].device, Some(DeviceType::Desktop));
        assert_eq!(result.status_code, Some(200));
    }

    #[test]
    fn test_failed_pass_replaces_issues() {
        let mut desktop = rendered_pass(DeviceType::Desktop);
        desktop.accessibility = vec![Issue::new(
            Category::Accessibility,
            Severity::Warning,
            "empty_links",
            IssueSource::Accessibility,
        )];
        let mut mobile = rendered_pass(DeviceType::Mobile);
        mobile.load_error = Some("net::ERR_CONNECTION_RESET".into());

        let result = assemble_passes("https://example.com/", vec![desktop, mobile]);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].message, messages::PAGE_LOAD_FAILED);
        assert_eq!(result.issues[0].device, Some(DeviceType::Mobile));
    }

    #[tokio::test]
    async fn test_listener_tasks_abort_on_drop() {
        let mut tasks = ListenerTasks::default();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tasks.push(tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        }));

        drop(tasks);
        // The sender is dropped only once the task is torn down.
        assert!(rx.await.is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = BrowserSettings::default();
        assert!(settings.headless);
        assert_eq!(settings.max_segments, 8);
        assert_eq!(settings.settle_delay_ms, 1500);
    }
}
