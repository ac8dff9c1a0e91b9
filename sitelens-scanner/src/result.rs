use crate::issue::{DeviceType, Issue, IssueSource};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which scanner produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStrategy {
    Browser,
    Fetch,
    Failed,
}

impl ScanStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStrategy::Browser => "browser",
            ScanStrategy::Fetch => "fetch",
            ScanStrategy::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heading {
    pub level: u8,
    pub text: String,
}

/// DOM metadata extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomSummary {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub headings: Vec<Heading>,
    pub canonical: Option<String>,
    pub language: Option<String>,
    pub has_viewport: bool,
    pub image_count: usize,
    pub images_missing_alt: usize,
    pub link_count: usize,
    pub page_height: Option<f64>,
}

impl DomSummary {
    pub fn h1_count(&self) -> usize {
        self.headings.iter().filter(|h| h.level == 1).count()
    }

    pub fn first_h1(&self) -> Option<&str> {
        self.headings
            .iter()
            .find(|h| h.level == 1)
            .map(|h| h.text.as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleError {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenResource {
    pub status: u16,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleStage {
    InitialPaint,
    NetworkSettled,
    FullySettled,
}

impl LifecycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStage::InitialPaint => "initial-paint",
            LifecycleStage::NetworkSettled => "network-settled",
            LifecycleStage::FullySettled => "fully-settled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilmstripFrame {
    pub stage: LifecycleStage,
    pub elapsed: Duration,
    pub image: Bytes,
}

/// Everything captured for one device viewport.
#[derive(Debug, Clone)]
pub struct DeviceCapture {
    pub device: DeviceType,
    pub screenshot: Option<Bytes>,
    pub segments: Vec<Bytes>,
    pub filmstrip: Vec<FilmstripFrame>,
}

impl DeviceCapture {
    pub fn new(device: DeviceType) -> Self {
        Self {
            device,
            screenshot: None,
            segments: Vec::new(),
            filmstrip: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.screenshot.is_none() && self.segments.is_empty() && self.filmstrip.is_empty()
    }
}

/// Outcome of scanning one URL. Never mutated once returned.
#[derive(Debug, Clone)]
pub struct PageScanResult {
    pub url: String,
    pub strategy: ScanStrategy,
    pub html: Option<String>,
    pub dom: DomSummary,
    pub status_code: Option<u16>,
    pub ttfb: Option<Duration>,
    pub console_errors: Vec<ConsoleError>,
    pub broken_resources: Vec<BrokenResource>,
    pub captures: Vec<DeviceCapture>,
    pub issues: Vec<Issue>,
}

impl PageScanResult {
    pub fn new(url: impl Into<String>, strategy: ScanStrategy) -> Self {
        Self {
            url: url.into(),
            strategy,
            html: None,
            dom: DomSummary::default(),
            status_code: None,
            ttfb: None,
            console_errors: Vec::new(),
            broken_resources: Vec::new(),
            captures: Vec::new(),
            issues: Vec::new(),
        }
    }

    /// A page neither scanner could load: one `technical/error` issue, nothing else.
    pub fn failed(url: &str, source: IssueSource, error: &str) -> Self {
        let mut result = Self::new(url, ScanStrategy::Failed);
        result.issues.push(Issue::page_load_failed(url, source, error));
        result
    }

    pub fn capture(&self, device: DeviceType) -> Option<&DeviceCapture> {
        self.captures.iter().find(|c| c.device == device)
    }

    pub fn screenshot(&self, device: DeviceType) -> Option<&Bytes> {
        self.capture(device).and_then(|c| c.screenshot.as_ref())
    }

    /// Whether any device produced a full-page screenshot. Segments and
    /// filmstrip frames alone do not count.
    pub fn has_screenshots(&self) -> bool {
        self.captures.iter().any(|c| c.screenshot.is_some())
    }

    pub fn ttfb_ms(&self) -> Option<u64> {
        self.ttfb.map(|d| d.as_millis() as u64)
    }
}
