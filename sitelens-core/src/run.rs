//! The audit run record and its partial-update patch.

use crate::collaborators::PerformanceDiagnostics;
use crate::scoring::CategoryScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitelens_scanner::discovery::DiscoveryMethod;
use sitelens_scanner::issue::{DeviceType, Issue};
use sitelens_scanner::result::{LifecycleStage, ScanStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Completed => "COMPLETED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(RunStatus::Pending),
            "RUNNING" => Some(RunStatus::Running),
            "COMPLETED" => Some(RunStatus::Completed),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current_step: usize,
    pub total_steps: usize,
    pub percentage: u8,
    pub label: String,
}

impl Progress {
    pub fn new(current_step: usize, total_steps: usize, percentage: u8, label: impl Into<String>) -> Self {
        Self {
            current_step,
            total_steps,
            percentage: percentage.min(100),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotRefs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile: Option<String>,
}

impl ScreenshotRefs {
    pub fn set(&mut self, device: DeviceType, reference: String) {
        match device {
            DeviceType::Desktop => self.desktop = Some(reference),
            DeviceType::Mobile => self.mobile = Some(reference),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.desktop.is_none() && self.mobile.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentRef {
    pub device: DeviceType,
    pub index: usize,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmstripRef {
    pub device: DeviceType,
    pub stage: LifecycleStage,
    pub elapsed_ms: u64,
    pub url: String,
}

/// One scanned page as persisted on the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub strategy: ScanStrategy,
    pub status_code: Option<u16>,
    pub ttfb_ms: Option<u64>,
    pub title: String,
    pub language: Option<String>,
    pub issue_count: usize,
    pub console_error_count: usize,
    pub broken_resource_count: usize,
    #[serde(default)]
    pub screenshots: ScreenshotRefs,
    #[serde(default)]
    pub segments: Vec<SegmentRef>,
    #[serde(default)]
    pub filmstrip: Vec<FilmstripRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<PerformanceDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRun {
    pub id: String,
    pub site_id: String,
    pub status: RunStatus,
    pub discovery_method: Option<DiscoveryMethod>,
    pub has_sitemap: bool,
    pub pages_found: usize,
    pub pages_scanned: usize,
    pub overall_score: Option<u8>,
    pub category_scores: Option<CategoryScores>,
    pub issues: Vec<Issue>,
    pub pages: Vec<PageRecord>,
    pub progress: Progress,
    pub summary: Option<String>,
    #[serde(default)]
    pub homepage_screenshots: ScreenshotRefs,
    pub counts_toward_usage: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AuditRun {
    pub fn new(site_id: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            site_id: site_id.into(),
            status: RunStatus::Pending,
            discovery_method: None,
            has_sitemap: false,
            pages_found: 0,
            pages_scanned: 0,
            overall_score: None,
            category_scores: None,
            issues: Vec::new(),
            pages: Vec::new(),
            progress: Progress::default(),
            summary: None,
            homepage_screenshots: ScreenshotRefs::default(),
            counts_toward_usage: true,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a patch. Fields left `None` in the patch are untouched.
    pub fn apply(&mut self, update: RunUpdate) {
        let RunUpdate {
            status,
            discovery_method,
            has_sitemap,
            pages_found,
            pages_scanned,
            overall_score,
            category_scores,
            issues,
            pages,
            progress,
            summary,
            homepage_screenshots,
            counts_toward_usage,
            started_at,
            completed_at,
        } = update;

        if let Some(v) = status {
            self.status = v;
        }
        if let Some(v) = discovery_method {
            self.discovery_method = Some(v);
        }
        if let Some(v) = has_sitemap {
            self.has_sitemap = v;
        }
        if let Some(v) = pages_found {
            self.pages_found = v;
        }
        if let Some(v) = pages_scanned {
            self.pages_scanned = v;
        }
        if let Some(v) = overall_score {
            self.overall_score = Some(v);
        }
        if let Some(v) = category_scores {
            self.category_scores = Some(v);
        }
        if let Some(v) = issues {
            self.issues = v;
        }
        if let Some(v) = pages {
            self.pages = v;
        }
        if let Some(v) = progress {
            self.progress = v;
        }
        if let Some(v) = summary {
            self.summary = Some(v);
        }
        if let Some(v) = homepage_screenshots {
            self.homepage_screenshots = v;
        }
        if let Some(v) = counts_toward_usage {
            self.counts_toward_usage = v;
        }
        if let Some(v) = started_at {
            self.started_at = Some(v);
        }
        if let Some(v) = completed_at {
            self.completed_at = Some(v);
        }
    }
}

/// A partial-field update of an [`AuditRun`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub discovery_method: Option<DiscoveryMethod>,
    pub has_sitemap: Option<bool>,
    pub pages_found: Option<usize>,
    pub pages_scanned: Option<usize>,
    pub overall_score: Option<u8>,
    pub category_scores: Option<CategoryScores>,
    pub issues: Option<Vec<Issue>>,
    pub pages: Option<Vec<PageRecord>>,
    pub progress: Option<Progress>,
    pub summary: Option<String>,
    pub homepage_screenshots: Option<ScreenshotRefs>,
    pub counts_toward_usage: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunUpdate {
    pub fn progress(progress: Progress) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}
