//! Contracts for the services the orchestrator depends on.
//!
//! Apart from the store, every collaborator absorbs its own failures and
//! reports them as `None` or an empty list.

use crate::error::StoreResult;
use crate::run::{AuditRun, RunUpdate};
use crate::scoring::CategoryScores;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sitelens_scanner::StaticAnalyzer;
use sitelens_scanner::discovery::{CachedSitemap, PlatformCredentials, StoredEntity};
use sitelens_scanner::issue::Issue;
use std::sync::Arc;

/// A site registered for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub url: String,
    pub name: Option<String>,
    pub account_id: Option<String>,
    pub credentials: Option<PlatformCredentials>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn create_run(&self, run: &AuditRun) -> StoreResult<()>;

    /// Merge a patch into a run and return the updated record.
    async fn update_run(&self, id: &str, update: RunUpdate) -> StoreResult<AuditRun>;

    async fn find_site(&self, id: &str) -> StoreResult<Option<Site>>;

    async fn find_cached_sitemaps(&self, site_id: &str) -> StoreResult<Vec<CachedSitemap>>;

    async fn find_stored_entities(&self, site_id: &str) -> StoreResult<Vec<StoredEntity>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsStrategy {
    Mobile,
    Desktop,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceDiagnostics {
    pub score: Option<f64>,
    pub lcp: Option<f64>,
    pub cls: Option<f64>,
    pub inp: Option<f64>,
    pub fcp: Option<f64>,
    pub speed_index: Option<f64>,
    pub total_blocking_time: Option<f64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

#[async_trait]
pub trait DiagnosticsProvider: Send + Sync {
    async fn get_diagnostics(
        &self,
        url: &str,
        strategy: DiagnosticsStrategy,
    ) -> Option<PerformanceDiagnostics>;
}

/// Screens of one page sent to the vision analyzer.
#[derive(Debug, Clone)]
pub struct ScreenCapture {
    pub url: String,
    pub desktop: Option<Bytes>,
    pub mobile: Option<Bytes>,
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    /// All pages in one batch.
    async fn analyze_screens(&self, pages: &[ScreenCapture], site_url: &str) -> Vec<Issue>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Returns a stable public reference to the stored image.
    async fn upload_image(&self, image: Bytes, folder: &str, name: &str) -> Option<String>;
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(
        &self,
        issues: &[Issue],
        score: u8,
        categories: &CategoryScores,
        url: &str,
        page_count: usize,
    ) -> Option<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    AuditCompleted {
        run_id: String,
        site_id: String,
        site_url: String,
        score: u8,
    },
    AuditFailed {
        run_id: String,
        site_id: String,
        site_url: String,
        reason: String,
    },
}

/// One-way event sink.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, account_id: &str, event: AuditEvent);
}

/// Everything the orchestrator talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn AuditStore>,
    pub static_analyzer: Arc<dyn StaticAnalyzer>,
    pub diagnostics: Arc<dyn DiagnosticsProvider>,
    pub vision: Arc<dyn VisionAnalyzer>,
    pub images: Arc<dyn ImageStore>,
    pub summary: Arc<dyn SummaryGenerator>,
    pub notifier: Arc<dyn Notifier>,
}
