//! Seams for the external analyzers the page scanners call into.

use crate::issue::Issue;
use async_trait::async_trait;
pub use chromiumoxide::Page;
use reqwest::header::HeaderMap;
use std::time::Duration;

/// Static HTML and security-header analyzer.
#[async_trait]
pub trait StaticAnalyzer: Send + Sync {
    /// Issues for one fetched page.
    fn analyze(&self, html: &str, url: &str, headers: &HeaderMap, ttfb: Duration) -> Vec<Issue>;

    /// Site-wide robots.txt and sitemap validation. Never fails.
    async fn check_robots_and_sitemap(&self, base_url: &str) -> Vec<Issue>;
}

/// Accessibility analyzer run against a live page.
#[async_trait]
pub trait AccessibilityAnalyzer: Send + Sync {
    async fn analyze(&self, page: &Page, url: &str) -> Vec<Issue>;
}
