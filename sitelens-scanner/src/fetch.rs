use crate::analyzer::StaticAnalyzer;
use crate::checks::check_http_status;
use crate::error::{Result, ScanError};
use crate::issue::IssueSource;
use crate::page::{DESKTOP_USER_AGENT, PageScanner, ScanOptions};
use crate::result::{DomSummary, PageScanResult, ScanStrategy};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::debug;

static TITLE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex"));

static META_DESCRIPTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)<meta\s+[^>]*name\s*=\s*["']description["'][^>]*content\s*=\s*["']([^"']*)["']|<meta\s+[^>]*content\s*=\s*["']([^"']*)["'][^>]*name\s*=\s*["']description["']"#,
    )
    .expect("static regex")
});

/// Lightweight scanner: one timed GET, pattern-matched metadata, static analysis.
///
/// Produces no screenshots.
pub struct FetchScanner {
    client: Client,
    timeout: Duration,
    analyzer: Arc<dyn StaticAnalyzer>,
}

impl FetchScanner {
    pub fn new(analyzer: Arc<dyn StaticAnalyzer>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(DESKTOP_USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self::with_client(client, analyzer))
    }

    pub fn with_client(client: Client, analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(15),
            analyzer,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl PageScanner for FetchScanner {
    async fn scan(&self, url: &str, _options: &ScanOptions) -> Result<PageScanResult> {
        debug!("Fetching {}", url);
        let start = Instant::now();

        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| ScanError::Timeout {
                what: url.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        // Headers are in, so this is time to first byte.
        let ttfb = start.elapsed();
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let remaining = self.timeout.saturating_sub(ttfb);
        let html = tokio::time::timeout(remaining, response.text())
            .await
            .map_err(|_| ScanError::Timeout {
                what: url.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        let mut result = PageScanResult::new(url, ScanStrategy::Fetch);
        result.status_code = Some(status);
        result.ttfb = Some(ttfb);
        result.dom = extract_summary(&html);

        if let Some(issue) = check_http_status(url, status, IssueSource::Fetch) {
            result.issues.push(issue);
        }
        result
            .issues
            .extend(self.analyzer.analyze(&html, url, &headers, ttfb));
        result.html = Some(html);

        debug!(
            "Fetched {} [{}] in {:?} with {} issues",
            url,
            status,
            ttfb,
            result.issues.len()
        );
        Ok(result)
    }

    fn name(&self) -> &'static str {
        "fetch"
    }
}

/// Title and meta description straight from raw markup.
pub fn extract_summary(html: &str) -> DomSummary {
    let title = TITLE_PATTERN
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|t| !t.is_empty());

    let meta_description = META_DESCRIPTION_PATTERN
        .captures(html)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| collapse_whitespace(m.as_str()))
        .filter(|d| !d.is_empty());

    DomSummary {
        title,
        meta_description,
        ..Default::default()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
