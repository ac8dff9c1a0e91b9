// Passive checks for fetched pages and site-wide robots/sitemap validation

use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde_json::json;
use sitelens_scanner::ScanError;
use sitelens_scanner::StaticAnalyzer;
use sitelens_scanner::checks::{check_ttfb, document_issues, summarize_html};
use sitelens_scanner::issue::{Category, Issue, IssueSource, Severity, messages};
use sitelens_scanner::sitemap::sitemap_directives;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);
pub const SITEMAP_TIMEOUT: Duration = Duration::from_secs(10);

/// Response headers every HTML page should set. HSTS only applies over https.
const SECURITY_HEADERS: [&str; 4] = [
    "x-frame-options",
    "content-security-policy",
    "strict-transport-security",
    "x-content-type-options",
];

fn is_local_host(host: &str) -> bool {
    host.starts_with("127.") || host == "localhost"
}

/// `lang` of the root element, if set.
pub fn document_language(html: &str) -> Option<String> {
    summarize_html(html).language
}

/// Document rules over raw markup.
pub fn check_document(html: &str, url: &str) -> Vec<Issue> {
    document_issues(url, &summarize_html(html), IssueSource::StaticAnalyzer)
}

/// One issue listing every missing header, so deduplication keeps them together.
pub fn check_security_headers(url: &str, headers: &HeaderMap) -> Option<Issue> {
    let https = Url::parse(url).is_ok_and(|u| u.scheme() == "https");
    let missing: Vec<&str> = SECURITY_HEADERS
        .iter()
        .copied()
        .filter(|name| https || *name != "strict-transport-security")
        .filter(|name| !headers.contains_key(*name))
        .collect();

    if missing.is_empty() {
        return None;
    }
    Some(
        Issue::new(
            Category::Technical,
            Severity::Notice,
            messages::MISSING_SECURITY_HEADER,
            IssueSource::StaticAnalyzer,
        )
        .with_url(url)
        .with_suggestion(messages::SUGGEST_ADD_SECURITY_HEADER)
        .with_details(json!({ "missing": missing })),
    )
}

pub fn check_insecure_transport(url: &str) -> Option<Issue> {
    let parsed = Url::parse(url).ok()?;
    if parsed.scheme() != "http" {
        return None;
    }

    // Local development hosts are exempt
    let host = parsed.host_str()?;
    if is_local_host(host) {
        return None;
    }

    Some(
        Issue::new(
            Category::Technical,
            Severity::Warning,
            messages::INSECURE_TRANSPORT,
            IssueSource::StaticAnalyzer,
        )
        .with_url(url)
        .with_suggestion(messages::SUGGEST_ENABLE_HTTPS)
        .with_details(json!({ "scheme": "http" })),
    )
}

/// True when the `User-agent: *` group disallows the whole site.
pub fn robots_blocks_all(robots: &str) -> bool {
    let mut in_wildcard_group = false;
    let mut previous_was_agent = false;

    for raw in robots.lines() {
        let line = raw.split('#').next().unwrap_or_default().trim();
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let field = field.trim().to_ascii_lowercase();
        let value = value.trim();

        if field == "user-agent" {
            // Consecutive user-agent lines share one group.
            if !previous_was_agent {
                in_wildcard_group = false;
            }
            in_wildcard_group |= value == "*";
            previous_was_agent = true;
            continue;
        }
        previous_was_agent = false;

        if in_wildcard_group && field == "disallow" && value == "/" {
            return true;
        }
    }
    false
}

pub struct BasicStaticAnalyzer {
    client: Client,
    robots_timeout: Duration,
    sitemap_timeout: Duration,
}

impl BasicStaticAnalyzer {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(ScanError::from)?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            robots_timeout: ROBOTS_TIMEOUT,
            sitemap_timeout: SITEMAP_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, robots: Duration, sitemap: Duration) -> Self {
        self.robots_timeout = robots;
        self.sitemap_timeout = sitemap;
        self
    }

    async fn fetch_text(&self, url: &str, timeout: Duration) -> Option<String> {
        let response = self.client.get(url).timeout(timeout).send().await.ok()?;
        if !response.status().is_success() {
            debug!("{} returned {}", url, response.status());
            return None;
        }
        response.text().await.ok()
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self
            .client
            .get(url)
            .timeout(self.sitemap_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Sitemap check for {} failed: {}", url, e);
                false
            }
        }
    }
}

#[async_trait]
impl StaticAnalyzer for BasicStaticAnalyzer {
    fn analyze(&self, html: &str, url: &str, headers: &HeaderMap, ttfb: Duration) -> Vec<Issue> {
        let mut issues = check_document(html, url);
        issues.extend(check_security_headers(url, headers));
        issues.extend(check_insecure_transport(url));
        issues.push(check_ttfb(url, ttfb, IssueSource::StaticAnalyzer));
        issues
    }

    async fn check_robots_and_sitemap(&self, base_url: &str) -> Vec<Issue> {
        let source = IssueSource::SiteChecks;
        let base = base_url.trim_end_matches('/');
        let robots_url = format!("{}/robots.txt", base);
        let mut issues = Vec::new();

        let robots = self.fetch_text(&robots_url, self.robots_timeout).await;
        let declared = robots.as_deref().map(sitemap_directives).unwrap_or_default();

        match robots.as_deref() {
            None => issues.push(
                Issue::new(Category::Technical, Severity::Warning, messages::ROBOTS_MISSING, source)
                    .with_url(&robots_url)
                    .with_suggestion(messages::SUGGEST_ADD_ROBOTS),
            ),
            Some(body) if robots_blocks_all(body) => issues.push(
                Issue::new(Category::Technical, Severity::Error, messages::ROBOTS_BLOCKS_ALL, source)
                    .with_url(&robots_url)
                    .with_suggestion(messages::SUGGEST_UNBLOCK_ROBOTS),
            ),
            Some(_) if declared.is_empty() => issues.push(
                Issue::new(Category::Technical, Severity::Notice, messages::ROBOTS_NO_SITEMAP, source)
                    .with_url(&robots_url)
                    .with_suggestion(messages::SUGGEST_ADD_SITEMAP),
            ),
            Some(_) => issues.push(
                Issue::new(Category::Technical, Severity::Passed, messages::ROBOTS_OK, source)
                    .with_url(&robots_url),
            ),
        }

        let sitemap_url = declared
            .into_iter()
            .next()
            .unwrap_or_else(|| format!("{}/sitemap.xml", base));
        if self.is_reachable(&sitemap_url).await {
            issues.push(
                Issue::new(Category::Technical, Severity::Passed, messages::SITEMAP_OK, source)
                    .with_url(&sitemap_url),
            );
        } else {
            issues.push(
                Issue::new(
                    Category::Technical,
                    Severity::Warning,
                    messages::SITEMAP_UNREACHABLE,
                    source,
                )
                .with_url(&sitemap_url)
                .with_suggestion(messages::SUGGEST_ADD_SITEMAP),
            );
        }

        issues
    }
}
