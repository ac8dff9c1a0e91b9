use crate::error::{Result, ScanError};
use crate::filter::{is_auditable, is_same_site, normalize_key, site_domain};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

static LINK_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Same-domain link crawler used as the last-resort discovery strategy.
///
/// The crawl is two levels deep: the homepage, then up to
/// `max_second_level` of the pages it links to.
pub struct LinkCrawler {
    client: Client,
    timeout: Duration,
    max_second_level: usize,
    concurrency: usize,
}

impl LinkCrawler {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self {
            client,
            timeout,
            max_second_level: 10,
            concurrency: 4,
        }
    }

    pub fn with_max_second_level(mut self, pages: usize) -> Self {
        self.max_second_level = pages;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Crawl the homepage and its first-level links.
    ///
    /// Returns an empty list when the homepage itself cannot be fetched.
    pub async fn crawl(&self, homepage: &str) -> Vec<String> {
        info!("Crawling {} for links", homepage);

        let Some(root_domain) = site_domain(homepage) else {
            warn!("Cannot crawl {}: no host", homepage);
            return Vec::new();
        };

        let first_level = match self.fetch_links(homepage, &root_domain).await {
            Ok(links) => links,
            Err(e) => {
                warn!("Crawl of homepage {} failed: {}", homepage, e);
                return Vec::new();
            }
        };

        let mut seen: HashSet<String> = HashSet::new();
        seen.insert(normalize_key(homepage));
        let mut found = vec![homepage.to_string()];
        for link in &first_level {
            if seen.insert(normalize_key(link)) {
                found.push(link.clone());
            }
        }

        let targets: Vec<String> = found
            .iter()
            .skip(1)
            .take(self.max_second_level)
            .cloned()
            .collect();

        debug!("Fetching {} second-level pages", targets.len());

        // `buffered` keeps results in submission order so the merged list is stable.
        let second_level: Vec<Vec<String>> = stream::iter(targets)
            .map(|url| {
                let root_domain = root_domain.clone();
                async move {
                    match self.fetch_links(&url, &root_domain).await {
                        Ok(links) => links,
                        Err(e) => {
                            debug!("Second-level fetch {} failed: {}", url, e);
                            Vec::new()
                        }
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        for link in second_level.into_iter().flatten() {
            if seen.insert(normalize_key(&link)) {
                found.push(link);
            }
        }

        info!("Crawl of {} found {} URLs", homepage, found.len());
        found
    }

    async fn fetch_links(&self, url: &str, root_domain: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ScanError::Other(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let is_html = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/html"))
            .unwrap_or(true);

        let body = response.text().await?;
        if !is_html {
            return Ok(Vec::new());
        }
        Ok(extract_links(&body, url, root_domain))
    }
}

/// Extract auditable same-site links from a page, in document order.
pub fn extract_links(html: &str, current_url: &str, root_domain: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    for element in document.select(&LINK_SELECTOR) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Some(absolute_url) = resolve_url(current_url, href) else {
            continue;
        };
        if is_same_site(&absolute_url, root_domain) && is_auditable(&absolute_url) {
            links.push(absolute_url);
        } else {
            debug!("  -> Skipping {}", absolute_url);
        }
    }

    links
}

/// Resolve an `href` against the page it appeared on, dropping the fragment.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    // Skip empty, javascript:, mailto:, tel:, etc.
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut resolved = base_url.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);

    Some(resolved.to_string())
}
