//! Multi-strategy URL discovery.
//!
//! Strategies run in strict priority order and discovery stops at the first
//! one that yields URLs:
//!
//! 1. live sitemaps (robots.txt directives, then conventional paths)
//! 2. the authenticated platform API, then previously synced entities
//! 3. sitemap bodies cached from earlier scans
//! 4. the public content API
//! 5. a two-level same-domain crawl
//!
//! Discovery never fails. Every network call is time-boxed and each failure
//! is absorbed at the candidate it belongs to.

use crate::crawler::LinkCrawler;
use crate::filter::{finalize_urls, is_auditable, normalize_key};
use crate::sitemap::{COMMON_SITEMAP_PATHS, SitemapWalker, sitemap_directives};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Hard ceiling on discovered URLs.
pub const MAX_DISCOVERED_URLS: usize = 50;

/// Post types that never carry public pages.
const NON_CONTENT_TYPES: &[&str] = &[
    "attachment",
    "nav_menu_item",
    "wp_block",
    "wp_template",
    "wp_template_part",
    "wp_navigation",
    "wp_global_styles",
    "wp_font_family",
    "wp_font_face",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_urls: usize,
    pub max_sitemap_depth: usize,
    pub crawl_second_level_pages: usize,
    pub robots_timeout_secs: u64,
    pub sitemap_timeout_secs: u64,
    pub api_timeout_secs: u64,
    pub crawl_timeout_secs: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_urls: MAX_DISCOVERED_URLS,
            max_sitemap_depth: 2,
            crawl_second_level_pages: 10,
            robots_timeout_secs: 5,
            sitemap_timeout_secs: 10,
            api_timeout_secs: 15,
            crawl_timeout_secs: 10,
        }
    }
}

/// Credentials from a prior platform integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCredentials {
    /// API root; defaults to the site root when absent.
    #[serde(default)]
    pub api_base: Option<String>,
    pub username: String,
    pub application_password: String,
}

/// A sitemap body stored by an earlier scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSitemap {
    pub url: String,
    #[serde(default)]
    pub body: String,
}

/// A content record synced from the site's platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntity {
    pub url: Option<String>,
    pub kind: String,
    pub status: String,
}

impl StoredEntity {
    pub fn is_published(&self) -> bool {
        self.status.eq_ignore_ascii_case("published") || self.status.eq_ignore_ascii_case("publish")
    }
}

/// Everything discovery knows about the site being audited.
#[derive(Debug, Clone, Default)]
pub struct SiteProfile {
    pub root_url: String,
    pub credentials: Option<PlatformCredentials>,
    pub cached_sitemaps: Vec<CachedSitemap>,
    pub stored_entities: Vec<StoredEntity>,
}

impl SiteProfile {
    pub fn new(root_url: impl Into<String>) -> Self {
        Self {
            root_url: root_url.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    Sitemap,
    Plugin,
    StoredSitemap,
    WpApi,
    Crawl,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryMethod::Sitemap => "sitemap",
            DiscoveryMethod::Plugin => "plugin",
            DiscoveryMethod::StoredSitemap => "stored-sitemap",
            DiscoveryMethod::WpApi => "wp-api",
            DiscoveryMethod::Crawl => "crawl",
        }
    }
}

impl fmt::Display for DiscoveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    pub urls: Vec<String>,
    pub method: DiscoveryMethod,
    /// A genuine sitemap parsed at some point, even if its URLs were not used.
    pub has_sitemap: bool,
}

#[derive(Debug, Deserialize)]
struct ContentEntry {
    link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentType {
    rest_base: Option<String>,
}

pub struct Discovery {
    client: Client,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(client: Client, config: DiscoveryConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub async fn discover(&self, site: &SiteProfile) -> DiscoveryResult {
        let homepage = homepage_of(&site.root_url);
        let cap = self.config.max_urls.min(MAX_DISCOVERED_URLS);
        info!("Discovering pages for {}", homepage);

        let mut has_sitemap = false;
        let mut visited: HashSet<String> = HashSet::new();

        let (urls, found) = self.from_live_sitemaps(&homepage, &mut visited).await;
        has_sitemap |= found;
        if !urls.is_empty() {
            return self.finish(urls, &homepage, cap, DiscoveryMethod::Sitemap, has_sitemap);
        }

        // Synced entities only exist for connected sites.
        if let Some(credentials) = &site.credentials {
            let mut urls = self.from_platform_api(&homepage, credentials).await;
            if urls.is_empty() {
                urls = from_stored_entities(&site.stored_entities);
            }
            if !urls.is_empty() {
                return self.finish(urls, &homepage, cap, DiscoveryMethod::Plugin, has_sitemap);
            }
        }

        let (urls, found) = self
            .from_cached_sitemaps(&site.cached_sitemaps, &mut visited)
            .await;
        has_sitemap |= found;
        if !urls.is_empty() {
            return self.finish(urls, &homepage, cap, DiscoveryMethod::StoredSitemap, has_sitemap);
        }

        let urls = self.from_public_api(&homepage).await;
        if !urls.is_empty() {
            return self.finish(urls, &homepage, cap, DiscoveryMethod::WpApi, has_sitemap);
        }

        let crawler = LinkCrawler::new(
            self.client.clone(),
            Duration::from_secs(self.config.crawl_timeout_secs),
        )
        .with_max_second_level(self.config.crawl_second_level_pages);
        let urls = crawler.crawl(&homepage).await;
        self.finish(urls, &homepage, cap, DiscoveryMethod::Crawl, has_sitemap)
    }

    fn finish(
        &self,
        urls: Vec<String>,
        homepage: &str,
        cap: usize,
        method: DiscoveryMethod,
        has_sitemap: bool,
    ) -> DiscoveryResult {
        let urls = finalize_urls(urls, homepage, cap);
        info!(
            "Discovered {} URLs via {} (sitemap found: {})",
            urls.len(),
            method,
            has_sitemap
        );
        DiscoveryResult {
            urls,
            method,
            has_sitemap,
        }
    }

    fn walker(&self) -> SitemapWalker<'_> {
        SitemapWalker::new(
            &self.client,
            Duration::from_secs(self.config.sitemap_timeout_secs),
            self.config.max_sitemap_depth,
            self.config.max_urls,
        )
    }

    /// Returns the harvested URLs and whether any genuine sitemap was parsed.
    ///
    /// An empty but valid sitemap marks the site as having one without
    /// stopping the search through the remaining candidates.
    async fn from_live_sitemaps(
        &self,
        homepage: &str,
        visited: &mut HashSet<String>,
    ) -> (Vec<String>, bool) {
        let mut found_sitemap = false;
        let walker = self.walker();

        for candidate in self.sitemap_candidates(homepage).await {
            let harvest = walker.walk(&candidate, visited).await;
            found_sitemap |= harvest.found_sitemap;
            if !harvest.urls.is_empty() {
                debug!("Sitemap {} yielded {} URLs", candidate, harvest.urls.len());
                return (harvest.urls, true);
            }
        }

        (Vec::new(), found_sitemap)
    }

    async fn sitemap_candidates(&self, homepage: &str) -> Vec<String> {
        let mut candidates = Vec::new();
        let mut seen = HashSet::new();

        if let Some(robots_url) = join(homepage, "/robots.txt") {
            match self
                .client
                .get(&robots_url)
                .timeout(Duration::from_secs(self.config.robots_timeout_secs))
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    if let Ok(body) = response.text().await {
                        for directive in sitemap_directives(&body) {
                            if seen.insert(normalize_key(&directive)) {
                                candidates.push(directive);
                            }
                        }
                    }
                }
                Ok(response) => debug!("robots.txt returned {}", response.status()),
                Err(e) => debug!("robots.txt fetch failed: {}", e),
            }
        }

        for path in COMMON_SITEMAP_PATHS {
            if let Some(candidate) = join(homepage, path)
                && seen.insert(normalize_key(&candidate))
            {
                candidates.push(candidate);
            }
        }

        candidates
    }

    async fn from_platform_api(
        &self,
        homepage: &str,
        credentials: &PlatformCredentials,
    ) -> Vec<String> {
        let api_root = credentials
            .api_base
            .clone()
            .unwrap_or_else(|| homepage.to_string());

        let mut rest_bases = vec!["pages".to_string(), "posts".to_string()];
        if let Some(types_url) = join(&api_root, "/wp-json/wp/v2/types") {
            match self
                .api_get::<HashMap<String, ContentType>>(&types_url, Some(credentials))
                .await
            {
                Some(types) => {
                    let mut names: Vec<_> = types.into_iter().collect();
                    names.sort_by(|a, b| a.0.cmp(&b.0));
                    for (name, content_type) in names {
                        if NON_CONTENT_TYPES.contains(&name.as_str()) {
                            continue;
                        }
                        if let Some(base) = content_type.rest_base
                            && !rest_bases.contains(&base)
                        {
                            rest_bases.push(base);
                        }
                    }
                }
                None => debug!("Content type listing unavailable at {}", types_url),
            }
        }

        self.collect_links(&api_root, &rest_bases, Some(credentials))
            .await
    }

    async fn from_cached_sitemaps(
        &self,
        cached: &[CachedSitemap],
        visited: &mut HashSet<String>,
    ) -> (Vec<String>, bool) {
        let mut found_sitemap = false;
        let walker = self.walker();

        for snapshot in cached {
            let harvest = if snapshot.body.trim().is_empty() {
                debug!("Cached sitemap {} is empty, re-fetching", snapshot.url);
                walker.walk(&snapshot.url, visited).await
            } else {
                walker
                    .walk_body(&snapshot.url, snapshot.body.clone(), visited)
                    .await
            };
            found_sitemap |= harvest.found_sitemap;
            if !harvest.urls.is_empty() {
                return (harvest.urls, true);
            }
        }

        (Vec::new(), found_sitemap)
    }

    async fn from_public_api(&self, homepage: &str) -> Vec<String> {
        let rest_bases = ["pages".to_string(), "posts".to_string()];
        self.collect_links(homepage, &rest_bases, None).await
    }

    async fn collect_links(
        &self,
        api_root: &str,
        rest_bases: &[String],
        credentials: Option<&PlatformCredentials>,
    ) -> Vec<String> {
        let mut urls = Vec::new();
        for base in rest_bases {
            if urls.len() >= self.config.max_urls {
                break;
            }
            let path = format!("/wp-json/wp/v2/{}?per_page=100&_fields=link", base);
            let Some(endpoint) = join(api_root, &path) else {
                continue;
            };
            if let Some(entries) = self
                .api_get::<Vec<ContentEntry>>(&endpoint, credentials)
                .await
            {
                urls.extend(
                    entries
                        .into_iter()
                        .filter_map(|e| e.link)
                        .filter(|link| is_auditable(link)),
                );
            }
        }
        urls
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        credentials: Option<&PlatformCredentials>,
    ) -> Option<T> {
        let mut request = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.api_timeout_secs));
        if let Some(credentials) = credentials {
            request = request.basic_auth(
                &credentials.username,
                Some(&credentials.application_password),
            );
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("API request {} failed: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("API request {} returned {}", url, response.status());
            return None;
        }
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("API response from {} was not understood: {}", url, e);
                None
            }
        }
    }
}

/// Published entities first; drafts only when nothing is published.
fn from_stored_entities(entities: &[StoredEntity]) -> Vec<String> {
    let with_url: Vec<&StoredEntity> = entities
        .iter()
        .filter(|e| e.url.as_deref().is_some_and(|u| !u.trim().is_empty()))
        .collect();

    let published: Vec<String> = with_url
        .iter()
        .filter(|e| e.is_published())
        .filter_map(|e| e.url.clone())
        .collect();
    if !published.is_empty() {
        return published;
    }
    with_url.iter().filter_map(|e| e.url.clone()).collect()
}

/// Normalize a site root to its homepage URL (`https://host/`).
pub fn homepage_of(root_url: &str) -> String {
    match Url::parse(root_url.trim()) {
        Ok(mut url) => {
            url.set_path("/");
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => root_url.trim().to_string(),
    }
}

fn join(base: &str, path: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(path).ok().map(|u| u.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_homepage_of() {
        assert_eq!(homepage_of("https://example.com"), "https://example.com/");
        assert_eq!(
            homepage_of("https://example.com/blog?x=1#y"),
            "https://example.com/"
        );
    }

    #[test]
    fn test_stored_entities_prefer_published() {
        let entities = vec![
            StoredEntity {
                url: Some("https://example.com/draft".into()),
                kind: "page".into(),
                status: "draft".into(),
            },
            StoredEntity {
                url: Some("https://example.com/live".into()),
                kind: "page".into(),
                status: "published".into(),
            },
            StoredEntity {
                url: None,
                kind: "post".into(),
                status: "published".into(),
            },
        ];
        assert_eq!(
            from_stored_entities(&entities),
            vec!["https://example.com/live".to_string()]
        );
    }

    #[test]
    fn test_stored_entities_fall_back_to_unpublished() {
        let entities = vec![StoredEntity {
            url: Some("https://example.com/draft".into()),
            kind: "page".into(),
            status: "draft".into(),
        }];
        assert_eq!(
            from_stored_entities(&entities),
            vec!["https://example.com/draft".to_string()]
        );
    }

    #[test]
    fn test_method_names() {
        assert_eq!(DiscoveryMethod::StoredSitemap.as_str(), "stored-sitemap");
        assert_eq!(DiscoveryMethod::WpApi.to_string(), "wp-api");
        assert_eq!(
            serde_json::to_string(&DiscoveryMethod::StoredSitemap).unwrap(),
            "\"stored-sitemap\""
        );
    }
}
