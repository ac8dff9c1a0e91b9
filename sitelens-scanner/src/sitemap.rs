//! Sitemap parsing and traversal.
//!
//! Sitemap indexes are walked breadth-first over an explicit queue with a
//! shared visited set and a hard depth limit, so a self-referencing index can
//! never recurse without bound.

use crate::filter::{is_auditable, normalize_key};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::collections::{HashSet, VecDeque};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Conventional sitemap locations tried after any `Sitemap:` directives.
pub const COMMON_SITEMAP_PATHS: [&str; 10] = [
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/wp-sitemap.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
    "/sitemap1.xml",
    "/post-sitemap.xml",
    "/page-sitemap.xml",
    "/sitemap/index.xml",
];

static LOC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc>\s*(?:<!\[CDATA\[)?\s*(.*?)\s*(?:\]\]>)?\s*</loc>")
        .expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// A `<urlset>` listing page locations.
    UrlSet(Vec<String>),
    /// A `<sitemapindex>` listing child sitemap locations.
    Index(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct UrlSetXml {
    #[serde(rename = "url", default)]
    entries: Vec<LocXml>,
}

#[derive(Debug, Deserialize)]
struct SitemapIndexXml {
    #[serde(rename = "sitemap", default)]
    entries: Vec<LocXml>,
}

#[derive(Debug, Deserialize)]
struct LocXml {
    loc: Option<String>,
}

fn root_element(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                let name = e.local_name();
                return Some(String::from_utf8_lossy(name.as_ref()).to_lowercase());
            }
            Ok(Event::Eof) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

fn clean_locs(entries: Vec<LocXml>) -> Vec<String> {
    entries
        .into_iter()
        .filter_map(|e| e.loc)
        .map(|loc| loc.trim().to_string())
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn regex_locs(body: &str) -> Vec<String> {
    LOC_PATTERN
        .captures_iter(body)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|loc| !loc.is_empty())
        .collect()
}

/// Parse a sitemap body. Returns `None` when the body is not a sitemap at all
/// (an HTML soft-404, an empty body, a JSON error page, ...).
pub fn parse_sitemap(body: &str) -> Option<SitemapDocument> {
    let body = body.trim_start_matches('\u{feff}').trim();
    if body.is_empty() {
        return None;
    }

    match root_element(body)?.as_str() {
        "urlset" => {
            let locs = match quick_xml::de::from_str::<UrlSetXml>(body) {
                Ok(doc) => clean_locs(doc.entries),
                Err(e) => {
                    debug!("Strict urlset parse failed ({}), falling back to <loc> scan", e);
                    regex_locs(body)
                }
            };
            Some(SitemapDocument::UrlSet(locs))
        }
        "sitemapindex" => {
            let locs = match quick_xml::de::from_str::<SitemapIndexXml>(body) {
                Ok(doc) => clean_locs(doc.entries),
                Err(e) => {
                    debug!("Strict sitemapindex parse failed ({}), falling back to <loc> scan", e);
                    regex_locs(body)
                }
            };
            Some(SitemapDocument::Index(locs))
        }
        _ => None,
    }
}

/// Extract `Sitemap:` directive values from a robots.txt body.
pub fn sitemap_directives(robots: &str) -> Vec<String> {
    robots
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (key, value) = line.split_once(':')?;
            if key.trim().eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            } else {
                None
            }
        })
        .collect()
}

/// What one walk over a sitemap tree produced.
#[derive(Debug, Default, Clone)]
pub struct SitemapHarvest {
    pub urls: Vec<String>,
    /// At least one genuine sitemap document parsed during the walk.
    pub found_sitemap: bool,
}

pub struct SitemapWalker<'a> {
    client: &'a Client,
    timeout: Duration,
    max_depth: usize,
    cap: usize,
}

impl<'a> SitemapWalker<'a> {
    pub fn new(client: &'a Client, timeout: Duration, max_depth: usize, cap: usize) -> Self {
        Self {
            client,
            timeout,
            max_depth,
            cap,
        }
    }

    /// Fetch and walk the sitemap at `url`.
    pub async fn walk(&self, url: &str, visited: &mut HashSet<String>) -> SitemapHarvest {
        self.drain(url, None, visited).await
    }

    /// Walk a sitemap whose body is already known; child sitemaps are fetched live.
    pub async fn walk_body(
        &self,
        url: &str,
        body: String,
        visited: &mut HashSet<String>,
    ) -> SitemapHarvest {
        self.drain(url, Some(body), visited).await
    }

    async fn drain(
        &self,
        start_url: &str,
        start_body: Option<String>,
        visited: &mut HashSet<String>,
    ) -> SitemapHarvest {
        let mut harvest = SitemapHarvest::default();
        let mut seen_pages: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize, Option<String>)> = VecDeque::new();

        if !visited.insert(normalize_key(start_url)) && start_body.is_none() {
            debug!("Sitemap {} already visited", start_url);
            return harvest;
        }
        queue.push_back((start_url.to_string(), 0, start_body));

        while let Some((url, depth, body)) = queue.pop_front() {
            if harvest.urls.len() >= self.cap {
                break;
            }

            let body = match body {
                Some(body) => body,
                None => match self.fetch(&url).await {
                    Some(body) => body,
                    None => continue,
                },
            };

            let Some(document) = parse_sitemap(&body) else {
                debug!("{} is not a sitemap", url);
                continue;
            };

            harvest.found_sitemap = true;

            match document {
                SitemapDocument::UrlSet(locs) => {
                    debug!("Sitemap {} lists {} URLs", url, locs.len());
                    for loc in locs {
                        if harvest.urls.len() >= self.cap {
                            break;
                        }
                        if is_auditable(&loc) && seen_pages.insert(normalize_key(&loc)) {
                            harvest.urls.push(loc);
                        }
                    }
                }
                SitemapDocument::Index(children) => {
                    debug!("Sitemap index {} lists {} children", url, children.len());
                    if depth + 1 > self.max_depth {
                        warn!("Sitemap index {} exceeds depth {}, skipping children", url, self.max_depth);
                        continue;
                    }
                    for child in children {
                        if visited.insert(normalize_key(&child)) {
                            queue.push_back((child, depth + 1, None));
                        }
                    }
                }
            }
        }

        harvest
    }

    async fn fetch(&self, url: &str) -> Option<String> {
        let response = match self.client.get(url).timeout(self.timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Sitemap fetch {} failed: {}", url, e);
                return None;
            }
        };
        if !response.status().is_success() {
            debug!("Sitemap fetch {} returned {}", url, response.status());
            return None;
        }
        response.text().await.ok()
    }
}
