//! Audit findings.
//!
//! An [`Issue`] is an immutable value record produced by the scanners, the
//! site-wide checks and the external analyzers. The scoring engine consumes a
//! flat list of them.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Scoring bucket an issue counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Category {
    Technical,
    Performance,
    Visual,
    Accessibility,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Technical,
        Category::Performance,
        Category::Visual,
        Category::Accessibility,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Technical => "technical",
            Category::Performance => "performance",
            Category::Visual => "visual",
            Category::Accessibility => "accessibility",
        }
    }

    /// Unknown category names fold into `technical`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "performance" => Category::Performance,
            "visual" => Category::Visual,
            "accessibility" => Category::Accessibility,
            _ => Category::Technical,
        }
    }
}

impl From<String> for Category {
    fn from(s: String) -> Self {
        Category::parse(&s)
    }
}

impl From<Category> for String {
    fn from(c: Category) -> Self {
        c.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Severity {
    Error,
    Warning,
    Notice,
    Passed,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Passed => "passed",
        }
    }

    /// `info` and anything unrecognised read as `notice`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "error" => Severity::Error,
            "warning" => Severity::Warning,
            "passed" => Severity::Passed,
            _ => Severity::Notice,
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        Severity::parse(&s)
    }
}

impl From<Severity> for String {
    fn from(s: Severity) -> Self {
        s.as_str().to_string()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component that produced an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSource {
    Discovery,
    Browser,
    Fetch,
    StaticAnalyzer,
    Accessibility,
    Diagnostics,
    Vision,
    SiteChecks,
    Orchestrator,
}

impl IssueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueSource::Discovery => "discovery",
            IssueSource::Browser => "browser",
            IssueSource::Fetch => "fetch",
            IssueSource::StaticAnalyzer => "static_analyzer",
            IssueSource::Accessibility => "accessibility",
            IssueSource::Diagnostics => "diagnostics",
            IssueSource::Vision => "vision",
            IssueSource::SiteChecks => "site_checks",
            IssueSource::Orchestrator => "orchestrator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
        }
    }
}

/// Region of a screenshot an issue refers to, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    pub source: IssueSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<BoundingBox>,
}

impl Issue {
    pub fn new(
        category: Category,
        severity: Severity,
        message: impl Into<String>,
        source: IssueSource,
    ) -> Self {
        Self {
            category,
            severity,
            message: message.into(),
            url: None,
            suggestion: None,
            source,
            details: None,
            device: None,
            region: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_device(mut self, device: DeviceType) -> Self {
        self.device = Some(device);
        self
    }

    /// The single `technical/error` issue recorded for a page that could not be loaded.
    pub fn page_load_failed(url: &str, source: IssueSource, error: &str) -> Self {
        Issue::new(
            Category::Technical,
            Severity::Error,
            messages::PAGE_LOAD_FAILED,
            source,
        )
        .with_url(url)
        .with_suggestion(messages::SUGGEST_CHECK_AVAILABILITY)
        .with_details(serde_json::json!({ "error": error }))
    }

    fn dedupe_key(&self) -> (&str, Option<&str>) {
        (self.message.as_str(), self.url.as_deref())
    }
}

/// Drop every issue whose `(message, url)` pair was already seen, keeping the first.
pub fn dedupe_issues(issues: Vec<Issue>) -> Vec<Issue> {
    let mut seen: HashSet<(String, Option<String>)> = HashSet::new();
    let mut out = Vec::with_capacity(issues.len());
    for issue in issues {
        let (message, url) = issue.dedupe_key();
        let key = (message.to_string(), url.map(str::to_string));
        if seen.insert(key) {
            out.push(issue);
        }
    }
    out
}

/// Message and suggestion keys.
pub mod messages {
    pub const PAGE_LOAD_FAILED: &str = "page_load_failed";
    pub const NO_SITEMAP: &str = "no_sitemap";
    pub const AUDIT_FAILED: &str = "audit_failed";
    pub const HTTP_ERROR_STATUS: &str = "http_error_status";
    pub const MISSING_TITLE: &str = "missing_title";
    pub const TITLE_TOO_LONG: &str = "title_too_long";
    pub const MISSING_META_DESCRIPTION: &str = "missing_meta_description";
    pub const MISSING_H1: &str = "missing_h1";
    pub const MULTIPLE_H1: &str = "multiple_h1";
    pub const MISSING_LANG: &str = "missing_lang";
    pub const MISSING_VIEWPORT: &str = "missing_viewport";
    pub const IMAGES_MISSING_ALT: &str = "images_missing_alt";
    pub const CONSOLE_ERRORS: &str = "console_errors";
    pub const BROKEN_RESOURCES: &str = "broken_resources";
    pub const SLOW_TTFB: &str = "slow_ttfb";
    pub const FAST_TTFB: &str = "fast_ttfb";
    pub const MISSING_SECURITY_HEADER: &str = "missing_security_header";
    pub const INSECURE_TRANSPORT: &str = "insecure_transport";
    pub const ROBOTS_MISSING: &str = "robots_txt_missing";
    pub const ROBOTS_BLOCKS_ALL: &str = "robots_txt_blocks_all";
    pub const ROBOTS_NO_SITEMAP: &str = "robots_txt_no_sitemap";
    pub const ROBOTS_OK: &str = "robots_txt_ok";
    pub const SITEMAP_UNREACHABLE: &str = "sitemap_unreachable";
    pub const SITEMAP_OK: &str = "sitemap_ok";
    pub const UNLABELED_FORM_CONTROLS: &str = "unlabeled_form_controls";
    pub const UNNAMED_BUTTONS: &str = "unnamed_buttons";
    pub const EMPTY_LINKS: &str = "empty_links";
    pub const SKIPPED_HEADING_LEVELS: &str = "skipped_heading_levels";
    pub const DUPLICATE_IDS: &str = "duplicate_ids";
    pub const MISSING_MAIN_LANDMARK: &str = "missing_main_landmark";

    pub const SUGGEST_CHECK_AVAILABILITY: &str = "check_page_availability";
    pub const SUGGEST_ADD_SITEMAP: &str = "add_xml_sitemap";
    pub const SUGGEST_ADD_TITLE: &str = "add_page_title";
    pub const SUGGEST_SHORTEN_TITLE: &str = "shorten_page_title";
    pub const SUGGEST_ADD_META_DESCRIPTION: &str = "add_meta_description";
    pub const SUGGEST_ADD_H1: &str = "add_single_h1";
    pub const SUGGEST_ADD_LANG: &str = "add_html_lang";
    pub const SUGGEST_ADD_VIEWPORT: &str = "add_viewport_meta";
    pub const SUGGEST_ADD_ALT: &str = "add_image_alt_text";
    pub const SUGGEST_FIX_JS_ERRORS: &str = "fix_javascript_errors";
    pub const SUGGEST_FIX_BROKEN_RESOURCES: &str = "fix_broken_resources";
    pub const SUGGEST_IMPROVE_TTFB: &str = "improve_server_response_time";
    pub const SUGGEST_ADD_SECURITY_HEADER: &str = "add_security_header";
    pub const SUGGEST_ENABLE_HTTPS: &str = "enable_https";
    pub const SUGGEST_FIX_HTTP_STATUS: &str = "fix_http_status";
    pub const SUGGEST_ADD_ROBOTS: &str = "add_robots_txt";
    pub const SUGGEST_UNBLOCK_ROBOTS: &str = "allow_crawlers";
    pub const SUGGEST_LABEL_CONTROLS: &str = "label_form_controls";
    pub const SUGGEST_NAME_BUTTONS: &str = "name_buttons";
    pub const SUGGEST_ADD_LINK_TEXT: &str = "add_link_text";
    pub const SUGGEST_FIX_HEADING_ORDER: &str = "fix_heading_order";
    pub const SUGGEST_UNIQUE_IDS: &str = "make_ids_unique";
    pub const SUGGEST_ADD_MAIN: &str = "add_main_landmark";
}
