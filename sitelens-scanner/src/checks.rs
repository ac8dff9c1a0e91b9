// Page-level checks derived from what the browser captured

use crate::issue::{Category, Issue, IssueSource, Severity, messages};
use crate::result::{DomSummary, Heading, PageScanResult};
use scraper::{ElementRef, Html, Selector};
use serde_json::json;
use std::sync::LazyLock;
use std::time::Duration;

pub const MAX_TITLE_LENGTH: usize = 60;
pub const SLOW_TTFB: Duration = Duration::from_millis(800);

/// How many console errors are echoed into an issue's details.
const MAX_REPORTED_ERRORS: usize = 10;

static TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("static selector"));
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).expect("static selector"));
static VIEWPORT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="viewport"]"#).expect("static selector"));
static CANONICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"link[rel="canonical"]"#).expect("static selector"));
static HTML_ROOT: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("html").expect("static selector"));
static HEADINGS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, h5, h6").expect("static selector"));
static IMG: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").expect("static selector"));
static LINKS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

fn collapsed_text(el: ElementRef<'_>) -> String {
    let text: String = el.text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_attribute(document: &Html, selector: &Selector, name: &str) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|el| el.value().attr(name))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The same summary the browser builds in-page, from raw markup.
pub fn summarize_html(html: &str) -> DomSummary {
    let document = Html::parse_document(html);
    let images: Vec<_> = document.select(&IMG).collect();

    DomSummary {
        title: document
            .select(&TITLE)
            .next()
            .map(collapsed_text)
            .filter(|t| !t.is_empty()),
        meta_description: first_attribute(&document, &META_DESCRIPTION, "content"),
        headings: document
            .select(&HEADINGS)
            .filter_map(|h| {
                let level = h.value().name().strip_prefix('h')?.parse().ok()?;
                Some(Heading {
                    level,
                    text: collapsed_text(h),
                })
            })
            .collect(),
        canonical: first_attribute(&document, &CANONICAL, "href"),
        language: first_attribute(&document, &HTML_ROOT, "lang"),
        has_viewport: document.select(&VIEWPORT).next().is_some(),
        image_count: images.len(),
        images_missing_alt: images
            .iter()
            .filter(|img| img.value().attr("alt").is_none())
            .count(),
        link_count: document.select(&LINKS).count(),
        page_height: None,
    }
}

pub fn check_http_status(url: &str, status: u16, source: IssueSource) -> Option<Issue> {
    if status < 400 {
        return None;
    }
    Some(
        Issue::new(
            Category::Technical,
            Severity::Error,
            messages::HTTP_ERROR_STATUS,
            source,
        )
        .with_url(url)
        .with_suggestion(messages::SUGGEST_FIX_HTTP_STATUS)
        .with_details(json!({ "status": status })),
    )
}

pub fn check_ttfb(url: &str, ttfb: Duration, source: IssueSource) -> Issue {
    let ms = ttfb.as_millis() as u64;
    if ttfb > SLOW_TTFB {
        Issue::new(
            Category::Performance,
            Severity::Warning,
            messages::SLOW_TTFB,
            source,
        )
        .with_url(url)
        .with_suggestion(messages::SUGGEST_IMPROVE_TTFB)
        .with_details(json!({ "ttfbMs": ms, "thresholdMs": SLOW_TTFB.as_millis() as u64 }))
    } else {
        Issue::new(
            Category::Performance,
            Severity::Passed,
            messages::FAST_TTFB,
            source,
        )
        .with_url(url)
        .with_details(json!({ "ttfbMs": ms }))
    }
}

/// Document-level rules shared by every scan path.
pub fn document_issues(url: &str, dom: &DomSummary, source: IssueSource) -> Vec<Issue> {
    let mut issues = Vec::new();

    match dom.title.as_deref().map(str::trim) {
        None | Some("") => issues.push(
            Issue::new(Category::Technical, Severity::Error, messages::MISSING_TITLE, source)
                .with_url(url)
                .with_suggestion(messages::SUGGEST_ADD_TITLE),
        ),
        Some(title) if title.chars().count() > MAX_TITLE_LENGTH => issues.push(
            Issue::new(Category::Technical, Severity::Notice, messages::TITLE_TOO_LONG, source)
                .with_url(url)
                .with_suggestion(messages::SUGGEST_SHORTEN_TITLE)
                .with_details(json!({ "length": title.chars().count() })),
        ),
        Some(_) => {}
    }

    if dom
        .meta_description
        .as_deref()
        .is_none_or(|d| d.trim().is_empty())
    {
        issues.push(
            Issue::new(
                Category::Technical,
                Severity::Warning,
                messages::MISSING_META_DESCRIPTION,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_ADD_META_DESCRIPTION),
        );
    }

    match dom.h1_count() {
        0 => issues.push(
            Issue::new(Category::Technical, Severity::Warning, messages::MISSING_H1, source)
                .with_url(url)
                .with_suggestion(messages::SUGGEST_ADD_H1),
        ),
        1 => {}
        n => issues.push(
            Issue::new(Category::Technical, Severity::Notice, messages::MULTIPLE_H1, source)
                .with_url(url)
                .with_suggestion(messages::SUGGEST_ADD_H1)
                .with_details(json!({ "count": n })),
        ),
    }

    if dom.language.as_deref().is_none_or(|l| l.trim().is_empty()) {
        issues.push(
            Issue::new(
                Category::Accessibility,
                Severity::Warning,
                messages::MISSING_LANG,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_ADD_LANG),
        );
    }

    if !dom.has_viewport {
        issues.push(
            Issue::new(
                Category::Visual,
                Severity::Warning,
                messages::MISSING_VIEWPORT,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_ADD_VIEWPORT),
        );
    }

    if dom.images_missing_alt > 0 {
        issues.push(
            Issue::new(
                Category::Accessibility,
                Severity::Warning,
                messages::IMAGES_MISSING_ALT,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_ADD_ALT)
            .with_details(json!({
                "missing": dom.images_missing_alt,
                "total": dom.image_count,
            })),
        );
    }

    issues
}

/// Issues for a rendered page, from its DOM summary and listener data.
pub fn analyze_rendered_page(result: &PageScanResult) -> Vec<Issue> {
    let url = result.url.as_str();
    let source = IssueSource::Browser;
    let mut issues = Vec::new();

    if let Some(status) = result.status_code
        && let Some(issue) = check_http_status(url, status, source)
    {
        issues.push(issue);
    }

    issues.extend(document_issues(url, &result.dom, source));

    if !result.console_errors.is_empty() {
        let sample: Vec<&str> = result
            .console_errors
            .iter()
            .take(MAX_REPORTED_ERRORS)
            .map(|e| e.text.as_str())
            .collect();
        issues.push(
            Issue::new(
                Category::Technical,
                Severity::Warning,
                messages::CONSOLE_ERRORS,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_FIX_JS_ERRORS)
            .with_details(json!({
                "count": result.console_errors.len(),
                "errors": sample,
            })),
        );
    }

    if !result.broken_resources.is_empty() {
        issues.push(
            Issue::new(
                Category::Technical,
                Severity::Error,
                messages::BROKEN_RESOURCES,
                source,
            )
            .with_url(url)
            .with_suggestion(messages::SUGGEST_FIX_BROKEN_RESOURCES)
            .with_details(json!({
                "count": result.broken_resources.len(),
                "resources": result.broken_resources,
            })),
        );
    }

    if let Some(ttfb) = result.ttfb {
        issues.push(check_ttfb(url, ttfb, source));
    }

    issues
}
