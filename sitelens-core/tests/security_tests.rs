// Tests for passive page checks and robots/sitemap validation

use reqwest::header::{HeaderMap, HeaderValue};
use sitelens_core::security::{
    BasicStaticAnalyzer, check_document, check_insecure_transport, check_security_headers,
    document_language, robots_blocks_all,
};
use sitelens_scanner::StaticAnalyzer;
use sitelens_scanner::issue::{Category, Issue, IssueSource, Severity, messages};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const GOOD_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Acme Widgets</title>
  <meta name="description" content="Widgets for every occasion">
  <meta name="viewport" content="width=device-width, initial-scale=1">
</head>
<body>
  <h1>Welcome</h1>
  <img src="/logo.png" alt="Acme logo">
</body>
</html>"#;

fn messages_of(issues: &[Issue]) -> Vec<&str> {
    issues.iter().map(|i| i.message.as_str()).collect()
}

fn find<'a>(issues: &'a [Issue], message: &str) -> &'a Issue {
    issues
        .iter()
        .find(|i| i.message == message)
        .unwrap_or_else(|| panic!("no {} issue in {:?}", message, messages_of(issues)))
}

// ============================================================================
// Insecure Transport Tests
// ============================================================================

#[test]
fn test_http_is_flagged() {
    let issue = check_insecure_transport("http://example.com/").unwrap();
    assert_eq!(issue.message, messages::INSECURE_TRANSPORT);
    assert_eq!(issue.severity, Severity::Warning);
    assert_eq!(issue.url.as_deref(), Some("http://example.com/"));
}

#[test]
fn test_https_is_not_flagged() {
    assert!(check_insecure_transport("https://example.com/").is_none());
}

#[test]
fn test_local_hosts_are_exempt() {
    assert!(check_insecure_transport("http://localhost:3000/").is_none());
    assert!(check_insecure_transport("http://127.0.0.1:8080/").is_none());
    assert!(check_insecure_transport("http://127.1.2.3/").is_none());
}

#[test]
fn test_unparseable_url_is_ignored() {
    assert!(check_insecure_transport("not a url").is_none());
}

// ============================================================================
// Security Header Tests
// ============================================================================

#[test]
fn test_all_headers_present() {
    let mut headers = HeaderMap::new();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
    headers.insert("strict-transport-security", HeaderValue::from_static("max-age=63072000"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));

    assert!(check_security_headers("https://example.com/", &headers).is_none());
}

#[test]
fn test_missing_headers_reported_once() {
    let mut headers = HeaderMap::new();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));

    let issue = check_security_headers("https://example.com/", &headers).unwrap();
    assert_eq!(issue.message, messages::MISSING_SECURITY_HEADER);
    assert_eq!(issue.severity, Severity::Notice);

    let missing = issue.details.as_ref().unwrap()["missing"].as_array().unwrap();
    assert_eq!(missing.len(), 3);
    assert!(missing.iter().any(|h| h == "strict-transport-security"));
}

#[test]
fn test_hsts_not_expected_over_http() {
    let mut headers = HeaderMap::new();
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert("content-security-policy", HeaderValue::from_static("default-src 'self'"));
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));

    assert!(check_security_headers("http://example.com/", &headers).is_none());
}

// ============================================================================
// Document Check Tests
// ============================================================================

#[test]
fn test_clean_document_has_no_issues() {
    let issues = check_document(GOOD_PAGE, "https://example.com/");
    assert!(issues.is_empty(), "unexpected: {:?}", messages_of(&issues));
    assert_eq!(document_language(GOOD_PAGE).as_deref(), Some("en"));
}

#[test]
fn test_bare_document_reports_every_gap() {
    let html = r#"<html><body><img src="/a.png"><img src="/b.png" alt=""></body></html>"#;
    let issues = check_document(html, "https://example.com/bare");

    assert_eq!(find(&issues, messages::MISSING_TITLE).severity, Severity::Error);
    assert_eq!(find(&issues, messages::MISSING_META_DESCRIPTION).severity, Severity::Warning);
    assert_eq!(find(&issues, messages::MISSING_H1).category, Category::Technical);
    assert_eq!(find(&issues, messages::MISSING_LANG).category, Category::Accessibility);
    assert_eq!(find(&issues, messages::MISSING_VIEWPORT).category, Category::Visual);

    let alt = find(&issues, messages::IMAGES_MISSING_ALT);
    let details = alt.details.as_ref().unwrap();
    assert_eq!(details["missing"], 1);
    assert_eq!(details["total"], 2);

    assert!(issues.iter().all(|i| i.source == IssueSource::StaticAnalyzer));
    assert!(issues.iter().all(|i| i.url.as_deref() == Some("https://example.com/bare")));
    assert_eq!(document_language(html), None);
}

#[test]
fn test_long_title_is_a_notice() {
    let title = "A".repeat(75);
    let html = GOOD_PAGE.replace("Acme Widgets", &title);
    let issues = check_document(&html, "https://example.com/");

    let issue = find(&issues, messages::TITLE_TOO_LONG);
    assert_eq!(issue.severity, Severity::Notice);
    assert_eq!(issue.details.as_ref().unwrap()["length"], 75);
}

#[test]
fn test_analyze_combines_page_checks() {
    let analyzer = BasicStaticAnalyzer::new().unwrap();
    let issues = analyzer.analyze(
        GOOD_PAGE,
        "http://example.com/",
        &HeaderMap::new(),
        Duration::from_millis(1500),
    );

    let names = messages_of(&issues);
    assert!(names.contains(&messages::INSECURE_TRANSPORT));
    assert!(names.contains(&messages::MISSING_SECURITY_HEADER));
    assert!(names.contains(&messages::SLOW_TTFB));
    assert!(!names.contains(&messages::MISSING_TITLE));
}

// ============================================================================
// Robots Parsing Tests
// ============================================================================

#[test]
fn test_wildcard_disallow_root_blocks_all() {
    assert!(robots_blocks_all("User-agent: *\nDisallow: /\n"));
    assert!(robots_blocks_all("user-agent: *\n# everything\ndisallow: / # closed\n"));
}

#[test]
fn test_specific_agent_block_is_ignored() {
    let robots = "User-agent: BadBot\nDisallow: /\n\nUser-agent: *\nDisallow: /private/\n";
    assert!(!robots_blocks_all(robots));
}

#[test]
fn test_shared_group_with_wildcard() {
    let robots = "User-agent: Googlebot\nUser-agent: *\nDisallow: /\n";
    assert!(robots_blocks_all(robots));
}

#[test]
fn test_empty_disallow_allows_everything() {
    assert!(!robots_blocks_all("User-agent: *\nDisallow:\n"));
    assert!(!robots_blocks_all(""));
}

// ============================================================================
// Robots And Sitemap Tests
// ============================================================================

fn analyzer() -> BasicStaticAnalyzer {
    BasicStaticAnalyzer::with_client(reqwest::Client::new())
        .with_timeouts(Duration::from_secs(2), Duration::from_secs(2))
}

#[tokio::test]
async fn test_missing_robots_and_sitemap() {
    let server = MockServer::start().await;

    let issues = analyzer().check_robots_and_sitemap(&server.uri()).await;

    let robots = find(&issues, messages::ROBOTS_MISSING);
    assert_eq!(robots.severity, Severity::Warning);
    assert_eq!(robots.url, Some(format!("{}/robots.txt", server.uri())));

    let sitemap = find(&issues, messages::SITEMAP_UNREACHABLE);
    assert_eq!(sitemap.url, Some(format!("{}/sitemap.xml", server.uri())));
    assert!(issues.iter().all(|i| i.source == IssueSource::SiteChecks));
}

#[tokio::test]
async fn test_robots_blocking_all_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /\n"))
        .mount(&server)
        .await;

    let issues = analyzer().check_robots_and_sitemap(&server.uri()).await;
    assert_eq!(find(&issues, messages::ROBOTS_BLOCKS_ALL).severity, Severity::Error);
}

#[tokio::test]
async fn test_declared_sitemap_is_checked() {
    let server = MockServer::start().await;
    let robots = format!(
        "User-agent: *\nDisallow: /admin/\nSitemap: {}/maps/main.xml\n",
        server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(robots))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/maps/main.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<urlset/>"))
        .mount(&server)
        .await;

    let issues = analyzer()
        .check_robots_and_sitemap(&format!("{}/", server.uri()))
        .await;

    assert_eq!(find(&issues, messages::ROBOTS_OK).severity, Severity::Passed);
    let sitemap = find(&issues, messages::SITEMAP_OK);
    assert_eq!(sitemap.severity, Severity::Passed);
    assert_eq!(sitemap.url, Some(format!("{}/maps/main.xml", server.uri())));
}

#[tokio::test]
async fn test_robots_without_sitemap_directive() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow:\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<urlset/>"))
        .mount(&server)
        .await;

    let issues = analyzer().check_robots_and_sitemap(&server.uri()).await;
    assert_eq!(find(&issues, messages::ROBOTS_NO_SITEMAP).severity, Severity::Notice);
    assert!(messages_of(&issues).contains(&messages::SITEMAP_OK));
}
