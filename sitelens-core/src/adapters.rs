//! Local stand-ins for the hosted collaborators, so an audit can run
//! end-to-end from the command line.

use crate::collaborators::{
    AuditEvent, DiagnosticsProvider, DiagnosticsStrategy, ImageStore, Notifier,
    PerformanceDiagnostics, ScreenCapture, SummaryGenerator, VisionAnalyzer,
};
use crate::scoring::CategoryScores;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use sitelens_scanner::analyzer::{AccessibilityAnalyzer, Page};
use sitelens_scanner::issue::{Category, Issue, IssueSource, Severity, messages};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Writes images under `<root>/<folder>/<name>` and hands back the path.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Keep stored names inside their folder.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn upload_image(&self, image: Bytes, folder: &str, name: &str) -> Option<String> {
        let dir = folder
            .split('/')
            .filter(|s| !s.is_empty())
            .map(sanitize)
            .fold(self.root.clone(), |path, segment| path.join(segment));
        let path = dir.join(sanitize(name));

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!("Could not create {}: {}", dir.display(), e);
            return None;
        }
        match tokio::fs::write(&path, &image).await {
            Ok(()) => {
                debug!("Stored {} bytes at {}", image.len(), path.display());
                Some(path.display().to_string())
            }
            Err(e) => {
                warn!("Could not write {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Performance diagnostics disabled.
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticsProvider for NoDiagnostics {
    async fn get_diagnostics(
        &self,
        _url: &str,
        _strategy: DiagnosticsStrategy,
    ) -> Option<PerformanceDiagnostics> {
        None
    }
}

/// Vision analysis disabled.
pub struct NoVision;

#[async_trait]
impl VisionAnalyzer for NoVision {
    async fn analyze_screens(&self, _pages: &[ScreenCapture], _site_url: &str) -> Vec<Issue> {
        Vec::new()
    }
}

/// In-page script producing [`AccessibilityFacts`].
const ACCESSIBILITY_SCRIPT: &str = r#"(() => {
  const text = (el) => (el.textContent || '').replace(/\s+/g, ' ').trim();
  const named = (el) =>
    text(el) !== '' ||
    (el.getAttribute('aria-label') || '').trim() !== '' ||
    (el.getAttribute('title') || '').trim() !== '' ||
    el.hasAttribute('aria-labelledby') ||
    [...el.querySelectorAll('img[alt]')].some((img) => img.alt.trim() !== '');
  const describe = (el) => {
    const id = el.id ? '#' + el.id : '';
    const name = el.getAttribute('name');
    return el.tagName.toLowerCase() + id + (name ? '[name=' + name + ']' : '');
  };
  const controls = [...document.querySelectorAll(
    'input:not([type=hidden]):not([type=submit]):not([type=button]):not([type=reset]):not([type=image]), select, textarea'
  )].filter((el) =>
    !el.closest('label') &&
    !(el.id && document.querySelector('label[for="' + CSS.escape(el.id) + '"]')) &&
    !(el.getAttribute('aria-label') || '').trim() &&
    !el.hasAttribute('aria-labelledby') &&
    !(el.getAttribute('title') || '').trim());
  const buttons = [...document.querySelectorAll('button, [role=button]')]
    .filter((el) => !named(el));
  const links = [...document.querySelectorAll('a[href]')].filter((el) => !named(el));
  const skipped = [];
  let previous = 0;
  for (const h of document.querySelectorAll('h1, h2, h3, h4, h5, h6')) {
    const level = Number(h.tagName[1]);
    if (previous && level > previous + 1) skipped.push('h' + previous + ' -> h' + level);
    previous = level;
  }
  const counts = {};
  for (const el of document.querySelectorAll('[id]')) counts[el.id] = (counts[el.id] || 0) + 1;
  return {
    unlabeledControls: controls.map(describe),
    unnamedButtons: buttons.map(describe),
    emptyLinks: links.map((el) => el.getAttribute('href')),
    skippedHeadingLevels: skipped,
    duplicateIds: Object.keys(counts).filter((id) => id && counts[id] > 1),
    hasMainLandmark: !!document.querySelector('main, [role=main]'),
  };
})()"#;

/// What the in-page accessibility pass found.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AccessibilityFacts {
    pub unlabeled_controls: Vec<String>,
    pub unnamed_buttons: Vec<String>,
    pub empty_links: Vec<String>,
    pub skipped_heading_levels: Vec<String>,
    pub duplicate_ids: Vec<String>,
    pub has_main_landmark: bool,
}

const MAX_EXAMPLES: usize = 10;

fn examples(items: &[String]) -> serde_json::Value {
    serde_json::json!({
        "count": items.len(),
        "examples": items.iter().take(MAX_EXAMPLES).collect::<Vec<_>>(),
    })
}

pub fn accessibility_issues(url: &str, facts: &AccessibilityFacts) -> Vec<Issue> {
    let issue = |severity, message: &str, suggestion: &str| {
        Issue::new(
            Category::Accessibility,
            severity,
            message,
            IssueSource::Accessibility,
        )
        .with_url(url)
        .with_suggestion(suggestion)
    };
    let mut issues = Vec::new();

    if !facts.unlabeled_controls.is_empty() {
        issues.push(
            issue(
                Severity::Error,
                messages::UNLABELED_FORM_CONTROLS,
                messages::SUGGEST_LABEL_CONTROLS,
            )
            .with_details(examples(&facts.unlabeled_controls)),
        );
    }
    if !facts.unnamed_buttons.is_empty() {
        issues.push(
            issue(
                Severity::Error,
                messages::UNNAMED_BUTTONS,
                messages::SUGGEST_NAME_BUTTONS,
            )
            .with_details(examples(&facts.unnamed_buttons)),
        );
    }
    if !facts.empty_links.is_empty() {
        issues.push(
            issue(
                Severity::Warning,
                messages::EMPTY_LINKS,
                messages::SUGGEST_ADD_LINK_TEXT,
            )
            .with_details(examples(&facts.empty_links)),
        );
    }
    if !facts.skipped_heading_levels.is_empty() {
        issues.push(
            issue(
                Severity::Notice,
                messages::SKIPPED_HEADING_LEVELS,
                messages::SUGGEST_FIX_HEADING_ORDER,
            )
            .with_details(examples(&facts.skipped_heading_levels)),
        );
    }
    if !facts.duplicate_ids.is_empty() {
        issues.push(
            issue(
                Severity::Warning,
                messages::DUPLICATE_IDS,
                messages::SUGGEST_UNIQUE_IDS,
            )
            .with_details(examples(&facts.duplicate_ids)),
        );
    }
    if !facts.has_main_landmark {
        issues.push(issue(
            Severity::Notice,
            messages::MISSING_MAIN_LANDMARK,
            messages::SUGGEST_ADD_MAIN,
        ));
    }
    issues
}

/// Accessibility rules evaluated against the rendered DOM.
pub struct DomAccessibilityAnalyzer;

#[async_trait]
impl AccessibilityAnalyzer for DomAccessibilityAnalyzer {
    async fn analyze(&self, page: &Page, url: &str) -> Vec<Issue> {
        let evaluated = match page.evaluate(ACCESSIBILITY_SCRIPT).await {
            Ok(evaluated) => evaluated,
            Err(e) => {
                warn!("Accessibility pass for {} failed: {}", url, e);
                return Vec::new();
            }
        };
        match evaluated.into_value::<AccessibilityFacts>() {
            Ok(facts) => {
                let issues = accessibility_issues(url, &facts);
                debug!("{} accessibility issues on {}", issues.len(), url);
                issues
            }
            Err(e) => {
                warn!("Unreadable accessibility facts for {}: {}", url, e);
                Vec::new()
            }
        }
    }
}

/// Deterministic one-paragraph summary built from counts.
pub struct DigestSummary;

impl DigestSummary {
    pub fn digest(
        issues: &[Issue],
        score: u8,
        categories: &CategoryScores,
        url: &str,
        page_count: usize,
    ) -> String {
        let count = |severity: Severity| issues.iter().filter(|i| i.severity == severity).count();
        let (errors, warnings, notices) = (
            count(Severity::Error),
            count(Severity::Warning),
            count(Severity::Notice),
        );
        let weakest = categories.weakest();

        let mut text = format!(
            "{} scored {}/100 across {} page{}.",
            url,
            score,
            page_count,
            if page_count == 1 { "" } else { "s" }
        );
        if errors + warnings + notices == 0 {
            text.push_str(" No problems were found.");
        } else {
            text.push_str(&format!(
                " Found {} error{}, {} warning{} and {} notice{}.",
                errors,
                if errors == 1 { "" } else { "s" },
                warnings,
                if warnings == 1 { "" } else { "s" },
                notices,
                if notices == 1 { "" } else { "s" },
            ));
            text.push_str(&format!(
                " The weakest area is {} at {}/100.",
                weakest.as_str(),
                categories.get(weakest)
            ));
        }
        text
    }
}

#[async_trait]
impl SummaryGenerator for DigestSummary {
    async fn summarize(
        &self,
        issues: &[Issue],
        score: u8,
        categories: &CategoryScores,
        url: &str,
        page_count: usize,
    ) -> Option<String> {
        Some(Self::digest(issues, score, categories, url, page_count))
    }
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, account_id: &str, event: AuditEvent) {
        match event {
            AuditEvent::AuditCompleted {
                run_id,
                site_url,
                score,
                ..
            } => info!(
                "[{}] Audit {} of {} completed with score {}",
                account_id, run_id, site_url, score
            ),
            AuditEvent::AuditFailed {
                run_id,
                site_url,
                reason,
                ..
            } => warn!(
                "[{}] Audit {} of {} failed: {}",
                account_id, run_id, site_url, reason
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fs_image_store_writes_under_folder() {
        let dir = TempDir::new().unwrap();
        let store = FsImageStore::new(dir.path());

        let path = store
            .upload_image(Bytes::from_static(b"png"), "run-1/pages", "home desktop.png")
            .await
            .unwrap();

        assert!(path.ends_with("home_desktop.png"));
        assert!(path.contains("run-1"));
        assert_eq!(std::fs::read(&path).unwrap(), b"png");
    }

    #[tokio::test]
    async fn test_fs_image_store_stays_inside_root() {
        let dir = TempDir::new().unwrap();
        let store = FsImageStore::new(dir.path());

        let path = store
            .upload_image(Bytes::from_static(b"x"), "../escape", "../../a.png")
            .await
            .unwrap();
        assert!(std::path::Path::new(&path).starts_with(dir.path()));
    }

    #[test]
    fn test_digest_names_weakest_category() {
        let issues = vec![
            Issue::new(Category::Performance, Severity::Error, "slow_ttfb", IssueSource::Fetch),
            Issue::new(Category::Technical, Severity::Warning, "missing_h1", IssueSource::Fetch),
        ];
        let categories = CategoryScores {
            technical: 97,
            performance: 90,
            visual: 100,
            accessibility: 100,
        };

        let text = DigestSummary::digest(&issues, 95, &categories, "https://example.com", 2);
        assert!(text.contains("95/100"));
        assert!(text.contains("2 pages"));
        assert!(text.contains("1 error,"));
        assert!(text.contains("performance at 90/100"));
    }

    #[test]
    fn test_digest_clean_site() {
        let text = DigestSummary::digest(&[], 100, &CategoryScores::default(), "https://a.com", 1);
        assert!(text.contains("No problems"));
        assert!(text.contains("1 page."));
    }

    #[test]
    fn test_accessibility_issues_for_clean_page() {
        let facts = AccessibilityFacts {
            has_main_landmark: true,
            ..AccessibilityFacts::default()
        };
        assert!(accessibility_issues("https://example.com/", &facts).is_empty());
    }

    #[test]
    fn test_accessibility_issues_report_examples() {
        let facts = AccessibilityFacts {
            unlabeled_controls: vec!["input#email".into(), "select[name=country]".into()],
            empty_links: vec!["/cart".into()],
            skipped_heading_levels: vec!["h1 -> h3".into()],
            has_main_landmark: false,
            ..AccessibilityFacts::default()
        };

        let issues = accessibility_issues("https://example.com/signup", &facts);
        let keys: Vec<_> = issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                messages::UNLABELED_FORM_CONTROLS,
                messages::EMPTY_LINKS,
                messages::SKIPPED_HEADING_LEVELS,
                messages::MISSING_MAIN_LANDMARK,
            ]
        );
        assert!(issues.iter().all(|i| i.source == IssueSource::Accessibility
            && i.category == Category::Accessibility
            && i.url.as_deref() == Some("https://example.com/signup")));
        assert_eq!(issues[0].severity, Severity::Error);
        let details = issues[0].details.as_ref().unwrap();
        assert_eq!(details["count"], 2);
        assert_eq!(details["examples"][0], "input#email");
    }

    #[test]
    fn test_accessibility_facts_tolerate_missing_fields() {
        let facts: AccessibilityFacts =
            serde_json::from_value(serde_json::json!({"duplicateIds": ["nav"]})).unwrap();
        assert_eq!(facts.duplicate_ids, vec!["nav"]);
        assert!(!facts.has_main_landmark);
    }
}
