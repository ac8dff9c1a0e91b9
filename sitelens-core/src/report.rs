// Report generation from a stored audit run

use crate::run::{AuditRun, RunStatus};
use crate::scoring::CategoryScores;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitelens_scanner::issue::{Category, Issue, Severity};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const HEAVY_RULE: &str =
    "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";
const LIGHT_RULE: &str =
    "────────────────────────────────────────────────────────────────────────────────";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportFormat {
    Text,
    Json,
    Csv,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "json" => Some(ReportFormat::Json),
            "csv" => Some(ReportFormat::Csv),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
            ReportFormat::Markdown => "md",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub error: usize,
    pub warning: usize,
    pub notice: usize,
    pub passed: usize,
}

impl SeverityCounts {
    pub fn from_issues(issues: &[Issue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Error => counts.error += 1,
                Severity::Warning => counts.warning += 1,
                Severity::Notice => counts.notice += 1,
                Severity::Passed => counts.passed += 1,
            }
        }
        counts
    }

    /// Everything except passed checks.
    pub fn problems(&self) -> usize {
        self.error + self.warning + self.notice
    }
}

fn severity_rank(severity: Severity) -> u8 {
    match severity {
        Severity::Error => 0,
        Severity::Warning => 1,
        Severity::Notice => 2,
        Severity::Passed => 3,
    }
}

/// Problems worst first, passed checks dropped. Stable within a severity.
fn ranked_problems(issues: &[Issue]) -> Vec<&Issue> {
    let mut ranked: Vec<&Issue> = issues
        .iter()
        .filter(|i| i.severity != Severity::Passed)
        .collect();
    ranked.sort_by_key(|i| severity_rank(i.severity));
    ranked
}

pub fn render_report(run: &AuditRun, format: ReportFormat) -> Result<String, serde_json::Error> {
    Ok(match format {
        ReportFormat::Text => generate_text_report(run),
        ReportFormat::Json => generate_json_report(run)?,
        ReportFormat::Csv => generate_csv_report(run),
        ReportFormat::Markdown => generate_markdown_report(run),
    })
}

pub fn write_report(content: &str, path: &Path) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(content.as_bytes())?;
    Ok(())
}

fn status_to_string(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "Pending",
        RunStatus::Running => "Running",
        RunStatus::Completed => "Completed",
        RunStatus::Failed => "Failed",
    }
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn duration_seconds(run: &AuditRun) -> Option<i64> {
    match (run.started_at, run.completed_at) {
        (Some(start), Some(end)) => Some((end - start).num_seconds()),
        _ => None,
    }
}

fn score_text(score: Option<u8>) -> String {
    score
        .map(|s| format!("{}/100", s))
        .unwrap_or_else(|| "-".to_string())
}

fn category_lines(scores: &CategoryScores) -> Vec<(Category, u8)> {
    Category::ALL.iter().map(|c| (*c, scores.get(*c))).collect()
}

fn section(report: &mut String, title: &str) {
    report.push_str(HEAVY_RULE);
    report.push('\n');
    report.push_str(title);
    report.push('\n');
    report.push_str(HEAVY_RULE);
    report.push_str("\n\n");
}

pub fn generate_text_report(run: &AuditRun) -> String {
    let mut report = String::new();
    let counts = SeverityCounts::from_issues(&run.issues);

    // Header
    report.push_str(HEAVY_RULE);
    report.push('\n');
    report.push_str("                           SITELENS AUDIT REPORT\n");
    report.push_str(HEAVY_RULE);
    report.push_str("\n\n");

    report.push_str(&format!("Run ID:        {}\n", run.id));
    report.push_str(&format!("Site ID:       {}\n", run.site_id));
    report.push_str(&format!("Status:        {}\n", status_to_string(run.status)));
    report.push_str(&format!("Started:       {}\n", format_timestamp(run.started_at)));
    if let Some(duration) = duration_seconds(run) {
        report.push_str(&format!("Duration:      {} seconds\n", duration));
    }
    if let Some(method) = run.discovery_method {
        report.push_str(&format!("Discovery:     {}\n", method));
    }
    report.push_str(&format!(
        "Sitemap:       {}\n",
        if run.has_sitemap { "found" } else { "missing" }
    ));
    report.push_str(&format!(
        "Pages:         {} scanned of {} found\n\n",
        run.pages_scanned, run.pages_found
    ));

    // Scores
    section(&mut report, "SCORES");
    report.push_str(&format!("Overall:       {}\n", score_text(run.overall_score)));
    if let Some(ref scores) = run.category_scores {
        for (category, score) in category_lines(scores) {
            report.push_str(&format!(
                "  {:<13}{}/100\n",
                format!("{}:", capitalize(category.as_str())),
                score
            ));
        }
    }
    report.push('\n');

    if let Some(ref summary) = run.summary {
        section(&mut report, "SUMMARY");
        report.push_str(&wrap_text(summary, 80, "  "));
        report.push('\n');
    }

    section(&mut report, "ISSUE OVERVIEW");
    report.push_str(&format!("Total Issues: {}\n\n", counts.problems()));
    if counts.error > 0 {
        report.push_str(&format!("  [ERROR]    {}  (Fix first)\n", counts.error));
    }
    if counts.warning > 0 {
        report.push_str(&format!("  [WARNING]  {}  (Should be addressed)\n", counts.warning));
    }
    if counts.notice > 0 {
        report.push_str(&format!("  [NOTICE]   {}  (Minor issues)\n", counts.notice));
    }
    if counts.passed > 0 {
        report.push_str(&format!("  [PASSED]   {}  (Checks passed)\n", counts.passed));
    }
    report.push('\n');

    if !run.pages.is_empty() {
        section(&mut report, "PAGES");
        for (idx, page) in run.pages.iter().enumerate() {
            let prefix = if idx + 1 == run.pages.len() { "└── " } else { "├── " };
            let status = page
                .status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| "---".to_string());
            report.push_str(&format!(
                "{}{}  [{} {}] {} issue(s)\n",
                prefix,
                page.url,
                status_indicator(page.status_code),
                status,
                page.issue_count
            ));
        }
        report.push('\n');
    }

    let problems = ranked_problems(&run.issues);
    if !problems.is_empty() {
        section(&mut report, "DETAILED ISSUES");
        for (idx, issue) in problems.iter().enumerate() {
            report.push_str(&format!("[{}] {}\n", idx + 1, humanize(&issue.message)));
            report.push_str(&format!("Severity:     {}\n", issue.severity.as_str().to_uppercase()));
            report.push_str(&format!("Category:     {}\n", capitalize(issue.category.as_str())));
            if let Some(ref url) = issue.url {
                report.push_str(&format!("URL:          {}\n", url));
            }
            if let Some(device) = issue.device {
                report.push_str(&format!("Device:       {}\n", device.as_str()));
            }
            if let Some(ref suggestion) = issue.suggestion {
                report.push_str("\nSuggestion:\n");
                report.push_str(&wrap_text(&humanize(suggestion), 80, "  "));
            }
            report.push('\n');
            report.push_str(LIGHT_RULE);
            report.push_str("\n\n");
        }
    }

    // Footer
    report.push_str(HEAVY_RULE);
    report.push('\n');
    report.push_str("                               End of Report\n");
    report.push_str(HEAVY_RULE);
    report.push('\n');
    report.push_str("\nGenerated by Sitelens - website health, performance and visual quality auditor\n\n");

    report
}

pub fn generate_json_report(run: &AuditRun) -> Result<String, serde_json::Error> {
    let counts = SeverityCounts::from_issues(&run.issues);
    let json_report = serde_json::json!({
        "report": {
            "metadata": {
                "generator": "Sitelens",
                "version": env!("CARGO_PKG_VERSION"),
                "generated_at": Utc::now().to_rfc3339(),
                "format": "json"
            },
            "run": {
                "id": run.id,
                "site_id": run.site_id,
                "status": run.status,
                "discovery_method": run.discovery_method,
                "has_sitemap": run.has_sitemap,
                "started_at": run.started_at.map(|t| t.to_rfc3339()),
                "completed_at": run.completed_at.map(|t| t.to_rfc3339()),
                "duration_seconds": duration_seconds(run)
            },
            "summary": {
                "overall_score": run.overall_score,
                "category_scores": run.category_scores,
                "pages_found": run.pages_found,
                "pages_scanned": run.pages_scanned,
                "total_issues": counts.problems(),
                "severity_breakdown": counts,
                "narrative": run.summary
            },
            "pages": run.pages,
            "issues": run.issues
        }
    });

    serde_json::to_string_pretty(&json_report)
}

pub fn generate_csv_report(run: &AuditRun) -> String {
    let mut report = String::from("severity,category,message,url,suggestion,source,device\n");
    for issue in &run.issues {
        let row = [
            issue.severity.as_str(),
            issue.category.as_str(),
            issue.message.as_str(),
            issue.url.as_deref().unwrap_or_default(),
            issue.suggestion.as_deref().unwrap_or_default(),
            issue.source.as_str(),
            issue.device.map(|d| d.as_str()).unwrap_or_default(),
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_field(field)).collect();
        report.push_str(&escaped.join(","));
        report.push('\n');
    }
    report
}

pub fn generate_markdown_report(run: &AuditRun) -> String {
    let counts = SeverityCounts::from_issues(&run.issues);
    let mut report = String::from("# Sitelens Audit Report\n\n");

    report.push_str("| Field | Value |\n|---|---|\n");
    report.push_str(&format!("| Run | `{}` |\n", run.id));
    report.push_str(&format!("| Status | {} |\n", status_to_string(run.status)));
    report.push_str(&format!("| Started | {} |\n", format_timestamp(run.started_at)));
    report.push_str(&format!("| Overall score | {} |\n", score_text(run.overall_score)));
    report.push_str(&format!(
        "| Pages | {} scanned of {} found |\n\n",
        run.pages_scanned, run.pages_found
    ));

    if let Some(ref scores) = run.category_scores {
        report.push_str("## Scores\n\n| Category | Score |\n|---|---|\n");
        for (category, score) in category_lines(scores) {
            report.push_str(&format!("| {} | {} |\n", capitalize(category.as_str()), score));
        }
        report.push('\n');
    }

    if let Some(ref summary) = run.summary {
        report.push_str("## Summary\n\n");
        report.push_str(summary);
        report.push_str("\n\n");
    }

    report.push_str(&format!(
        "## Issues\n\n{} errors, {} warnings, {} notices, {} passed checks.\n\n",
        counts.error, counts.warning, counts.notice, counts.passed
    ));

    let problems = ranked_problems(&run.issues);
    if !problems.is_empty() {
        report.push_str("| Severity | Category | Issue | URL |\n|---|---|---|---|\n");
        for issue in problems {
            report.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                issue.severity,
                issue.category,
                humanize(&issue.message),
                issue.url.as_deref().unwrap_or("-").replace('|', "\\|")
            ));
        }
        report.push('\n');
    }

    report
}

fn status_indicator(status: Option<u16>) -> &'static str {
    match status {
        Some(200..=299) => "✓",
        Some(300..=399) => "→",
        Some(400..=499) => "⚠",
        Some(500..=599) => "✗",
        _ => "?",
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    }
}

/// `missing_meta_description` becomes `Missing meta description`.
fn humanize(key: &str) -> String {
    capitalize(&key.replace('_', " "))
}

fn wrap_text(text: &str, width: usize, indent: &str) -> String {
    let mut result = String::new();
    let mut current_line = String::new();

    for word in text.split_whitespace() {
        if current_line.len() + word.len() + 1 > width - indent.len() && !current_line.is_empty() {
            result.push_str(indent);
            result.push_str(&current_line);
            result.push('\n');
            current_line.clear();
        }

        if !current_line.is_empty() {
            current_line.push(' ');
        }
        current_line.push_str(word);
    }

    if !current_line.is_empty() {
        result.push_str(indent);
        result.push_str(&current_line);
        result.push('\n');
    }

    result
}
