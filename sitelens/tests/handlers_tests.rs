use sitelens::handlers::*;
use sitelens_core::AuditConfig;
use sitelens_core::data::Database;
use sitelens_core::report::ReportFormat;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::{NamedTempFile, TempDir};
use url::Url;

#[test]
fn test_parse_url_line_with_scheme() {
    let result = parse_url_line("https://example.com");
    assert_eq!(result, Some("https://example.com".to_string()));

    let result = parse_url_line("http://legacy.example.com/shop");
    assert_eq!(result, Some("http://legacy.example.com/shop".to_string()));
}

#[test]
fn test_parse_url_line_without_scheme() {
    let result = parse_url_line("example.com");
    assert_eq!(result, Some("https://example.com".to_string()));

    let result = parse_url_line("localhost:8080");
    assert_eq!(result, Some("https://localhost:8080".to_string()));
}

#[test]
fn test_parse_url_line_invalid() {
    let result = parse_url_line("not a valid url!!!");
    assert_eq!(result, None);
}

#[test]
fn test_load_urls_from_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut temp_file = NamedTempFile::new()?;
    writeln!(temp_file, "https://example.com")?;
    writeln!(temp_file, "shop.example.org")?;
    writeln!(temp_file)?; // Empty line
    writeln!(temp_file, "# staging sites")?;
    writeln!(temp_file, "  https://staging.example.com  ")?;

    let path = PathBuf::from(temp_file.path());
    let urls = load_urls_from_file(&path)?;

    assert_eq!(urls.len(), 3);
    assert_eq!(urls[0], "https://example.com");
    assert_eq!(urls[1], "https://shop.example.org");
    assert_eq!(urls[2], "https://staging.example.com");

    Ok(())
}

#[test]
fn test_load_urls_from_file_empty() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file).unwrap();
    writeln!(temp_file, "   ").unwrap();
    writeln!(temp_file, "# nothing here").unwrap();

    let path = PathBuf::from(temp_file.path());
    let result = load_urls_from_file(&path);

    assert!(result.is_err());
    assert!(result.unwrap_err().contains("No valid URLs"));
}

#[test]
fn test_load_urls_from_missing_file() {
    let result = load_urls_from_file(&PathBuf::from("/nonexistent/sitelens/hosts.txt"));
    assert!(result.unwrap_err().contains("Failed to read hosts file"));
}

#[test]
fn test_load_urls_from_source_single_url() {
    let url = Url::parse("https://example.com").unwrap();
    let result = load_urls_from_source(Some(&url), None).unwrap();

    assert_eq!(result.len(), 1);
    assert_eq!(result[0], "https://example.com/");
}

#[test]
fn test_load_urls_from_source_prefers_hosts_file() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "https://a.example.com").unwrap();
    writeln!(temp_file, "https://b.example.com").unwrap();

    let url = Url::parse("https://ignored.example.com").unwrap();
    let path = PathBuf::from(temp_file.path());
    let result = load_urls_from_source(Some(&url), Some(&path)).unwrap();

    assert_eq!(result, vec!["https://a.example.com", "https://b.example.com"]);
}

#[test]
fn test_load_urls_from_source_no_input() {
    let result = load_urls_from_source(None, None);
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .contains("Either --url or --hosts-file must be provided")
    );
}

// ============================================================================
// Report destinations
// ============================================================================

#[test]
fn test_report_destination_stdout_without_output() {
    assert_eq!(report_destination(None, "run-1", ReportFormat::Json, 1), None);
    assert_eq!(report_destination(None, "run-1", ReportFormat::Json, 3), None);
}

#[test]
fn test_report_destination_single_target_uses_path_as_is() {
    let output = PathBuf::from("/tmp/report.txt");
    assert_eq!(
        report_destination(Some(&output), "run-1", ReportFormat::Markdown, 1),
        Some(output.clone())
    );
}

#[test]
fn test_report_destination_several_targets_use_directory() {
    let output = PathBuf::from("/tmp/reports");
    assert_eq!(
        report_destination(Some(&output), "run-1", ReportFormat::Csv, 2),
        Some(PathBuf::from("/tmp/reports/run-1.csv"))
    );
    assert_eq!(
        report_destination(Some(&output), "run-2", ReportFormat::Markdown, 2),
        Some(PathBuf::from("/tmp/reports/run-2.md"))
    );
}

// ============================================================================
// Sites and collaborators
// ============================================================================

#[test]
fn test_find_or_register_site_reuses_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("sitelens.db")).unwrap();

    let first = find_or_register_site(&db, "https://example.com/").unwrap();
    let second = find_or_register_site(&db, "https://example.com/").unwrap();
    let other = find_or_register_site(&db, "https://other.example.com/").unwrap();

    assert_eq!(first.id, second.id);
    assert_ne!(first.id, other.id);
    assert_eq!(db.list_sites().unwrap().len(), 2);
}

#[test]
fn test_build_collaborators_uses_configured_screenshot_dir() {
    let temp_dir = TempDir::new().unwrap();
    let db = Arc::new(Database::new(&temp_dir.path().join("sitelens.db")).unwrap());
    let config = AuditConfig {
        screenshot_dir: temp_dir.path().join("shots"),
        ..AuditConfig::default()
    };

    let collaborators = build_collaborators(db.clone(), &config);
    assert!(collaborators.is_ok());

    // The store handed to the orchestrator is the same database
    let collaborators = collaborators.unwrap();
    assert_eq!(Arc::strong_count(&db), 2);
    drop(collaborators);
    assert_eq!(Arc::strong_count(&db), 1);
}
