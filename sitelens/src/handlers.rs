use anyhow::{Context, Result, anyhow, bail};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use sitelens_core::adapters::{
    DigestSummary, DomAccessibilityAnalyzer, FsImageStore, LogNotifier, NoDiagnostics, NoVision,
};
use sitelens_core::config::{
    AuditConfig, CONFIG_FILE_NAME, DATABASE_FILE_NAME, DEFAULT_CONFIG_DIR, SCREENSHOT_DIR_NAME,
    expand_path,
};
use sitelens_core::data::Database;
use sitelens_core::report::{ReportFormat, render_report, write_report};
use sitelens_core::security::BasicStaticAnalyzer;
use sitelens_core::{AuditRun, Auditor, Collaborators, Progress, ProgressCallback, RunStatus, Site};
use sitelens_scanner::{BrowserScanner, BrowserSession, Category};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

// Helper functions for audit handler

/// Load URLs from either a file or a single URL argument
pub fn load_urls_from_source(
    url: Option<&Url>,
    hosts_file: Option<&PathBuf>,
) -> Result<Vec<String>, String> {
    if let Some(hosts_file_path) = hosts_file {
        load_urls_from_file(hosts_file_path)
    } else if let Some(url) = url {
        Ok(vec![url.as_str().to_string()])
    } else {
        Err("Either --url or --hosts-file must be provided".to_string())
    }
}

/// Load and parse URLs from a file
pub fn load_urls_from_file(path: &PathBuf) -> Result<Vec<String>, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read hosts file {}: {}", path.display(), e))?;

    let urls: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(parse_url_line)
        .collect();

    if urls.is_empty() {
        return Err(format!("No valid URLs found in {}", path.display()));
    }

    Ok(urls)
}

/// Parse a single line as a URL, trying to add https:// if needed
pub fn parse_url_line(line: &str) -> Option<String> {
    // Try to parse as-is
    if let Ok(url) = Url::parse(line)
        && matches!(url.scheme(), "http" | "https")
    {
        return Some(line.to_string());
    }

    // Sites are audited over https unless the line says otherwise
    let with_scheme = format!("https://{}", line);
    if let Ok(url) = Url::parse(&with_scheme)
        && url.host_str().is_some_and(|h| !h.is_empty())
        && !line.contains(char::is_whitespace)
    {
        return Some(with_scheme);
    }

    eprintln!("⚠️  Skipping invalid URL '{}'", line);
    None
}

/// Where a rendered report goes: `None` means stdout.
///
/// With several audit targets `output` names a directory and every run gets
/// `<run id>.<ext>` inside it.
pub fn report_destination(
    output: Option<&PathBuf>,
    run_id: &str,
    format: ReportFormat,
    targets: usize,
) -> Option<PathBuf> {
    let output = output?;
    if targets > 1 {
        Some(output.join(format!("{}.{}", run_id, format.extension())))
    } else {
        Some(output.clone())
    }
}

/// The site registered under `url`, registering it first if needed.
pub fn find_or_register_site(db: &Database, url: &str) -> Result<Site> {
    if let Some(site) = db.find_site_by_url(url)? {
        return Ok(site);
    }
    let site = db.insert_site(url, None, None, None)?;
    info!("Registered {} as site {}", url, site.id);
    Ok(site)
}

/// The local collaborator set the CLI audits with.
pub fn build_collaborators(db: Arc<Database>, config: &AuditConfig) -> Result<Collaborators> {
    let analyzer = BasicStaticAnalyzer::new()?.with_timeouts(
        Duration::from_secs(config.discovery.robots_timeout_secs),
        Duration::from_secs(config.discovery.sitemap_timeout_secs),
    );

    Ok(Collaborators {
        store: db,
        static_analyzer: Arc::new(analyzer),
        diagnostics: Arc::new(NoDiagnostics),
        vision: Arc::new(NoVision),
        images: Arc::new(FsImageStore::new(config.screenshot_dir.clone())),
        summary: Arc::new(DigestSummary),
        notifier: Arc::new(LogNotifier),
    })
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_prompt(msg: &str) -> io::Result<String> {
    print!("{} ", msg.bright_cyan().bold());
    io::stdout().flush()?;
    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    Ok(response.trim().to_lowercase())
}

/// Defaults, config file and environment, then the global `--db` flag.
fn load_config(args: &ArgMatches) -> Result<AuditConfig> {
    let mut config = AuditConfig::load()?;
    if let Some(db) = args.get_one::<PathBuf>("db") {
        config.database_path = expand_path(&db.to_string_lossy());
    }
    Ok(config)
}

fn open_database(config: &AuditConfig) -> Result<Database> {
    let path = &config.database_path;
    if !Database::exists(path) {
        bail!(
            "No database at {}. Run `sitelens init` first or pass --db",
            path.display()
        );
    }
    Database::new(path).with_context(|| format!("Failed to open database {}", path.display()))
}

fn report_format(args: &ArgMatches) -> Result<ReportFormat> {
    let name = args
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("text");
    ReportFormat::from_str(name).ok_or_else(|| anyhow!("Unsupported report format '{}'", name))
}

fn emit_report(run: &AuditRun, format: ReportFormat, destination: Option<PathBuf>) -> Result<()> {
    let content = render_report(run, format)?;
    match destination {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            write_report(&content, &path)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!(
                "{} Report saved: {}",
                "✓".green().bold(),
                path.display().to_string().bright_white()
            );
        }
        None => print!("{}", content),
    }
    Ok(())
}

pub fn handle_init(args: &ArgMatches) -> Result<()> {
    print_divider();
    println!("{}", "  SITELENS INITIALIZATION".bright_white().bold());
    print_divider();
    println!();

    let config_dir = expand_path(
        args.get_one::<String>("PATH")
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_DIR),
    );
    let force = args.get_flag("force");
    let db_path = args
        .get_one::<PathBuf>("db")
        .map(|p| expand_path(&p.to_string_lossy()))
        .unwrap_or_else(|| config_dir.join(DATABASE_FILE_NAME));
    let config_path = config_dir.join(CONFIG_FILE_NAME);
    let screenshot_dir = config_dir.join(SCREENSHOT_DIR_NAME);

    println!("{} Parsed arguments", "✓".green().bold());
    println!(
        "{} Target: {}",
        "→".blue(),
        config_dir.display().to_string().bright_white()
    );
    println!();

    // Check for existing installation
    if config_path.exists() && !force {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Configuration already exists:");
        println!(
            "  {} {}",
            "•".yellow(),
            config_path.display().to_string().bright_white()
        );
        println!();
        println!("{}", "This operation will overwrite existing files.".yellow());

        let response = print_prompt("Do you want to continue? [y/N]:")?;
        println!();

        if response != "y" && response != "yes" {
            println!("{} Initialization cancelled.", "✗".red().bold());
            return Ok(());
        }
        println!("{} Proceeding with overwrite", "→".yellow().bold());
        println!();
    }

    create_configuration_assets(&config_dir, &screenshot_dir, &config_path, &db_path)?;

    // Handle existing database in force mode
    if force && Database::exists(&db_path) {
        println!(
            "{} Deleting existing database (force mode)",
            "→".yellow().bold()
        );
        Database::drop(&db_path)
            .with_context(|| format!("Failed to remove {}", db_path.display()))?;
        println!("{} Existing database removed", "✓".green().bold());
        println!();
    }

    if Database::exists(&db_path) {
        println!("{}", "⚠ WARNING".yellow().bold());
        println!("Database already exists at:");
        println!(
            "  {} {}",
            "•".yellow(),
            db_path.display().to_string().bright_white()
        );
        println!();

        let response = print_prompt("Would you like to overwrite it? [y/N]:")?;
        println!();

        if response == "y" || response == "yes" {
            Database::drop(&db_path)
                .with_context(|| format!("Failed to remove {}", db_path.display()))?;
            println!("{} Existing database removed", "✓".green().bold());
            println!();
        } else {
            println!("{} Keeping existing database", "→".blue());
            println!();
        }
    }

    if !Database::exists(&db_path) {
        println!("{} Creating database...", "→".blue());
        Database::new(&db_path)
            .with_context(|| format!("Failed to create database {}", db_path.display()))?;
        println!(
            "{} Database initialized: {}",
            "✓".green().bold(),
            db_path.display().to_string().bright_white()
        );
    }

    println!();
    print_divider();
    println!("{}", "  INITIALIZATION COMPLETE".green().bold());
    print_divider();
    println!();
    println!(
        "{} Config file: {}",
        "✓".green().bold(),
        config_path.display().to_string().bright_white()
    );
    println!(
        "{} Database: {}",
        "✓".green().bold(),
        db_path.display().to_string().bright_white()
    );
    println!(
        "{} Screenshots: {}",
        "✓".green().bold(),
        screenshot_dir.display().to_string().bright_white()
    );
    println!();
    Ok(())
}

fn create_configuration_assets(
    config_dir: &Path,
    screenshot_dir: &Path,
    config_path: &Path,
    db_path: &Path,
) -> Result<()> {
    println!("{} Creating directory structure...", "→".blue());

    fs::create_dir_all(config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;
    println!(
        "  {} {}",
        "✓".green(),
        config_dir.display().to_string().bright_white()
    );

    fs::create_dir_all(screenshot_dir)
        .with_context(|| format!("Failed to create {}", screenshot_dir.display()))?;
    println!(
        "  {} {}",
        "✓".green(),
        screenshot_dir.display().to_string().bright_white()
    );

    println!("{} Writing default configuration...", "→".blue());
    let config = AuditConfig {
        database_path: db_path.to_path_buf(),
        screenshot_dir: screenshot_dir.to_path_buf(),
        ..AuditConfig::default()
    };
    let contents = config.to_toml()?;
    fs::write(config_path, &contents)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    println!(
        "  {} {} ({} bytes)",
        "✓".green().bold(),
        config_path.display().to_string().bright_white(),
        contents.len().to_string().cyan()
    );
    println!();
    Ok(())
}

pub fn handle_site_add(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let db = open_database(&config)?;

    let url = args
        .get_one::<Url>("url")
        .ok_or_else(|| anyhow!("--url is required"))?;
    let name = args.get_one::<String>("name").map(String::as_str);
    let account = args.get_one::<String>("account").map(String::as_str);

    if let Some(existing) = db.find_site_by_url(url.as_str())? {
        bail!("{} is already registered as site {}", url, existing.id);
    }

    let site = db.insert_site(url.as_str(), name, account, None)?;
    println!(
        "{} Registered {} as site {}",
        "✓".green().bold(),
        site.url.bright_white(),
        site.id.cyan()
    );
    Ok(())
}

pub fn handle_site_list(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let db = open_database(&config)?;
    let sites = db.list_sites()?;

    if sites.is_empty() {
        println!("{} No sites registered. Add one with `sitelens site add --url <URL>`", "→".blue());
        return Ok(());
    }

    println!("{}", "SITES".bright_blue().bold());
    for site in &sites {
        println!(
            "  {} {}  {}{}",
            "•".blue(),
            site.id.cyan(),
            site.url.bright_white(),
            site.name
                .as_deref()
                .map(|n| format!("  ({})", n))
                .unwrap_or_default()
                .dimmed()
        );
    }
    println!();
    println!("{} site(s)", sites.len());
    Ok(())
}

pub fn handle_runs(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let db = open_database(&config)?;
    let site_id = args
        .get_one::<String>("site")
        .ok_or_else(|| anyhow!("--site is required"))?;
    let site = db
        .get_site(site_id)?
        .ok_or_else(|| anyhow!("No site with id {}", site_id))?;

    let runs = db.list_runs_for_site(&site.id)?;
    if runs.is_empty() {
        println!("{} No audits recorded for {}", "→".blue(), site.url);
        return Ok(());
    }

    println!("{} {}", "RUNS".bright_blue().bold(), site.url.bright_white());
    for run in &runs {
        let score = run
            .overall_score
            .map(|s| format!("{:>3}/100", s))
            .unwrap_or_else(|| "   -   ".to_string());
        println!(
            "  {} {}  {}  {}  {}",
            status_marker(run.status),
            run.id.cyan(),
            run.created_at.format("%Y-%m-%d %H:%M"),
            score,
            run.status.as_str().dimmed()
        );
    }
    Ok(())
}

fn status_marker(status: RunStatus) -> colored::ColoredString {
    match status {
        RunStatus::Completed => "✓".green().bold(),
        RunStatus::Failed => "✗".red().bold(),
        RunStatus::Running => "→".yellow().bold(),
        RunStatus::Pending => "•".blue(),
    }
}

/// CLI flags win over config file and environment.
fn apply_audit_overrides(config: &mut AuditConfig, args: &ArgMatches) {
    if let Some(max_pages) = args.get_one::<usize>("max-pages") {
        config.max_pages = *max_pages;
    }
    if let Some(concurrency) = args.get_one::<usize>("concurrency") {
        config.scan_concurrency = *concurrency;
    }
    if args.get_flag("no-browser") {
        config.use_browser = false;
    }
}

fn audit_progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
    {
        bar.set_style(style.progress_chars("=> "));
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn progress_callback(bar: ProgressBar) -> ProgressCallback {
    Arc::new(move |progress: &Progress| {
        bar.set_position(u64::from(progress.percentage));
        bar.set_message(progress.label.clone());
    })
}

fn print_run_outcome(site: &Site, run: &AuditRun) {
    match run.status {
        RunStatus::Completed => {
            println!(
                "{} {} scored {} across {} page(s)",
                "✓".green().bold(),
                site.url.bright_white(),
                format!("{}/100", run.overall_score.unwrap_or_default()).bold(),
                run.pages_scanned
            );
            if let Some(scores) = run.category_scores {
                let line: Vec<String> = Category::ALL
                    .iter()
                    .map(|c| format!("{} {}", c, scores.get(*c)))
                    .collect();
                println!("  {} {}", "→".blue(), line.join("  ").dimmed());
            }
        }
        _ => {
            let reason = run
                .issues
                .first()
                .map(|i| i.message.as_str())
                .unwrap_or("unknown");
            println!(
                "{} {} audit failed: {}",
                "✗".red().bold(),
                site.url.bright_white(),
                reason.yellow()
            );
        }
    }
}

async fn open_browser(config: &AuditConfig) -> Option<Arc<BrowserSession>> {
    if !config.use_browser {
        println!("{} Browser disabled, scanning with HTTP fetches", "→".blue());
        return None;
    }
    match BrowserSession::open(&config.browser).await {
        Ok(session) => Some(Arc::new(session)),
        Err(e) => {
            warn!("Could not launch browser: {}", e);
            println!(
                "{} Browser unavailable, scanning with HTTP fetches",
                "→".yellow().bold()
            );
            None
        }
    }
}

async fn close_browser(session: Option<Arc<BrowserSession>>) {
    let Some(session) = session else {
        return;
    };
    match Arc::try_unwrap(session) {
        Ok(session) => {
            if let Err(e) = session.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }
        }
        Err(_) => warn!("Browser session still in use at shutdown"),
    }
}

pub async fn handle_audit(args: &ArgMatches, quiet: bool) -> Result<()> {
    let mut config = load_config(args)?;
    apply_audit_overrides(&mut config, args);
    let format = report_format(args)?;
    let output = args.get_one::<PathBuf>("output");

    let db = Arc::new(open_database(&config)?);
    let sites = match args.get_one::<String>("site") {
        Some(id) => vec![
            db.get_site(id)?
                .ok_or_else(|| anyhow!("No site with id {}", id))?,
        ],
        None => {
            let urls = load_urls_from_source(
                args.get_one::<Url>("url"),
                args.get_one::<PathBuf>("hosts-file"),
            )
            .map_err(|e| anyhow!(e))?;
            urls.iter()
                .map(|url| find_or_register_site(&db, url))
                .collect::<Result<Vec<_>>>()?
        }
    };

    println!(
        "\n{} Auditing {} site(s), up to {} page(s) each, {} worker(s)\n",
        "→".blue(),
        sites.len(),
        config.page_budget(),
        config.scan_concurrency.max(1)
    );

    let collaborators = build_collaborators(db.clone(), &config)?;
    let session = open_browser(&config).await;

    let mut failures = 0;
    for site in &sites {
        let bar = audit_progress_bar(quiet);
        let mut auditor = Auditor::new(collaborators.clone(), config.clone())?
            .with_progress_callback(progress_callback(bar.clone()));
        if let Some(ref session) = session {
            let mut scanner = BrowserScanner::new(session.clone(), config.browser.clone());
            if config.run_accessibility {
                scanner = scanner.with_accessibility(Arc::new(DomAccessibilityAnalyzer));
            }
            auditor = auditor.with_browser(Arc::new(scanner));
        }

        let outcome = auditor.run(&site.id).await;
        bar.finish_and_clear();
        drop(auditor);

        match outcome {
            Ok(run) => {
                print_run_outcome(site, &run);
                emit_report(&run, format, report_destination(output, &run.id, format, sites.len()))?;
            }
            Err(e) => {
                failures += 1;
                eprintln!("{} Audit of {} failed: {:#}", "✗".red().bold(), site.url, e);
            }
        }
    }

    close_browser(session).await;

    if failures > 0 {
        bail!("{} of {} audit(s) could not be run", failures, sites.len());
    }
    Ok(())
}

pub fn handle_report(args: &ArgMatches) -> Result<()> {
    let config = load_config(args)?;
    let db = open_database(&config)?;
    let run_id = args
        .get_one::<String>("run")
        .ok_or_else(|| anyhow!("--run is required"))?;
    let run = db
        .get_run(run_id)?
        .ok_or_else(|| anyhow!("No audit run with id {}", run_id))?;

    let format = report_format(args)?;
    emit_report(&run, format, args.get_one::<PathBuf>("output").cloned())
}
