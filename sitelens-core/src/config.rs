//! Audit configuration.
//!
//! Resolution order, lowest to highest: built-in defaults, the TOML file at
//! `~/.config/sitelens/config.toml`, `SITELENS_*` environment variables, and
//! finally whatever the command line sets on the returned value.

use crate::error::{AuditError, Result};
use crate::pool::{DEFAULT_DIAGNOSTICS_CONCURRENCY, DEFAULT_SCAN_CONCURRENCY};
use serde::{Deserialize, Serialize};
use sitelens_scanner::BrowserSettings;
use sitelens_scanner::discovery::{DiscoveryConfig, MAX_DISCOVERED_URLS};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_DIR: &str = "~/.config/sitelens/";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DATABASE_FILE_NAME: &str = "sitelens.db";
pub const SCREENSHOT_DIR_NAME: &str = "screenshots";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_pages: usize,
    pub scan_concurrency: usize,
    pub diagnostics_concurrency: usize,
    /// Leading pages that get a performance diagnostics call.
    pub diagnostics_pages: usize,
    pub capture_screenshots: bool,
    pub run_accessibility: bool,
    pub use_browser: bool,
    pub discovery: DiscoveryConfig,
    pub browser: BrowserSettings,
    pub fetch_timeout_secs: u64,
    pub diagnostics_timeout_secs: u64,
    pub vision_timeout_secs: u64,
    pub database_path: PathBuf,
    pub screenshot_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        let config_dir = expand_path(DEFAULT_CONFIG_DIR);
        Self {
            max_pages: MAX_DISCOVERED_URLS,
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
            diagnostics_concurrency: DEFAULT_DIAGNOSTICS_CONCURRENCY,
            diagnostics_pages: 5,
            capture_screenshots: true,
            run_accessibility: false,
            use_browser: true,
            discovery: DiscoveryConfig::default(),
            browser: BrowserSettings::default(),
            fetch_timeout_secs: 15,
            diagnostics_timeout_secs: 45,
            vision_timeout_secs: 120,
            database_path: config_dir.join(DATABASE_FILE_NAME),
            screenshot_dir: config_dir.join(SCREENSHOT_DIR_NAME),
        }
    }
}

/// Tilde-expand a user supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

pub fn default_config_path() -> PathBuf {
    expand_path(DEFAULT_CONFIG_DIR).join(CONFIG_FILE_NAME)
}

impl AuditConfig {
    /// Defaults, then the user config file, then the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::from_file(&default_config_path())?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// A missing file means defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
            .map_err(|e| AuditError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(text)?;
        config.database_path = expand_path(&config.database_path.to_string_lossy());
        config.screenshot_dir = expand_path(&config.screenshot_dir.to_string_lossy());
        Ok(config)
    }

    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Apply `SITELENS_*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SITELENS_MAX_PAGES") {
            self.max_pages = parse_number("SITELENS_MAX_PAGES", &v)?;
        }
        if let Some(v) = lookup("SITELENS_CONCURRENCY") {
            self.scan_concurrency = parse_number("SITELENS_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("SITELENS_NO_BROWSER") {
            self.use_browser = !is_truthy(&v);
        }
        if let Some(v) = lookup("SITELENS_DATABASE") {
            self.database_path = expand_path(&v);
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn diagnostics_timeout(&self) -> Duration {
        Duration::from_secs(self.diagnostics_timeout_secs)
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_secs(self.vision_timeout_secs)
    }

    /// Page budget, never above the discovery cap.
    pub fn page_budget(&self) -> usize {
        self.max_pages.min(self.discovery.max_urls).max(1)
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| AuditError::Config(format!("{} must be a number, got '{}'", key, value)))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AuditConfig::default();
        assert_eq!(config.max_pages, 50);
        assert_eq!(config.scan_concurrency, 3);
        assert_eq!(config.diagnostics_concurrency, 2);
        assert_eq!(config.diagnostics_timeout(), Duration::from_secs(45));
        assert!(config.use_browser);
        assert!(config.database_path.ends_with("sitelens.db"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AuditConfig::from_toml(
            r#"
            max_pages = 10
            use_browser = false

            [discovery]
            crawl_second_level_pages = 4

            [browser]
            settle_delay_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.max_pages, 10);
        assert!(!config.use_browser);
        assert_eq!(config.discovery.crawl_second_level_pages, 4);
        assert_eq!(config.discovery.max_sitemap_depth, 2);
        assert_eq!(config.browser.settle_delay_ms, 500);
        assert_eq!(config.browser.max_segments, 8);
        assert_eq!(config.scan_concurrency, 3);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SITELENS_MAX_PAGES", "7"),
            ("SITELENS_CONCURRENCY", "5"),
            ("SITELENS_NO_BROWSER", "1"),
            ("SITELENS_DATABASE", "/tmp/audits.db"),
        ]
        .into_iter()
        .collect();

        let mut config = AuditConfig::default();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_pages, 7);
        assert_eq!(config.scan_concurrency, 5);
        assert!(!config.use_browser);
        assert_eq!(config.database_path, PathBuf::from("/tmp/audits.db"));
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let mut config = AuditConfig::default();
        let err = config
            .apply_env(|key| (key == "SITELENS_MAX_PAGES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, AuditError::Config(_)));
    }

    #[test]
    fn test_page_budget_capped_by_discovery() {
        let mut config = AuditConfig::default();
        config.max_pages = 500;
        assert_eq!(config.page_budget(), 50);
        config.max_pages = 0;
        assert_eq!(config.page_budget(), 1);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = AuditConfig::from_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.max_pages, 50);
    }
}
