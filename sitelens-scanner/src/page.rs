//! The page scanner contract and the browser-then-fetch fallback policy.

use crate::error::Result;
use crate::issue::{DeviceType, IssueSource};
use crate::result::PageScanResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Sitelens/0.1";
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1 Sitelens/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub mobile: bool,
}

impl DeviceType {
    pub fn viewport(&self) -> Viewport {
        match self {
            DeviceType::Desktop => Viewport {
                width: 1920,
                height: 1080,
                mobile: false,
            },
            DeviceType::Mobile => Viewport {
                width: 375,
                height: 812,
                mobile: true,
            },
        }
    }

    pub fn user_agent(&self) -> &'static str {
        match self {
            DeviceType::Desktop => DESKTOP_USER_AGENT,
            DeviceType::Mobile => MOBILE_USER_AGENT,
        }
    }
}

/// Device viewports a scan should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSelection {
    Desktop,
    Mobile,
    #[default]
    Both,
}

impl DeviceSelection {
    pub fn devices(&self) -> Vec<DeviceType> {
        match self {
            DeviceSelection::Desktop => vec![DeviceType::Desktop],
            DeviceSelection::Mobile => vec![DeviceType::Mobile],
            DeviceSelection::Both => vec![DeviceType::Desktop, DeviceType::Mobile],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub capture_screenshots: bool,
    pub devices: DeviceSelection,
    pub run_accessibility: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            capture_screenshots: true,
            devices: DeviceSelection::Both,
            run_accessibility: false,
        }
    }
}

#[async_trait]
pub trait PageScanner: Send + Sync {
    /// Scan one URL. An `Err` means the scanner itself broke, not that the
    /// page was bad.
    async fn scan(&self, url: &str, options: &ScanOptions) -> Result<PageScanResult>;

    fn name(&self) -> &'static str;
}

/// Try the browser first, fall back to fetch on error, and never fail.
///
/// Fallback happens only when the browser path returns `Err`; an empty but
/// rendered page is a valid browser result.
pub async fn scan_with_fallback(
    browser: Option<&dyn PageScanner>,
    fetch: &dyn PageScanner,
    url: &str,
    options: &ScanOptions,
) -> PageScanResult {
    if let Some(browser) = browser {
        match browser.scan(url, options).await {
            Ok(result) => return result,
            Err(e) => {
                warn!(
                    "{} scan of {} failed, falling back to {}: {}",
                    browser.name(),
                    url,
                    fetch.name(),
                    e
                );
            }
        }
    }

    match fetch.scan(url, options).await {
        Ok(result) => result,
        Err(e) => {
            debug!("{} scan of {} failed: {}", fetch.name(), url, e);
            PageScanResult::failed(url, IssueSource::Fetch, &e.to_string())
        }
    }
}
