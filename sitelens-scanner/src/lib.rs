pub mod analyzer;
pub mod browser;
pub mod checks;
pub mod crawler;
pub mod discovery;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod issue;
pub mod page;
pub mod result;
pub mod sitemap;

pub use analyzer::{AccessibilityAnalyzer, StaticAnalyzer};
pub use browser::{BrowserScanner, BrowserSession, BrowserSettings};
pub use crawler::LinkCrawler;
pub use discovery::{
    CachedSitemap, Discovery, DiscoveryConfig, DiscoveryMethod, DiscoveryResult,
    PlatformCredentials, SiteProfile, StoredEntity,
};
pub use error::ScanError;
pub use fetch::FetchScanner;
pub use issue::{Category, DeviceType, Issue, IssueSource, Severity, dedupe_issues};
pub use page::{DeviceSelection, PageScanner, ScanOptions, scan_with_fallback};
pub use result::{DeviceCapture, DomSummary, PageScanResult, ScanStrategy};
