pub mod adapters;
pub mod collaborators;
pub mod config;
pub mod data;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod run;
pub mod scoring;
pub mod security;

use colored::Colorize;

pub use collaborators::{
    AuditEvent, AuditStore, Collaborators, DiagnosticsProvider, ImageStore, Notifier, Site,
    SummaryGenerator, VisionAnalyzer,
};
pub use config::AuditConfig;
pub use error::{AuditError, StoreError};
pub use orchestrator::{Auditor, ProgressCallback};
pub use run::{AuditRun, PageRecord, Progress, RunStatus, RunUpdate};
pub use scoring::{CategoryScores, ScoreCard, score};

const BANNER: &str = r#"
     _ _       _
 ___(_) |_ ___| | ___ _ __  ___
/ __| | __/ _ \ |/ _ \ '_ \/ __|
\__ \ | ||  __/ |  __/ | | \__ \
|___/_|\__\___|_|\___|_| |_|___/
"#;

pub fn print_banner() {
    println!("{}", BANNER.bright_cyan().bold());
    println!(
        "  {} {}\n",
        "website health, performance and visual quality auditor".bright_white(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
}
