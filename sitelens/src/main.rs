use colored::Colorize;
use commands::command_argument_builder;
use sitelens::handlers::{
    handle_audit, handle_init, handle_report, handle_runs, handle_site_add, handle_site_list,
};
use sitelens_core::print_banner;
use tracing_subscriber::EnvFilter;

mod commands;

/// Used when `RUST_LOG` is unset.
const DEFAULT_LOG_FILTER: &str = "sitelens=info,sitelens_core=info,sitelens_scanner=info,warn";

fn init_tracing(quiet: bool) {
    let fallback = if quiet { "warn" } else { DEFAULT_LOG_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");

    init_tracing(quiet);

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    if chosen_command.subcommand().is_none() {
        // No subcommand provided, just show the banner
        return;
    }

    let outcome = match chosen_command.subcommand() {
        Some(("init", primary_command)) => handle_init(primary_command),
        Some(("site", primary_command)) => match primary_command.subcommand() {
            Some(("add", secondary_command)) => handle_site_add(secondary_command),
            Some(("list", secondary_command)) => handle_site_list(secondary_command),
            _ => unreachable!("clap should ensure we don't get here"),
        },
        Some(("audit", primary_command)) => handle_audit(primary_command, quiet).await,
        Some(("report", primary_command)) => handle_report(primary_command),
        Some(("runs", primary_command)) => handle_runs(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = outcome {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
