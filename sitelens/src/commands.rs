use crate::CLAP_STYLING;
use clap::{arg, command};
use std::path::PathBuf;
use url::Url;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("sitelens")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("sitelens")
        .styles(CLAP_STYLING)
        .arg(arg!(-q --"quiet" "Suppress banner and non-essential output").required(false))
        .arg(
            arg!(--"db" <PATH>)
                .required(false)
                .global(true)
                .help("Database to use (default: ~/.config/sitelens/sitelens.db)")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Initializes the sitelens configuration and database on your filesystem")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Location to store the sitelens configuration")
                        .default_value("~/.config/sitelens/"),
                )
                .arg(
                    arg!(-f --"force")
                        .help(
                            "Forces the overwriting of any existing configuration and database at \
                        the specified location.",
                        )
                        .required(false),
                ),
        )
        .subcommand(
            command!("site")
                .about("Manage the sites registered for auditing")
                .subcommand_required(true)
                .subcommand(
                    command!("add")
                        .about("Registers a site")
                        .arg(
                            arg!(-u --"url" <URL>)
                                .required(true)
                                .help("Root URL of the site")
                                .value_parser(clap::value_parser!(Url)),
                        )
                        .arg(
                            arg!(-n --"name" <NAME>)
                                .required(false)
                                .help("A display name for the site"),
                        )
                        .arg(
                            arg!(-a --"account" <ACCOUNT_ID>)
                                .required(false)
                                .help("Account notified when audits of this site finish"),
                        ),
                )
                .subcommand(command!("list").about("List all registered sites")),
        )
        .subcommand(
            command!("audit")
                .about(
                    "Audit a site: discover its pages, scan them and score technical, \
                performance, visual and accessibility health.",
                )
                .arg(
                    arg!(-u --"url" <URL>)
                        .required(false)
                        .help("The URL of the site to audit")
                        .value_parser(clap::value_parser!(Url)),
                )
                .arg(
                    arg!(-H --"hosts-file" <PATH>)
                        .required(false)
                        .help("Path to a newline-delimited file of site URLs to audit")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-s --"site" <SITE_ID>)
                        .required(false)
                        .help("ID of a registered site"),
                )
                .group(
                    clap::ArgGroup::new("target")
                        .args(["url", "hosts-file", "site"])
                        .required(true),
                )
                .arg(
                    arg!(--"no-browser")
                        .required(false)
                        .help("Scan with plain HTTP fetches only (no screenshots)")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(-t --"concurrency" <NUM_WORKERS>)
                        .required(false)
                        .help("Number of pages scanned at once")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-m --"max-pages" <NUM_PAGES>)
                        .required(false)
                        .help("Maximum number of pages to scan per site")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file, or to a directory when auditing several sites")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv, markdown")
                        .value_parser(["text", "json", "csv", "markdown"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("report")
                .about("Render the report of a stored audit run")
                .arg(
                    arg!(-r --"run" <RUN_ID>)
                        .required(true)
                        .help("ID of the audit run"),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Save report to file (default: display to screen)")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json, csv, markdown")
                        .value_parser(["text", "json", "csv", "markdown"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("runs")
                .about("List the audit runs of a site, newest first")
                .arg(
                    arg!(-s --"site" <SITE_ID>)
                        .required(true)
                        .help("ID of a registered site"),
                ),
        )
}
