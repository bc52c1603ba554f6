//! Command-line parsing (clap derive) into `AppCommand`

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;

use crate::command::AppCommand;
use crate::config::snmp_community;
use crate::database::SnmpVersion;

const DEFAULT_RUNS_LIMIT: i64 = 20;

#[derive(Debug, Parser)]
#[command(
    name = "nexus-routemap",
    version,
    about = "Discover routed IPv4 topology by crawling routers over SNMP"
)]
struct Cli {
    /// SQLite database holding discovery runs
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start a discovery run and follow it until it stops (Ctrl+C pauses)
    Crawl {
        /// Router the crawl starts from
        root_ip: String,
        /// SNMP community (default: NEXUS_SNMP_COMMUNITY or "public")
        #[arg(long)]
        community: Option<String>,
        /// SNMP version: 1 or 2c
        #[arg(long = "snmp-version", default_value = "2c")]
        snmp_version: SnmpVersion,
    },
    /// Continue a paused run
    Resume { run_id: i64 },
    /// Pause a running run after its current host
    Pause { run_id: i64 },
    /// Cancel a running or paused run
    Cancel { run_id: i64 },
    /// List recent runs
    Runs {
        #[arg(long, default_value_t = DEFAULT_RUNS_LIMIT)]
        limit: i64,
    },
    /// Show one run
    Status { run_id: i64 },
    /// Routers and links discovered by a run
    Topology { run_id: i64 },
    /// Interfaces, networks and routes of one router
    Router { run_id: i64, ip: String },
}

/// A parsed invocation: the command plus global options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliInvocation {
    pub db_path: Option<PathBuf>,
    pub command: AppCommand,
}

pub(crate) fn version_text() -> String {
    format!("nexus-routemap {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn usage_text() -> String {
    Cli::command().render_long_help().to_string()
}

pub(crate) fn parse_cli_args<I, S>(args: I) -> Result<CliInvocation>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();

    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => {
            return match e.kind() {
                ErrorKind::DisplayHelp
                | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
                | ErrorKind::MissingSubcommand => Ok(CliInvocation {
                    db_path: None,
                    command: AppCommand::Help,
                }),
                ErrorKind::DisplayVersion => Ok(CliInvocation {
                    db_path: None,
                    command: AppCommand::Version,
                }),
                _ => Err(anyhow::anyhow!("{}", e.render())),
            };
        }
    };

    let command = match cli.command {
        Commands::Crawl {
            root_ip,
            community,
            snmp_version,
        } => AppCommand::Crawl {
            root_ip,
            community: community.unwrap_or_else(snmp_community),
            snmp_version,
        },
        Commands::Resume { run_id } => AppCommand::Resume { run_id },
        Commands::Pause { run_id } => AppCommand::Pause { run_id },
        Commands::Cancel { run_id } => AppCommand::Cancel { run_id },
        Commands::Runs { limit } => AppCommand::Runs {
            limit: limit.max(1),
        },
        Commands::Status { run_id } => AppCommand::Status { run_id },
        Commands::Topology { run_id } => AppCommand::Topology { run_id },
        Commands::Router { run_id, ip } => AppCommand::Router { run_id, ip },
    };

    Ok(CliInvocation {
        db_path: cli.db,
        command,
    })
}
