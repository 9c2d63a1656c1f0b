//! # selftest
//!
//! CLI for self-testing GPU marketplace hosts.
//!
//! ## Commands
//!
//! - `machine`: Self-test a single host
//! - `fleet`: Self-test many hosts, optionally a random sample
//!
//! ## Example
//!
//! ```bash
//! # Test one host
//! selftest machine 54321
//!
//! # Test 30% of a fleet, four hosts at a time
//! selftest fleet --hosts-file hosts.txt --sample-pct 30 --concurrency 4
//!
//! # Try it without a platform account
//! selftest --mock fleet 1 2 3
//! ```
//!
//! ## Exit codes
//!
//! - `0`: the run completed (`fleet`) or the host passed (`machine`)
//! - `1`: the host failed (`machine`), or the run could not start

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use selftest_core::Verdict;
use selftest_types::HostId;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

mod commands;
mod config;

use commands::{fleet, machine, RunContext};
use config::Config;

/// Self-test GPU marketplace hosts.
#[derive(Parser, Debug)]
#[command(name = "selftest")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: selftest.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Platform API key (overrides SELFTEST_API_KEY and the key file)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Platform API base URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Use an in-process simulated platform instead of the real API
    #[arg(long, global = true)]
    mock: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    raw: bool,

    /// Debug logging for the self-test crates
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Self-test a single host
    Machine {
        /// Host to test
        host_id: HostId,

        /// Run diagnostics even when requirements are unmet
        #[arg(long)]
        ignore_requirements: bool,
    },

    /// Self-test a fleet of hosts
    Fleet {
        /// Hosts to consider
        host_ids: Vec<HostId>,

        /// File with more host ids (whitespace or comma separated)
        #[arg(long)]
        hosts_file: Option<PathBuf>,

        /// Percentage of the hosts to test
        #[arg(long, default_value = "100")]
        sample_pct: f64,

        /// Hosts tested at once (default: from config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Run diagnostics even when requirements are unmet
        #[arg(long)]
        ignore_requirements: bool,

        /// Where to write passing host ids (default: from config)
        #[arg(long)]
        passed_file: Option<PathBuf>,

        /// Where to write failing host ids (default: from config)
        #[arg(long)]
        failed_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let api_key = config
        .api_key(cli.api_key.as_deref())
        .context("Failed to read API key")?;

    let ctx = RunContext {
        config,
        api_key,
        url: cli.url,
        mock: cli.mock,
        raw: cli.raw,
    };

    match cli.command {
        Commands::Machine {
            host_id,
            ignore_requirements,
        } => {
            let verdict = machine::run(&ctx, host_id, ignore_requirements).await?;
            if verdict == Verdict::Fail {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Fleet {
            host_ids,
            hosts_file,
            sample_pct,
            concurrency,
            seed,
            ignore_requirements,
            passed_file,
            failed_file,
        } => {
            let args = fleet::FleetArgs {
                host_ids,
                hosts_file,
                sample_pct,
                concurrency,
                seed,
                ignore_requirements,
                passed_file,
                failed_file,
            };
            fleet::run(&ctx, args).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Log to stderr so stdout carries only reports.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,selftest=debug,gpu_selftest_client=debug"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
