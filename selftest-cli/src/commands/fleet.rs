//! Self-test a fleet of hosts.

use anyhow::{Context, Result};
use selftest_client::{FleetOptions, FleetOrchestrator};
use selftest_core::{summarize_fleet, SamplePercent};
use selftest_types::HostId;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use super::{print_report, stop_on_ctrl_c, RunContext};

/// Arguments of the fleet command.
#[derive(Debug, Clone)]
pub struct FleetArgs {
    /// Hosts named on the command line.
    pub host_ids: Vec<HostId>,
    /// File with more host ids.
    pub hosts_file: Option<PathBuf>,
    /// Share of hosts to test.
    pub sample_pct: f64,
    /// Concurrency override.
    pub concurrency: Option<usize>,
    /// Sampling seed.
    pub seed: Option<u64>,
    /// Run diagnostics despite unmet requirements.
    pub ignore_requirements: bool,
    /// Passed ids output override.
    pub passed_file: Option<PathBuf>,
    /// Failed ids output override.
    pub failed_file: Option<PathBuf>,
}

/// Run the fleet command.
pub async fn run(ctx: &RunContext, args: FleetArgs) -> Result<()> {
    let mut hosts = args.host_ids.clone();
    if let Some(path) = &args.hosts_file {
        hosts.extend(read_hosts_file(path).await?);
    }
    if hosts.is_empty() {
        anyhow::bail!("No host ids given. Pass them as arguments or with --hosts-file");
    }

    let options = FleetOptions {
        concurrency: args.concurrency.unwrap_or(ctx.config.fleet.concurrency),
        sample: SamplePercent::new(args.sample_pct)?,
        seed: args.seed,
        ignore_requirements: args.ignore_requirements,
    };
    let passed_file = args
        .passed_file
        .unwrap_or_else(|| ctx.config.fleet.passed_file.clone());
    let failed_file = args
        .failed_file
        .unwrap_or_else(|| ctx.config.fleet.failed_file.clone());

    let session = ctx.session(&hosts)?;
    let mut orchestrator = FleetOrchestrator::new(session, options)?;
    if !ctx.raw {
        orchestrator = orchestrator.on_report(print_report);
    }
    let run = orchestrator
        .run(&hosts, stop_on_ctrl_c())
        .await
        .context("Fleet self-test could not start")?;

    write_ids(&passed_file, &run.passed).await?;
    write_ids(&failed_file, &run.failed).await?;

    if ctx.raw {
        println!("{}", serde_json::to_string_pretty(&run)?);
    } else {
        print!("{}", summarize_fleet(&run));
        println!();
        println!("  Passed hosts: {}", passed_file.display());
        println!("  Failed hosts: {}", failed_file.display());
    }

    Ok(())
}

/// Read host ids separated by whitespace or commas. `#` starts a comment.
async fn read_hosts_file(path: &Path) -> Result<Vec<HostId>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read hosts file {}", path.display()))?;
    parse_host_list(&contents)
        .with_context(|| format!("Invalid hosts file {}", path.display()))
}

fn parse_host_list(contents: &str) -> Result<Vec<HostId>> {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or(""))
        .flat_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<HostId>().map_err(anyhow::Error::from))
        .collect()
}

/// One id per line.
async fn write_ids(path: &Path, ids: &BTreeSet<HostId>) -> Result<()> {
    let contents: String = ids.iter().map(|id| format!("{}\n", id)).collect();
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn host_list_accepts_mixed_separators() {
        let ids = parse_host_list("1, 2\n3 4\n# retired\n5 # new\n\n").unwrap();
        assert_eq!(ids, (1..=5).map(HostId::new).collect::<Vec<_>>());
    }

    #[test]
    fn host_list_rejects_garbage() {
        assert!(parse_host_list("1\nabc\n").is_err());
    }

    #[tokio::test]
    async fn ids_file_has_one_id_per_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("passed.log");
        let ids: BTreeSet<HostId> = [HostId::new(3), HostId::new(1)].into_iter().collect();

        write_ids(&path, &ids).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "1\n3\n");
    }

    #[tokio::test]
    async fn empty_set_writes_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("failed.log");

        write_ids(&path, &BTreeSet::new()).await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "");
    }
}
