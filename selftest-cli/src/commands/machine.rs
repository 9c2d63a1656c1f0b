//! Self-test a single host.

use anyhow::{Context, Result};
use selftest_client::{FleetOptions, FleetOrchestrator};
use selftest_core::{SamplePercent, Verdict};
use selftest_types::HostId;

use super::{print_report, stop_on_ctrl_c, RunContext};

/// Run the machine command and return the host's verdict.
pub async fn run(ctx: &RunContext, host_id: HostId, ignore_requirements: bool) -> Result<Verdict> {
    let session = ctx.session(&[host_id])?;
    let options = FleetOptions {
        concurrency: 1,
        sample: SamplePercent::ALL,
        seed: None,
        ignore_requirements,
    };

    if !ctx.raw {
        println!("Self-testing host {}...", host_id);
        println!();
    }

    let mut orchestrator = FleetOrchestrator::new(session, options)?;
    if !ctx.raw {
        orchestrator = orchestrator.on_report(print_report);
    }
    let run = orchestrator
        .run(&[host_id], stop_on_ctrl_c())
        .await
        .context("Self-test could not start")?;

    let Some(report) = run.reports.get(&host_id) else {
        anyhow::bail!("No report for host {}", host_id);
    };
    if ctx.raw {
        println!("{}", serde_json::to_string_pretty(report)?);
    }

    Ok(report.verdict)
}
