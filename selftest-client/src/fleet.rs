//! Fleet-wide self-test with sampling and bounded concurrency.
//!
//! Each selected host gets its own pipeline task. A semaphore caps how many
//! run at once. Workers write their report exactly once into a concurrent
//! map; the pass/fail partition is built after every worker has finished.

use crate::pipeline::{panic_message, SelfTest, SessionContext};
use crate::remote::RemoteError;
use crate::stop::StopSignal;
use dashmap::DashMap;
use selftest_core::{
    seeded_rng, select_hosts, FleetRun, PipelineFailure, SamplePercent, SelectionError,
    SelfTestReport,
};
use selftest_types::HostId;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Failures that abort the whole fleet run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FleetError {
    /// The platform cannot be reached at all.
    #[error("platform unreachable: {0}")]
    Unreachable(RemoteError),

    /// Invalid sampling input.
    #[error(transparent)]
    Selection(#[from] SelectionError),

    /// Concurrency must be at least one.
    #[error("concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Knobs for a fleet run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetOptions {
    /// Pipelines running at once.
    pub concurrency: usize,
    /// Share of the fleet to test.
    pub sample: SamplePercent,
    /// Sampling seed; time-based when `None`.
    pub seed: Option<u64>,
    /// Run diagnostics even when requirements are unmet.
    pub ignore_requirements: bool,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            sample: SamplePercent::ALL,
            seed: None,
            ignore_requirements: false,
        }
    }
}

type ReportObserver = Arc<dyn Fn(&SelfTestReport) + Send + Sync>;

/// Drives self-tests across many hosts.
pub struct FleetOrchestrator {
    ctx: SessionContext,
    options: FleetOptions,
    observer: Option<ReportObserver>,
}

impl FleetOrchestrator {
    /// Create an orchestrator.
    pub fn new(ctx: SessionContext, options: FleetOptions) -> Result<Self, FleetError> {
        if options.concurrency == 0 {
            return Err(FleetError::InvalidConcurrency);
        }
        Ok(Self {
            ctx,
            options,
            observer: None,
        })
    }

    /// Call `f` with each host's report as soon as it is ready.
    pub fn on_report(mut self, f: impl Fn(&SelfTestReport) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(f));
        self
    }

    /// Run the fleet self-test.
    ///
    /// Fails only when the platform is unreachable before any host starts.
    /// Every selected host ends up in exactly one of `passed` or `failed`.
    pub async fn run(&self, hosts: &[HostId], stop: StopSignal) -> Result<FleetRun, FleetError> {
        let call_timeout = self.ctx.settings.provision.call_timeout;
        tokio::time::timeout(call_timeout, self.ctx.client.ping())
            .await
            .unwrap_or(Err(RemoteError::Timeout))
            .map_err(FleetError::Unreachable)?;

        let (mut rng, seed) = seeded_rng(self.options.seed);
        let selected = select_hosts(hosts, self.options.sample, &mut rng);
        tracing::info!(
            total = hosts.len(),
            selected = selected.len(),
            seed,
            concurrency = self.options.concurrency,
            "starting fleet self-test"
        );

        let reports: Arc<DashMap<HostId, SelfTestReport>> = Arc::new(DashMap::new());
        let permits = Arc::new(Semaphore::new(self.options.concurrency));
        let mut workers = JoinSet::new();

        for &host_id in &selected {
            let ctx = self.ctx.clone();
            let reports = Arc::clone(&reports);
            let permits = Arc::clone(&permits);
            let observer = self.observer.clone();
            let stop = stop.clone();
            let ignore = self.options.ignore_requirements;

            workers.spawn(async move {
                let report = match permits.acquire_owned().await {
                    Ok(_permit) if !stop.is_stopped() => {
                        SelfTest::new(&ctx, ignore).run(host_id, &stop).await
                    }
                    Ok(_) => SelfTestReport::failed(
                        host_id,
                        PipelineFailure::Cancelled("cancelled before start".into()),
                    ),
                    Err(_) => SelfTestReport::failed(
                        host_id,
                        PipelineFailure::Internal("worker pool closed".into()),
                    ),
                };
                if let Some(observer) = &observer {
                    observer(&report);
                }
                reports.insert(host_id, report);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                let msg = if e.is_panic() {
                    panic_message(e.into_panic().as_ref())
                } else {
                    e.to_string()
                };
                tracing::error!("fleet worker ended abnormally: {}", msg);
            }
        }

        let mut collected: BTreeMap<HostId, SelfTestReport> = BTreeMap::new();
        for &host_id in &selected {
            let report = reports
                .remove(&host_id)
                .map(|(_, report)| report)
                .unwrap_or_else(|| {
                    SelfTestReport::failed(
                        host_id,
                        PipelineFailure::Internal("worker ended without a report".into()),
                    )
                });
            collected.insert(host_id, report);
        }

        let run = FleetRun::from_reports(selected, seed, collected);
        tracing::info!(
            passed = run.passed.len(),
            failed = run.failed.len(),
            leaked = run.leaked().len(),
            "fleet self-test finished"
        );
        Ok(run)
    }
}

impl std::fmt::Debug for FleetOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetOrchestrator")
            .field("ctx", &self.ctx)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
