//! Staged diagnostic suite run against a Ready test instance.
//!
//! Cases run strictly in stage order (System, GPU, Stress). A failing
//! hard-dependency case aborts the rest; every case that did not run is
//! still reported, as Skipped.

use crate::remote::{InstanceProbe, RemoteError};
use crate::stop::StopSignal;
use selftest_core::{
    HardwareClass, InstanceState, LifecycleEvent, TestInstance, TestOutcome, TestResult, TestStage,
};
use selftest_types::{DriverVersion, HostRecord, InstanceId, KernelSpec};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Suite-level failures. Per-case problems become [`TestResult`]s instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuiteError {
    /// Diagnostics only run against a Ready instance.
    #[error("instance is {0:?}, diagnostics need it Ready")]
    NotReady(InstanceState),

    /// Ready instance without an agent endpoint.
    #[error("instance {0} has no agent endpoint")]
    NoEndpoint(InstanceId),
}

/// System-stage checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemCheck {
    /// GPU count and model match the listing.
    Inventory,
    /// Installed driver matches the listing.
    Driver,
    /// CPU cores and RAM visible to the instance match the listing.
    Resources,
}

/// What a test case checks, tagged by stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Check {
    /// Query system info and compare it with the host record.
    System(SystemCheck),
    /// Run the compute kernel on every GPU.
    Gpu(KernelSpec),
    /// Sustain load for the duration and judge it against the hardware band.
    Stress(Duration),
}

impl Check {
    /// Stage this check belongs to.
    pub fn stage(&self) -> TestStage {
        match self {
            Self::System(_) => TestStage::System,
            Self::Gpu(_) => TestStage::Gpu,
            Self::Stress(_) => TestStage::Stress,
        }
    }
}

/// Typed verdict of a check that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckVerdict {
    /// Host passed, with a summary.
    Pass(String),
    /// Host failed, with the reason.
    Fail(String),
}

/// Where a check runs.
#[derive(Clone, Copy)]
pub struct CheckTarget<'a> {
    /// Agent client.
    pub probe: &'a dyn InstanceProbe,
    /// Agent endpoint of the Ready instance.
    pub endpoint: &'a str,
    /// Listing the results are compared against.
    pub host: &'a HostRecord,
}

/// One diagnostic test case.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    /// Case name shown in the report.
    pub name: String,
    /// The check routine.
    pub check: Check,
    /// Failure aborts the remaining cases.
    pub hard_dependency: bool,
    /// Failure fails the verdict. Non-mandatory failures are advisory.
    pub mandatory: bool,
    /// Bound on the check's wall time.
    pub timeout: Duration,
}

impl TestCase {
    /// A mandatory, non-blocking case with a two minute timeout.
    pub fn new(name: impl Into<String>, check: Check) -> Self {
        Self {
            name: name.into(),
            check,
            hard_dependency: false,
            mandatory: true,
            timeout: Duration::from_secs(120),
        }
    }

    /// Failure aborts every later case.
    pub fn aborts_on_failure(mut self) -> Self {
        self.hard_dependency = true;
        self.mandatory = true;
        self
    }

    /// Failure is reported but does not fail the host.
    pub fn advisory(mut self) -> Self {
        self.mandatory = false;
        self.hard_dependency = false;
        self
    }

    /// Override the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stage of the case.
    pub fn stage(&self) -> TestStage {
        self.check.stage()
    }

    /// Run the check once. `Err` means the check itself could not run.
    pub async fn execute(&self, target: CheckTarget<'_>) -> Result<CheckVerdict, RemoteError> {
        let host = target.host;
        match self.check {
            Check::System(which) => {
                let info = target.probe.system_info(target.endpoint).await?;
                Ok(match which {
                    SystemCheck::Inventory => check_inventory(host, info.gpu_count, &info.gpu_model),
                    SystemCheck::Driver => check_driver(host, &info.driver_version),
                    SystemCheck::Resources => check_resources(host, info.cpu_cores, info.ram_gb),
                })
            }
            Check::Gpu(spec) => {
                let report = target.probe.run_kernel(target.endpoint, spec).await?;
                let expected = host.gpu_count;
                Ok(if report.devices_total != expected {
                    CheckVerdict::Fail(format!(
                        "kernel ran on {} GPUs, listing has {}",
                        report.devices_total, expected
                    ))
                } else if report.devices_ok < report.devices_total {
                    CheckVerdict::Fail(format!(
                        "{} of {} GPUs failed the kernel",
                        report.devices_total - report.devices_ok,
                        report.devices_total
                    ))
                } else if report.max_abs_error.is_nan() || report.max_abs_error > spec.max_abs_error {
                    CheckVerdict::Fail(format!(
                        "max error {:.2e} above {:.0e}",
                        report.max_abs_error, spec.max_abs_error
                    ))
                } else {
                    CheckVerdict::Pass(format!(
                        "{}/{} GPUs ok, {}x{} in {} ms",
                        report.devices_ok,
                        report.devices_total,
                        spec.matrix_size,
                        spec.matrix_size,
                        report.elapsed_ms
                    ))
                })
            }
            Check::Stress(duration) => {
                let report = target.probe.stress(target.endpoint, duration).await?;
                let class = HardwareClass::of(host);
                Ok(match class.band().judge(&report, host.gpu_count) {
                    Ok(summary) => CheckVerdict::Pass(format!("{}: {}", class, summary)),
                    Err(reason) => CheckVerdict::Fail(format!("{}: {}", class, reason)),
                })
            }
        }
    }
}

fn normalize_model(model: &str) -> String {
    model
        .to_ascii_uppercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn check_inventory(host: &HostRecord, gpu_count: u32, gpu_model: &str) -> CheckVerdict {
    if gpu_count != host.gpu_count {
        return CheckVerdict::Fail(format!(
            "agent sees {} GPUs, listing has {}",
            gpu_count, host.gpu_count
        ));
    }
    let seen = normalize_model(gpu_model);
    let listed = normalize_model(&host.gpu_model);
    if !listed.is_empty() && !seen.contains(&listed) && !listed.contains(&seen) {
        return CheckVerdict::Fail(format!(
            "agent sees {}, listing has {}",
            gpu_model, host.gpu_model
        ));
    }
    CheckVerdict::Pass(format!("{}x {}", gpu_count, gpu_model))
}

fn check_driver(host: &HostRecord, reported: &str) -> CheckVerdict {
    match reported.parse::<DriverVersion>() {
        Ok(version) if version == host.driver_version => {
            CheckVerdict::Pass(format!("driver {}", version))
        }
        Ok(version) => CheckVerdict::Fail(format!(
            "driver {} installed, listing has {}",
            version, host.driver_version
        )),
        Err(e) => CheckVerdict::Fail(e.to_string()),
    }
}

fn check_resources(host: &HostRecord, cpu_cores: u32, ram_gb: f64) -> CheckVerdict {
    // containers see slightly less RAM than the host reports
    let ram_floor = host.cpu_ram_gb * 0.9;
    if cpu_cores < host.cpu_cores {
        CheckVerdict::Fail(format!(
            "{} CPU cores visible, listing has {}",
            cpu_cores, host.cpu_cores
        ))
    } else if ram_gb < ram_floor {
        CheckVerdict::Fail(format!(
            "{:.0} GB RAM visible, listing has {:.0} GB",
            ram_gb, host.cpu_ram_gb
        ))
    } else {
        CheckVerdict::Pass(format!("{} cores, {:.0} GB RAM", cpu_cores, ram_gb))
    }
}

/// Knobs for the standard suite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiagnosticSettings {
    /// Timeout for each non-stress case.
    pub case_timeout: Duration,
    /// How long the stress case sustains load.
    pub stress_duration: Duration,
    /// Kernel parameters for the GPU stage.
    pub kernel: KernelSpec,
}

impl Default for DiagnosticSettings {
    fn default() -> Self {
        Self {
            case_timeout: Duration::from_secs(120),
            stress_duration: Duration::from_secs(60),
            kernel: KernelSpec::default(),
        }
    }
}

/// Results of one suite run.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteRun {
    /// One result per case, in execution order.
    pub results: Vec<TestResult>,
    /// A stop request cut the run short.
    pub cancelled: bool,
}

/// Ordered set of test cases.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticSuite {
    cases: Vec<TestCase>,
}

impl DiagnosticSuite {
    /// Build a suite. Cases are ordered by stage, keeping the given order
    /// within a stage.
    pub fn new(mut cases: Vec<TestCase>) -> Self {
        cases.sort_by_key(TestCase::stage);
        Self { cases }
    }

    /// The default System, GPU and Stress cases.
    pub fn standard(settings: &DiagnosticSettings) -> Self {
        let t = settings.case_timeout;
        Self::new(vec![
            TestCase::new("system_info", Check::System(SystemCheck::Inventory))
                .aborts_on_failure()
                .with_timeout(t),
            TestCase::new("driver_version", Check::System(SystemCheck::Driver))
                .advisory()
                .with_timeout(t),
            TestCase::new("system_resources", Check::System(SystemCheck::Resources))
                .advisory()
                .with_timeout(t),
            TestCase::new("gpu_compute", Check::Gpu(settings.kernel))
                .aborts_on_failure()
                .with_timeout(t),
            TestCase::new("stress", Check::Stress(settings.stress_duration))
                .with_timeout(settings.stress_duration.saturating_add(t)),
        ])
    }

    /// Cases in run order.
    pub fn cases(&self) -> &[TestCase] {
        &self.cases
    }

    /// Run every case against a Ready instance.
    ///
    /// Moves the instance to Running, then to Completed (or Failed when a
    /// stop request cut the run short), so the same instance is never
    /// diagnosed twice.
    pub async fn run(
        &self,
        instance: &mut TestInstance,
        probe: &dyn InstanceProbe,
        host: &HostRecord,
        stop: &StopSignal,
    ) -> Result<SuiteRun, SuiteError> {
        if instance.state() != InstanceState::Ready {
            return Err(SuiteError::NotReady(instance.state()));
        }
        let endpoint = instance
            .endpoint
            .clone()
            .ok_or(SuiteError::NoEndpoint(instance.id))?;
        instance.apply(LifecycleEvent::DiagnosticsStarted);

        let target = CheckTarget {
            probe,
            endpoint: &endpoint,
            host,
        };
        let mut results = Vec::with_capacity(self.cases.len());
        let mut aborted_by: Option<&str> = None;
        let mut cancelled = false;

        for case in &self.cases {
            if !cancelled && stop.is_stopped() {
                cancelled = true;
            }
            if cancelled || aborted_by.is_some() {
                let message = match aborted_by {
                    Some(name) => format!("skipped: {} failed", name),
                    None => "skipped: cancelled".to_string(),
                };
                results.push(result_for(case, TestOutcome::Skipped, message, Duration::ZERO));
                continue;
            }

            let started = Instant::now();
            let (outcome, message) = match tokio::time::timeout(case.timeout, case.execute(target))
                .await
            {
                Ok(Ok(CheckVerdict::Pass(msg))) => (TestOutcome::Pass, msg),
                Ok(Ok(CheckVerdict::Fail(msg))) => (TestOutcome::Fail, msg),
                Ok(Err(e)) => (TestOutcome::Error, e.to_string()),
                Err(_) => (
                    TestOutcome::Error,
                    format!("timed out after {:?}", case.timeout),
                ),
            };

            tracing::info!(
                host_id = %host.id,
                instance_id = %instance.id,
                stage = %case.stage(),
                case = %case.name,
                %outcome,
                "{}",
                message
            );

            if outcome.is_failure() && case.hard_dependency {
                aborted_by = Some(case.name.as_str());
            }
            results.push(result_for(case, outcome, message, started.elapsed()));
        }

        instance.apply(if cancelled {
            LifecycleEvent::Aborted
        } else {
            LifecycleEvent::DiagnosticsFinished
        });
        Ok(SuiteRun { results, cancelled })
    }
}

fn result_for(case: &TestCase, outcome: TestOutcome, message: String, duration: Duration) -> TestResult {
    TestResult {
        name: case.name.clone(),
        stage: case.stage(),
        outcome,
        message,
        duration,
        hard_dependency: case.hard_dependency,
        mandatory: case.mandatory,
    }
}
