//! Per-host self-test reports and the fleet-level aggregate.

use serde::{Deserialize, Serialize};
use selftest_types::{HostId, InstanceId};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::hardware::HardwareClass;
use crate::requirements::RequirementCheckResult;

/// Diagnostic stage. Suites always run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TestStage {
    /// Inventory and driver checks.
    System,
    /// GPU compute kernel.
    Gpu,
    /// Sustained load.
    Stress,
}

impl fmt::Display for TestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::System => "System",
            Self::Gpu => "GPU",
            Self::Stress => "Stress",
        };
        f.write_str(name)
    }
}

/// Outcome of one test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOutcome {
    /// Check ran and passed.
    Pass,
    /// Check ran and the host failed it.
    Fail,
    /// Check never ran.
    Skipped,
    /// Check could not be executed (agent error, timeout).
    Error,
}

impl TestOutcome {
    /// Fail or Error.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Skipped => "SKIP",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Result of one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Test case name.
    pub name: String,
    /// Stage the case belongs to.
    pub stage: TestStage,
    /// What happened.
    pub outcome: TestOutcome,
    /// Detail for the report.
    pub message: String,
    /// Wall time spent on the case.
    #[serde(with = "crate::retry::millis")]
    pub duration: Duration,
    /// Failure aborts the rest of the suite.
    pub hard_dependency: bool,
    /// Failure fails the verdict.
    pub mandatory: bool,
}

impl TestResult {
    /// Whether this result makes the host fail.
    pub fn fails_verdict(&self) -> bool {
        self.outcome.is_failure() && (self.mandatory || self.hard_dependency)
    }
}

/// Overall verdict for a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    /// Host passed.
    Pass,
    /// Host failed.
    Fail,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => f.write_str("PASS"),
            Self::Fail => f.write_str("FAIL"),
        }
    }
}

/// Why a host's pipeline stopped before producing a full diagnostic run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum PipelineFailure {
    /// Blocking requirements unmet and not overridden.
    RequirementFailure(String),
    /// Host metadata could not be fetched.
    MetadataUnavailable(String),
    /// Instance did not become ready in time.
    ProvisionTimeout(String),
    /// Platform refused the instance or it broke while starting.
    ProvisionRejected(String),
    /// Diagnostic suite could not run at all.
    TestExecutionError(String),
    /// Stop signal received.
    Cancelled(String),
    /// Unexpected error or panic inside the pipeline.
    Internal(String),
}

impl PipelineFailure {
    /// Short machine-friendly name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequirementFailure(_) => "RequirementFailure",
            Self::MetadataUnavailable(_) => "MetadataUnavailable",
            Self::ProvisionTimeout(_) => "ProvisionTimeout",
            Self::ProvisionRejected(_) => "ProvisionRejected",
            Self::TestExecutionError(_) => "TestExecutionError",
            Self::Cancelled(_) => "Cancelled",
            Self::Internal(_) => "Internal",
        }
    }

    /// Human-readable detail.
    pub fn detail(&self) -> &str {
        match self {
            Self::RequirementFailure(d)
            | Self::MetadataUnavailable(d)
            | Self::ProvisionTimeout(d)
            | Self::ProvisionRejected(d)
            | Self::TestExecutionError(d)
            | Self::Cancelled(d)
            | Self::Internal(d) => d,
        }
    }
}

impl fmt::Display for PipelineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.detail())
    }
}

/// What happened to the test instance at the end of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum TeardownOutcome {
    /// No instance was ever created.
    NotProvisioned,
    /// Instance destroyed.
    Destroyed {
        /// Instance that was destroyed.
        instance_id: InstanceId,
        /// Destroy calls it took.
        attempts: u32,
    },
    /// Destroy never succeeded; the instance may still be billing.
    Leaked {
        /// Instance that may still exist.
        instance_id: InstanceId,
        /// Destroy calls made.
        attempts: u32,
        /// Last destroy error.
        error: String,
    },
}

impl TeardownOutcome {
    /// True when an instance may have been left behind.
    pub fn is_leak(&self) -> bool {
        matches!(self, Self::Leaked { .. })
    }
}

/// Everything known about one host's self-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelfTestReport {
    /// Host under test.
    pub host_id: HostId,
    /// Requirement evaluation, always carried.
    pub requirements: RequirementCheckResult,
    /// Requirements were evaluated but not allowed to gate testing.
    pub requirements_overridden: bool,
    /// Declared hardware class, when metadata was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware_class: Option<HardwareClass>,
    /// Test results in execution order.
    pub results: Vec<TestResult>,
    /// Why the pipeline stopped early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PipelineFailure>,
    /// Fate of the test instance.
    pub teardown: TeardownOutcome,
    /// Overall verdict.
    pub verdict: Verdict,
}

impl SelfTestReport {
    /// Start a report for a host. Verdict is Fail until [`finalize`](Self::finalize).
    pub fn new(host_id: HostId, requirements: RequirementCheckResult, overridden: bool) -> Self {
        Self {
            host_id,
            requirements,
            requirements_overridden: overridden,
            hardware_class: None,
            results: Vec::new(),
            failure: None,
            teardown: TeardownOutcome::NotProvisioned,
            verdict: Verdict::Fail,
        }
    }

    /// Report for a host whose pipeline failed before requirements ran.
    pub fn failed(host_id: HostId, failure: PipelineFailure) -> Self {
        let mut report = Self::new(host_id, RequirementCheckResult::all_met(), false);
        report.failure = Some(failure);
        report.finalize()
    }

    /// Compute the verdict from everything recorded.
    pub fn finalize(mut self) -> Self {
        let requirements_fail = !self.requirements_overridden && !self.requirements.met;
        let tests_fail = self.results.iter().any(TestResult::fails_verdict);
        let nothing_ran = self.results.is_empty();

        self.verdict =
            if self.failure.is_some() || requirements_fail || tests_fail || nothing_ran {
                Verdict::Fail
            } else {
                Verdict::Pass
            };
        self
    }

    /// True when the verdict is Pass.
    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }

    /// One-line reason for a Fail verdict.
    pub fn reason(&self) -> Option<String> {
        if self.passed() {
            return None;
        }
        if let Some(failure) = &self.failure {
            return Some(failure.to_string());
        }
        if !self.requirements_overridden && !self.requirements.met {
            let names: Vec<&str> = self
                .requirements
                .blocking_failures()
                .map(|f| f.name.as_str())
                .collect();
            return Some(format!("RequirementFailure: {}", names.join(", ")));
        }
        self.results
            .iter()
            .find(|r| r.fails_verdict())
            .map(|r| format!("{} {}: {}", r.stage, r.name, r.message))
            .or_else(|| Some("no diagnostics ran".to_string()))
    }
}

/// Outcome of a fleet-wide self-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetRun {
    /// Hosts chosen for testing, in selection order.
    pub selected: Vec<HostId>,
    /// Seed used for sampling.
    pub seed: u64,
    /// Report per selected host.
    pub reports: BTreeMap<HostId, SelfTestReport>,
    /// Hosts that passed.
    pub passed: BTreeSet<HostId>,
    /// Hosts that failed.
    pub failed: BTreeSet<HostId>,
}

impl FleetRun {
    /// Partition the selected hosts by their reports.
    ///
    /// A selected host with no report lands in `failed`. Reports for
    /// hosts that were not selected are dropped.
    pub fn from_reports(
        selected: Vec<HostId>,
        seed: u64,
        mut reports: BTreeMap<HostId, SelfTestReport>,
    ) -> Self {
        reports.retain(|id, _| selected.contains(id));

        let mut passed = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for id in &selected {
            match reports.get(id) {
                Some(report) if report.passed() => passed.insert(*id),
                _ => failed.insert(*id),
            };
        }

        Self {
            selected,
            seed,
            reports,
            passed,
            failed,
        }
    }

    /// Hosts whose test instance may have leaked.
    pub fn leaked(&self) -> Vec<(HostId, InstanceId)> {
        self.reports
            .values()
            .filter_map(|r| match r.teardown {
                TeardownOutcome::Leaked { instance_id, .. } => Some((r.host_id, instance_id)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::{RequirementFailure, Severity};

    fn result(name: &str, stage: TestStage, outcome: TestOutcome, mandatory: bool) -> TestResult {
        TestResult {
            name: name.into(),
            stage,
            outcome,
            message: String::new(),
            duration: Duration::from_millis(5),
            hard_dependency: false,
            mandatory,
        }
    }

    fn unmet() -> RequirementCheckResult {
        RequirementCheckResult {
            met: false,
            failures: vec![RequirementFailure {
                name: "min_driver_version".into(),
                severity: Severity::Blocking,
                actual: "470".into(),
                expected: ">= 535".into(),
            }],
        }
    }

    #[test]
    fn all_passing_results_pass() {
        let mut report = SelfTestReport::new(HostId::new(1), RequirementCheckResult::all_met(), false);
        report.results.push(result("system_info", TestStage::System, TestOutcome::Pass, true));
        let report = report.finalize();
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(report.reason().is_none());
    }

    #[test]
    fn no_results_means_fail() {
        let report =
            SelfTestReport::new(HostId::new(1), RequirementCheckResult::all_met(), false).finalize();
        assert_eq!(report.verdict, Verdict::Fail);
    }

    #[test]
    fn unmet_requirements_fail_unless_overridden() {
        let report = SelfTestReport::new(HostId::new(1), unmet(), false).finalize();
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(
            report.reason().unwrap(),
            "RequirementFailure: min_driver_version"
        );

        let mut overridden = SelfTestReport::new(HostId::new(1), unmet(), true);
        overridden
            .results
            .push(result("gpu_compute", TestStage::Gpu, TestOutcome::Pass, true));
        let overridden = overridden.finalize();
        assert_eq!(overridden.verdict, Verdict::Pass);
        assert_eq!(overridden.requirements.failures.len(), 1);
    }

    #[test]
    fn advisory_test_failure_does_not_fail() {
        let mut report = SelfTestReport::new(HostId::new(1), RequirementCheckResult::all_met(), false);
        report.results.push(result("system_info", TestStage::System, TestOutcome::Pass, true));
        report.results.push(result("driver_match", TestStage::System, TestOutcome::Fail, false));
        assert_eq!(report.finalize().verdict, Verdict::Pass);
    }

    #[test]
    fn mandatory_error_fails() {
        let mut report = SelfTestReport::new(HostId::new(1), RequirementCheckResult::all_met(), false);
        report.results.push(result("stress", TestStage::Stress, TestOutcome::Error, true));
        let report = report.finalize();
        assert_eq!(report.verdict, Verdict::Fail);
        assert!(report.reason().unwrap().starts_with("Stress stress"));
    }

    #[test]
    fn pipeline_failure_reason_names_the_class() {
        let report = SelfTestReport::failed(
            HostId::new(2),
            PipelineFailure::ProvisionTimeout("not running after 900s".into()),
        );
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(
            report.reason().unwrap(),
            "ProvisionTimeout: not running after 900s"
        );
    }

    #[test]
    fn fleet_partition_covers_selection() {
        let pass_report = |id| {
            let mut r = SelfTestReport::new(HostId::new(id), RequirementCheckResult::all_met(), false);
            r.results.push(result("x", TestStage::System, TestOutcome::Pass, true));
            r.finalize()
        };
        let mut reports = BTreeMap::new();
        reports.insert(HostId::new(1), pass_report(1));
        reports.insert(
            HostId::new(2),
            SelfTestReport::failed(HostId::new(2), PipelineFailure::ProvisionTimeout("t".into())),
        );
        reports.insert(HostId::new(9), pass_report(9));

        let selected = vec![HostId::new(1), HostId::new(2), HostId::new(3)];
        let run = FleetRun::from_reports(selected, 0, reports);

        assert_eq!(run.passed, BTreeSet::from([HostId::new(1)]));
        assert_eq!(run.failed, BTreeSet::from([HostId::new(2), HostId::new(3)]));
        assert!(!run.reports.contains_key(&HostId::new(9)));
    }

    #[test]
    fn leaked_instances_are_listed() {
        let mut report = SelfTestReport::failed(HostId::new(4), PipelineFailure::Internal("x".into()));
        report.teardown = TeardownOutcome::Leaked {
            instance_id: InstanceId::new(77),
            attempts: 10,
            error: "503".into(),
        };
        let mut reports = BTreeMap::new();
        reports.insert(HostId::new(4), report);
        let run = FleetRun::from_reports(vec![HostId::new(4)], 0, reports);
        assert_eq!(run.leaked(), vec![(HostId::new(4), InstanceId::new(77))]);
    }

    #[test]
    fn report_serializes_failure_kind() {
        let report = SelfTestReport::failed(
            HostId::new(2),
            PipelineFailure::ProvisionTimeout("late".into()),
        );
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains(r#""kind":"ProvisionTimeout""#));
        assert!(json.contains(r#""verdict":"Fail""#));
    }
}
