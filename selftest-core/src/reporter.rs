//! Human-readable rendering of reports.

use std::fmt::Write;

use crate::report::{FleetRun, SelfTestReport, TeardownOutcome, TestStage};
use crate::requirements::Severity;

/// Render one host's report.
pub fn summarize(report: &SelfTestReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Host {}", report.host_id);
    if let Some(class) = report.hardware_class {
        let _ = writeln!(out, "  Hardware class: {}", class);
    }

    if report.requirements.failures.is_empty() {
        let _ = writeln!(out, "  Requirements: all met");
    } else {
        let suffix = if report.requirements_overridden {
            " (overridden)"
        } else {
            ""
        };
        let _ = writeln!(out, "  Requirements{}:", suffix);
        for failure in &report.requirements.failures {
            let tag = match failure.severity {
                Severity::Blocking => "x",
                Severity::Advisory => "!",
            };
            let _ = writeln!(out, "    [{}] {}", tag, failure);
        }
    }

    let mut stage: Option<TestStage> = None;
    for result in &report.results {
        if stage != Some(result.stage) {
            stage = Some(result.stage);
            let _ = writeln!(out, "  {} tests:", result.stage);
        }
        let _ = write!(
            out,
            "    {:<5} {} ({} ms)",
            result.outcome.to_string(),
            result.name,
            result.duration.as_millis()
        );
        if !result.message.is_empty() {
            let _ = write!(out, ": {}", result.message);
        }
        out.push('\n');
    }

    if let Some(failure) = &report.failure {
        let _ = writeln!(out, "  Stopped: {}", failure);
    }

    match &report.teardown {
        TeardownOutcome::NotProvisioned => {}
        TeardownOutcome::Destroyed {
            instance_id,
            attempts,
        } => {
            let _ = writeln!(
                out,
                "  Teardown: instance {} destroyed ({} attempt{})",
                instance_id,
                attempts,
                if *attempts == 1 { "" } else { "s" }
            );
        }
        TeardownOutcome::Leaked {
            instance_id,
            attempts,
            error,
        } => {
            let _ = writeln!(
                out,
                "  WARNING: instance {} may still be running after {} destroy attempts: {}",
                instance_id, attempts, error
            );
        }
    }

    match report.reason() {
        Some(reason) => {
            let _ = writeln!(out, "  Result: {} ({})", report.verdict, reason);
        }
        None => {
            let _ = writeln!(out, "  Result: {}", report.verdict);
        }
    }
    out
}

/// Render aggregate counts for a fleet run.
pub fn summarize_fleet(run: &FleetRun) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Fleet self-test: {} selected, {} passed, {} failed (seed {})",
        run.selected.len(),
        run.passed.len(),
        run.failed.len(),
        run.seed
    );

    for id in &run.failed {
        let reason = run
            .reports
            .get(id)
            .and_then(SelfTestReport::reason)
            .unwrap_or_else(|| "no report".to_string());
        let _ = writeln!(out, "  FAIL {}: {}", id, reason);
    }

    let leaked = run.leaked();
    if !leaked.is_empty() {
        let _ = writeln!(out, "  {} teardown warning(s):", leaked.len());
        for (host, instance) in leaked {
            let _ = writeln!(out, "    host {} left instance {}", host, instance);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::HardwareClass;
    use crate::report::{PipelineFailure, TestOutcome, TestResult};
    use crate::requirements::{RequirementCheckResult, RequirementFailure};
    use selftest_types::{HostId, InstanceId};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn passing_report() -> SelfTestReport {
        let mut report =
            SelfTestReport::new(HostId::new(54321), RequirementCheckResult::all_met(), false);
        report.hardware_class = Some(HardwareClass::Consumer);
        report.results.push(TestResult {
            name: "system_info".into(),
            stage: TestStage::System,
            outcome: TestOutcome::Pass,
            message: "4x RTX 4090".into(),
            duration: Duration::from_millis(12),
            hard_dependency: true,
            mandatory: true,
        });
        report.teardown = TeardownOutcome::Destroyed {
            instance_id: InstanceId::new(900),
            attempts: 1,
        };
        report.finalize()
    }

    #[test]
    fn passing_host_shows_pass() {
        let text = summarize(&passing_report());
        assert!(text.starts_with("Host 54321\n"));
        assert!(text.contains("System tests:"));
        assert!(text.contains("PASS  system_info (12 ms): 4x RTX 4090"));
        assert!(text.contains("instance 900 destroyed (1 attempt)"));
        assert!(text.trim_end().ends_with("Result: PASS"));
    }

    #[test]
    fn requirement_failure_is_listed() {
        let requirements = RequirementCheckResult {
            met: false,
            failures: vec![RequirementFailure {
                name: "min_driver_version".into(),
                severity: Severity::Blocking,
                actual: "470.82.01".into(),
                expected: ">= 535.54.03".into(),
            }],
        };
        let report = SelfTestReport::new(HostId::new(54321), requirements, false).finalize();
        let text = summarize(&report);

        assert!(text.contains("[x] min_driver_version: 470.82.01 (expected >= 535.54.03)"));
        assert!(text.contains("Result: FAIL (RequirementFailure: min_driver_version)"));
        assert!(!text.contains("Teardown"));
    }

    #[test]
    fn leak_is_shown_as_warning() {
        let mut report = passing_report();
        report.teardown = TeardownOutcome::Leaked {
            instance_id: InstanceId::new(900),
            attempts: 10,
            error: "503".into(),
        };
        let text = summarize(&report);
        assert!(text.contains("WARNING: instance 900 may still be running"));
        assert!(text.contains("Result: PASS"));
    }

    #[test]
    fn fleet_summary_counts() {
        let mut reports = BTreeMap::new();
        reports.insert(HostId::new(54321), passing_report());
        reports.insert(
            HostId::new(2),
            SelfTestReport::failed(
                HostId::new(2),
                PipelineFailure::ProvisionTimeout("not running after 900s".into()),
            ),
        );
        let run = FleetRun::from_reports(vec![HostId::new(2), HostId::new(54321)], 42, reports);
        let text = summarize_fleet(&run);

        assert!(text.contains("2 selected, 1 passed, 1 failed (seed 42)"));
        assert!(text.contains("FAIL 2: ProvisionTimeout: not running after 900s"));
        assert!(!text.contains("teardown warning"));
    }
}
