//! Minimum requirement checks over host capability metadata.
//!
//! Evaluation is pure: the same host and requirement list always produce
//! the same [`RequirementCheckResult`], with failures in list order.

use serde::{Deserialize, Serialize};
use selftest_types::{DriverVersion, HostRecord};
use std::fmt;
use std::sync::Arc;

/// Whether a failed requirement blocks testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Failure blocks provisioning and fails the verdict.
    Blocking,
    /// Failure is reported but changes nothing.
    Advisory,
}

/// What a predicate saw on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Whether the host satisfies the requirement.
    pub satisfied: bool,
    /// The host's actual value, formatted for the report.
    pub actual: String,
}

impl Observation {
    fn new(satisfied: bool, actual: impl fmt::Display) -> Self {
        Self {
            satisfied,
            actual: actual.to_string(),
        }
    }
}

type Predicate = dyn Fn(&HostRecord) -> Observation + Send + Sync;

/// A named precondition over [`HostRecord`] fields.
#[derive(Clone)]
pub struct Requirement {
    name: String,
    severity: Severity,
    expected: String,
    predicate: Arc<Predicate>,
}

impl Requirement {
    /// Create a requirement.
    ///
    /// `expected` is the human-readable constraint shown when it fails.
    pub fn new<F>(
        name: impl Into<String>,
        severity: Severity,
        expected: impl Into<String>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&HostRecord) -> Observation + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            severity,
            expected: expected.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Requirement name, e.g. `min_driver_version`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Severity of a failure.
    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The constraint, e.g. `>= 11.8`.
    pub fn expected(&self) -> &str {
        &self.expected
    }

    /// Run the predicate against a host.
    pub fn check(&self, host: &HostRecord) -> Observation {
        (self.predicate)(host)
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Requirement")
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("expected", &self.expected)
            .finish_non_exhaustive()
    }
}

/// One unmet requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementFailure {
    /// Requirement name.
    pub name: String,
    /// Severity of the requirement.
    pub severity: Severity,
    /// The host's actual value.
    pub actual: String,
    /// The constraint that was not met.
    pub expected: String,
}

impl fmt::Display for RequirementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (expected {})",
            self.name, self.actual, self.expected
        )
    }
}

/// Outcome of evaluating all requirements for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementCheckResult {
    /// No blocking requirement failed.
    pub met: bool,
    /// Every failed requirement, in evaluation order.
    pub failures: Vec<RequirementFailure>,
}

impl RequirementCheckResult {
    /// Result for a host that passed everything.
    pub fn all_met() -> Self {
        Self {
            met: true,
            failures: Vec::new(),
        }
    }

    /// Failures that block testing.
    pub fn blocking_failures(&self) -> impl Iterator<Item = &RequirementFailure> {
        self.failures
            .iter()
            .filter(|f| f.severity == Severity::Blocking)
    }
}

/// Check `host` against every requirement in order.
pub fn evaluate(host: &HostRecord, requirements: &[Requirement]) -> RequirementCheckResult {
    let failures: Vec<RequirementFailure> = requirements
        .iter()
        .filter_map(|req| {
            let seen = req.check(host);
            (!seen.satisfied).then(|| RequirementFailure {
                name: req.name().to_string(),
                severity: req.severity(),
                actual: seen.actual,
                expected: req.expected().to_string(),
            })
        })
        .collect();

    let met = !failures.iter().any(|f| f.severity == Severity::Blocking);
    RequirementCheckResult { met, failures }
}

/// Thresholds behind the default requirement set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequirementThresholds {
    /// Minimum CUDA version the driver must support (inclusive).
    #[serde(default = "default_min_cuda")]
    pub min_cuda: f64,
    /// Reliability must be strictly above this.
    #[serde(default = "default_min_reliability")]
    pub min_reliability: f64,
    /// Direct port count must be strictly above this.
    #[serde(default = "default_min_direct_ports")]
    pub min_direct_ports: u32,
    /// PCIe bandwidth must be strictly above this (GB/s).
    #[serde(default = "default_min_pcie_bw")]
    pub min_pcie_bw_gbps: f64,
    /// Minimum download speed in Mb/s (inclusive).
    #[serde(default = "default_min_inet")]
    pub min_inet_down_mbps: f64,
    /// Minimum upload speed in Mb/s (inclusive).
    #[serde(default = "default_min_inet")]
    pub min_inet_up_mbps: f64,
    /// Per-GPU memory must be strictly above this (GB).
    #[serde(default = "default_min_gpu_ram")]
    pub min_gpu_ram_gb: f64,
    /// Minimum CPU cores per GPU (inclusive).
    #[serde(default = "default_min_cores_per_gpu")]
    pub min_cores_per_gpu: u32,
    /// Minimum installed driver version (inclusive).
    #[serde(default = "default_min_driver_version")]
    pub min_driver_version: DriverVersion,
    /// Disk needed for the test image (GB, inclusive, advisory).
    #[serde(default = "default_min_disk")]
    pub min_disk_gb: f64,
}

fn default_min_cuda() -> f64 {
    11.8
}

fn default_min_reliability() -> f64 {
    0.90
}

fn default_min_direct_ports() -> u32 {
    3
}

fn default_min_pcie_bw() -> f64 {
    2.85
}

fn default_min_inet() -> f64 {
    500.0
}

fn default_min_gpu_ram() -> f64 {
    7.0
}

fn default_min_cores_per_gpu() -> u32 {
    2
}

fn default_min_driver_version() -> DriverVersion {
    DriverVersion::try_from("535.54.03".to_string()).unwrap_or_default()
}

fn default_min_disk() -> f64 {
    40.0
}

impl Default for RequirementThresholds {
    fn default() -> Self {
        Self {
            min_cuda: default_min_cuda(),
            min_reliability: default_min_reliability(),
            min_direct_ports: default_min_direct_ports(),
            min_pcie_bw_gbps: default_min_pcie_bw(),
            min_inet_down_mbps: default_min_inet(),
            min_inet_up_mbps: default_min_inet(),
            min_gpu_ram_gb: default_min_gpu_ram(),
            min_cores_per_gpu: default_min_cores_per_gpu(),
            min_driver_version: default_min_driver_version(),
            min_disk_gb: default_min_disk(),
        }
    }
}

impl RequirementThresholds {
    /// Build the standard requirement list from these thresholds.
    pub fn requirements(&self) -> Vec<Requirement> {
        let t = self.clone();
        let min_driver = t.min_driver_version.clone();
        let cores_per_gpu = t.min_cores_per_gpu;

        vec![
            Requirement::new(
                "min_cuda_version",
                Severity::Blocking,
                format!(">= {}", t.min_cuda),
                move |h| Observation::new(h.cuda_max_good >= t.min_cuda, h.cuda_max_good),
            ),
            Requirement::new(
                "min_reliability",
                Severity::Blocking,
                format!("> {:.2}", t.min_reliability),
                move |h| {
                    Observation::new(
                        h.reliability > t.min_reliability,
                        format!("{:.3}", h.reliability),
                    )
                },
            ),
            Requirement::new(
                "min_direct_ports",
                Severity::Blocking,
                format!("> {}", t.min_direct_ports),
                move |h| {
                    Observation::new(h.direct_port_count > t.min_direct_ports, h.direct_port_count)
                },
            ),
            Requirement::new(
                "min_pcie_bandwidth",
                Severity::Blocking,
                format!("> {} GB/s", t.min_pcie_bw_gbps),
                move |h| {
                    Observation::new(
                        h.pcie_bw_gbps > t.min_pcie_bw_gbps,
                        format!("{} GB/s", h.pcie_bw_gbps),
                    )
                },
            ),
            Requirement::new(
                "min_download_speed",
                Severity::Blocking,
                format!(">= {} Mb/s", t.min_inet_down_mbps),
                move |h| {
                    Observation::new(
                        h.inet_down_mbps >= t.min_inet_down_mbps,
                        format!("{} Mb/s", h.inet_down_mbps),
                    )
                },
            ),
            Requirement::new(
                "min_upload_speed",
                Severity::Blocking,
                format!(">= {} Mb/s", t.min_inet_up_mbps),
                move |h| {
                    Observation::new(
                        h.inet_up_mbps >= t.min_inet_up_mbps,
                        format!("{} Mb/s", h.inet_up_mbps),
                    )
                },
            ),
            Requirement::new(
                "min_gpu_ram",
                Severity::Blocking,
                format!("> {} GB", t.min_gpu_ram_gb),
                move |h| {
                    Observation::new(
                        h.gpu_ram_gb > t.min_gpu_ram_gb,
                        format!("{} GB", h.gpu_ram_gb),
                    )
                },
            ),
            Requirement::new(
                "system_ram_vs_vram",
                Severity::Blocking,
                "system RAM >= total GPU RAM",
                |h| {
                    Observation::new(
                        h.cpu_ram_gb >= h.total_gpu_ram_gb(),
                        format!("{} GB RAM vs {} GB VRAM", h.cpu_ram_gb, h.total_gpu_ram_gb()),
                    )
                },
            ),
            Requirement::new(
                "cpu_cores_per_gpu",
                Severity::Blocking,
                format!(">= {} cores per GPU", cores_per_gpu),
                move |h| {
                    Observation::new(
                        h.cpu_cores >= cores_per_gpu.saturating_mul(h.gpu_count),
                        format!("{} cores for {} GPUs", h.cpu_cores, h.gpu_count),
                    )
                },
            ),
            Requirement::new(
                "min_driver_version",
                Severity::Blocking,
                format!(">= {}", min_driver),
                move |h| Observation::new(h.driver_version >= min_driver, &h.driver_version),
            ),
            Requirement::new(
                "min_disk_space",
                Severity::Advisory,
                format!(">= {} GB", t.min_disk_gb),
                move |h| Observation::new(h.disk_gb >= t.min_disk_gb, format!("{} GB", h.disk_gb)),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selftest_types::{HostId, HostStatus};

    fn good_host() -> HostRecord {
        HostRecord {
            id: HostId::new(54321),
            gpu_count: 4,
            gpu_model: "RTX 4090".into(),
            gpu_ram_gb: 24.0,
            cpu_ram_gb: 256.0,
            cpu_cores: 32,
            disk_gb: 500.0,
            inet_down_mbps: 1000.0,
            inet_up_mbps: 800.0,
            pcie_bw_gbps: 12.5,
            reliability: 0.99,
            direct_port_count: 100,
            cuda_max_good: 12.4,
            driver_version: "550.54.14".parse().unwrap(),
            status: HostStatus::Listed,
        }
    }

    fn defaults() -> Vec<Requirement> {
        RequirementThresholds::default().requirements()
    }

    #[test]
    fn good_host_meets_everything() {
        let result = evaluate(&good_host(), &defaults());
        assert!(result.met);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn old_driver_fails_min_driver_version() {
        let host = HostRecord {
            driver_version: "470.82.01".parse().unwrap(),
            ..good_host()
        };
        let result = evaluate(&host, &defaults());

        assert!(!result.met);
        assert_eq!(result.failures.len(), 1);
        let failure = &result.failures[0];
        assert_eq!(failure.name, "min_driver_version");
        assert_eq!(failure.actual, "470.82.01");
        assert_eq!(failure.expected, ">= 535.54.03");
    }

    #[test]
    fn advisory_failure_does_not_block() {
        let host = HostRecord {
            disk_gb: 20.0,
            ..good_host()
        };
        let result = evaluate(&host, &defaults());

        assert!(result.met);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].severity, Severity::Advisory);
        assert_eq!(result.blocking_failures().count(), 0);
    }

    #[test]
    fn failures_are_reported_in_requirement_order() {
        let host = HostRecord {
            cuda_max_good: 11.2,
            inet_up_mbps: 100.0,
            cpu_cores: 4,
            ..good_host()
        };
        let result = evaluate(&host, &defaults());
        let names: Vec<&str> = result.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["min_cuda_version", "min_upload_speed", "cpu_cores_per_gpu"]
        );
    }

    #[test]
    fn boundary_values_follow_strictness() {
        // reliability must be strictly above 0.90, CUDA inclusive at 11.8
        let host = HostRecord {
            reliability: 0.90,
            cuda_max_good: 11.8,
            ..good_host()
        };
        let result = evaluate(&host, &defaults());
        let names: Vec<&str> = result.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["min_reliability"]);
    }

    #[test]
    fn system_ram_must_cover_vram() {
        let host = HostRecord {
            gpu_count: 8,
            gpu_ram_gb: 80.0,
            cpu_ram_gb: 512.0,
            cpu_cores: 64,
            ..good_host()
        };
        let result = evaluate(&host, &defaults());
        assert_eq!(result.failures[0].name, "system_ram_vs_vram");
    }

    #[test]
    fn evaluation_is_deterministic() {
        let host = HostRecord {
            reliability: 0.5,
            ..good_host()
        };
        let reqs = defaults();
        assert_eq!(evaluate(&host, &reqs), evaluate(&host, &reqs));
    }

    #[test]
    fn custom_requirement_works() {
        let req = Requirement::new("four_gpus", Severity::Blocking, "== 4", |h| Observation {
            satisfied: h.gpu_count == 4,
            actual: h.gpu_count.to_string(),
        });
        assert!(evaluate(&good_host(), &[req.clone()]).met);

        let host = HostRecord {
            gpu_count: 2,
            ..good_host()
        };
        let result = evaluate(&host, &[req]);
        assert_eq!(result.failures[0].to_string(), "four_gpus: 2 (expected == 4)");
    }

    #[test]
    fn thresholds_deserialize_with_defaults() {
        let t: RequirementThresholds =
            serde_json::from_str(r#"{"min_driver_version": "550.0"}"#).unwrap();
        assert_eq!(t.min_cuda, 11.8);
        assert_eq!(t.min_driver_version.to_string(), "550.0");
    }
}
