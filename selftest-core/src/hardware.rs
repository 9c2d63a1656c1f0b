//! Hardware classes and the stress tolerance band for each.
//!
//! Stress results are judged per class: a consumer card and an SXM
//! datacenter part are held to very different throughput floors.

use serde::{Deserialize, Serialize};
use selftest_types::{HostRecord, StressReport};
use std::fmt;

/// Coarse grouping of GPU models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HardwareClass {
    /// H100, H200, A100, B200, MI300, Tesla and similar.
    Datacenter,
    /// Professional workstation cards (RTX A-series, Ada, Quadro, L40).
    Workstation,
    /// GeForce and other consumer cards.
    Consumer,
    /// Anything not recognised.
    Unknown,
}

// Needles are matched against the upper-cased model name. Workstation is
// checked before consumer, so "RTX 4000 Ada" never reaches "RTX 40".
const DATACENTER: &[&str] = &[
    "H100", "H200", "H800", "A100", "A800", "B200", "GH200", "MI300", "MI250", "V100", "P100",
    "TESLA",
];
const WORKSTATION: &[&str] = &[
    "RTX A", " ADA", "QUADRO", "A6000", "A5000", "A4000", "L40", "L4", "RTX 8000", "RTX 6000",
    "RTX 5000", "RTX 4500", "RTX 4000", "A40", "A10",
];
const CONSUMER: &[&str] = &["RTX 50", "RTX 40", "RTX 30", "RTX 20", "GTX", "TITAN"];

impl HardwareClass {
    /// Classify a GPU model name.
    pub fn from_model(model: &str) -> Self {
        let model = model.to_ascii_uppercase();
        let has = |list: &[&str]| list.iter().any(|needle| model.contains(needle));

        if has(DATACENTER) {
            Self::Datacenter
        } else if has(WORKSTATION) {
            Self::Workstation
        } else if has(CONSUMER) {
            Self::Consumer
        } else {
            Self::Unknown
        }
    }

    /// Classify the host's declared GPU model.
    pub fn of(host: &HostRecord) -> Self {
        Self::from_model(&host.gpu_model)
    }

    /// Tolerance band for this class.
    pub fn band(self) -> ToleranceBand {
        match self {
            Self::Datacenter => ToleranceBand::new(150.0, 1e-6),
            Self::Workstation => ToleranceBand::new(60.0, 1e-5),
            Self::Consumer => ToleranceBand::new(40.0, 1e-4),
            Self::Unknown => ToleranceBand::new(5.0, 1e-3),
        }
    }
}

impl fmt::Display for HardwareClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Datacenter => "datacenter",
            Self::Workstation => "workstation",
            Self::Consumer => "consumer",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Acceptable stress results for one hardware class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceBand {
    /// Minimum sustained throughput per GPU in TFLOPS.
    pub min_tflops_per_gpu: f64,
    /// Maximum tolerated error rate.
    pub max_error_rate: f64,
}

impl ToleranceBand {
    /// Create a band.
    pub const fn new(min_tflops_per_gpu: f64, max_error_rate: f64) -> Self {
        Self {
            min_tflops_per_gpu,
            max_error_rate,
        }
    }

    /// Judge a stress measurement taken across `gpu_count` GPUs.
    ///
    /// `Ok` carries a summary line, `Err` the reason it is out of band.
    pub fn judge(&self, report: &StressReport, gpu_count: u32) -> Result<String, String> {
        let floor = self.min_tflops_per_gpu * f64::from(gpu_count.max(1));
        let summary = format!(
            "{:.1} TFLOPS (floor {:.1}), error rate {:.2e} (max {:.0e})",
            report.throughput_tflops, floor, report.error_rate, self.max_error_rate
        );

        if !report.error_rate.is_finite() || report.error_rate > self.max_error_rate {
            return Err(format!("error rate out of band: {}", summary));
        }
        if !report.throughput_tflops.is_finite() || report.throughput_tflops < floor {
            return Err(format!("throughput below band: {}", summary));
        }
        Ok(summary)
    }
}
