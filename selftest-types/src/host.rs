//! Host capability metadata as published by the marketplace.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{HostId, ParseError};

/// Marketplace listing status of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Listed and rentable.
    Listed,
    /// Registered but not offered.
    Unlisted,
    /// Currently rented by a customer.
    Rented,
    /// Host daemon is not reporting.
    Offline,
    /// Status not reported or not recognised.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Static capability metadata of one host.
///
/// Read-only input to the self-test pipeline. Missing fields default to
/// zero so that an incomplete listing fails requirements rather than
/// failing to parse.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostRecord {
    /// Host identifier.
    pub id: HostId,
    /// Number of GPUs installed.
    pub gpu_count: u32,
    /// GPU model name, e.g. "RTX 4090" or "H100 SXM".
    pub gpu_model: String,
    /// Memory per GPU in GB.
    pub gpu_ram_gb: f64,
    /// System RAM in GB.
    pub cpu_ram_gb: f64,
    /// Physical CPU cores available to rentals.
    pub cpu_cores: u32,
    /// Disk space available to rentals in GB.
    pub disk_gb: f64,
    /// Download bandwidth in Mb/s.
    pub inet_down_mbps: f64,
    /// Upload bandwidth in Mb/s.
    pub inet_up_mbps: f64,
    /// Host to GPU PCIe bandwidth in GB/s.
    pub pcie_bw_gbps: f64,
    /// Platform reliability score in [0, 1].
    pub reliability: f64,
    /// Number of directly mapped ports.
    pub direct_port_count: u32,
    /// Highest CUDA version the driver supports.
    pub cuda_max_good: f64,
    /// Installed GPU driver version.
    pub driver_version: DriverVersion,
    /// Current marketplace status.
    pub status: HostStatus,
}

impl HostRecord {
    /// Total GPU memory across all devices in GB.
    pub fn total_gpu_ram_gb(&self) -> f64 {
        self.gpu_ram_gb * f64::from(self.gpu_count)
    }
}

/// A dotted GPU driver version such as `535.104.05`.
///
/// Ordering compares numeric components left to right, treating missing
/// trailing components as zero, so `550` == `550.0` < `550.54.14`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DriverVersion {
    raw: String,
    parts: Vec<u32>,
}

impl DriverVersion {
    /// Numeric components of the version.
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }

    /// The version as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for DriverVersion {
    fn default() -> Self {
        Self {
            raw: "0".to_string(),
            parts: vec![0],
        }
    }
}

impl FromStr for DriverVersion {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseError::InvalidVersion(s.to_string()));
        }
        let parts = trimmed
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseError::InvalidVersion(s.to_string()))?;
        Ok(Self {
            raw: trimmed.to_string(),
            parts,
        })
    }
}

impl TryFrom<String> for DriverVersion {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DriverVersion> for String {
    fn from(value: DriverVersion) -> Self {
        value.raw
    }
}

impl Ord for DriverVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                non_eq => return non_eq,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for DriverVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DriverVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DriverVersion {}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DriverVersion({})", self.raw)
    }
}
