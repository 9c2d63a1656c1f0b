//! Replies from the diagnostic agent running inside a test instance.

use serde::{Deserialize, Serialize};

/// System inventory as seen from inside the container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// GPUs visible to the container.
    pub gpu_count: u32,
    /// Model name reported by the driver.
    pub gpu_model: String,
    /// Driver version reported by the driver.
    pub driver_version: String,
    /// CPU cores visible to the container.
    pub cpu_cores: u32,
    /// RAM visible to the container in GB.
    pub ram_gb: f64,
    /// Free disk in GB.
    pub disk_free_gb: f64,
}

/// Parameters of the GPU compute kernel check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Square matrix dimension for the matmul kernel.
    pub matrix_size: u32,
    /// Largest tolerated absolute error against the CPU reference.
    pub max_abs_error: f64,
}

impl Default for KernelSpec {
    fn default() -> Self {
        Self {
            matrix_size: 4096,
            max_abs_error: 1e-3,
        }
    }
}

/// Result of running the compute kernel on every GPU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelReport {
    /// GPUs that ran the kernel and produced a result.
    pub devices_ok: u32,
    /// GPUs the kernel was launched on.
    pub devices_total: u32,
    /// Largest absolute error across all devices.
    pub max_abs_error: f64,
    /// Wall time of the kernel run in milliseconds.
    pub elapsed_ms: u64,
}

/// Result of a sustained load run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressReport {
    /// Aggregate throughput across all GPUs in TFLOPS.
    pub throughput_tflops: f64,
    /// Fraction of work items that produced wrong results, in [0, 1].
    pub error_rate: f64,
    /// Seconds the load was actually sustained.
    pub duration_secs: u64,
}
