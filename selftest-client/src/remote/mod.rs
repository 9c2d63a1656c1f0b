//! Remote platform abstraction.
//!
//! Two seams separate the pipeline from the network:
//! - [`RemoteClient`] talks to the marketplace API (host metadata, instance
//!   create/status/destroy)
//! - [`InstanceProbe`] talks to the diagnostic agent inside a running
//!   test instance
//!
//! [`HttpPlatform`] and [`HttpProbe`] are the production implementations.
//! [`MockPlatform`] implements both for tests and `--mock` runs.

mod http;
mod mock;

pub use http::{HttpPlatform, HttpProbe, DEFAULT_API_URL};
pub use mock::{healthy_host, MockPlatform, ProbeStep};

use async_trait::async_trait;
use selftest_types::{
    HostId, HostRecord, InstanceId, InstanceSpec, InstanceStatus, KernelReport, KernelSpec,
    StressReport, SystemInfo,
};
use std::time::Duration;
use thiserror::Error;

/// Remote call errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// Could not reach the remote side at all.
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was refused (bad input, no capacity, auth).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Temporary failure; the same call may succeed later.
    #[error("transient error: {0}")]
    Transient(String),

    /// The call did not complete in time.
    #[error("timed out")]
    Timeout,
}

impl RemoteError {
    /// Whether retrying the same call can help.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Transient(_) | Self::Timeout)
    }
}

/// Marketplace API operations used by the self-test.
///
/// Implementations are shared read-only across concurrent host pipelines.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Cheap authenticated call used to check the platform is reachable.
    async fn ping(&self) -> Result<(), RemoteError>;

    /// Fetch a host's capability metadata.
    async fn host_metadata(&self, host_id: HostId) -> Result<HostRecord, RemoteError>;

    /// Create a test instance on a host.
    ///
    /// Returning `Ok` means the platform acknowledged a billable resource.
    async fn create_instance(
        &self,
        host_id: HostId,
        spec: &InstanceSpec,
    ) -> Result<InstanceId, RemoteError>;

    /// Read an instance's current status.
    async fn instance_status(&self, instance_id: InstanceId)
        -> Result<InstanceStatus, RemoteError>;

    /// Destroy an instance. `NotFound` means it is already gone.
    async fn destroy_instance(&self, instance_id: InstanceId) -> Result<(), RemoteError>;
}

/// Calls into the diagnostic agent of a running instance.
#[async_trait]
pub trait InstanceProbe: Send + Sync {
    /// Hardware and driver inventory as seen from inside the instance.
    async fn system_info(&self, endpoint: &str) -> Result<SystemInfo, RemoteError>;

    /// Run the compute kernel on every GPU.
    async fn run_kernel(&self, endpoint: &str, spec: KernelSpec)
        -> Result<KernelReport, RemoteError>;

    /// Sustain load for `duration` and measure it.
    async fn stress(&self, endpoint: &str, duration: Duration)
        -> Result<StressReport, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(RemoteError::Timeout.is_transient());
        assert!(RemoteError::Transient("503".into()).is_transient());
        assert!(RemoteError::Unreachable("refused".into()).is_transient());
        assert!(!RemoteError::NotFound("instance 1".into()).is_transient());
        assert!(!RemoteError::Rejected("bad spec".into()).is_transient());
    }

    #[test]
    fn error_display() {
        assert_eq!(
            RemoteError::NotFound("instance 7".into()).to_string(),
            "not found: instance 7"
        );
        assert_eq!(RemoteError::Timeout.to_string(), "timed out");
    }
}
