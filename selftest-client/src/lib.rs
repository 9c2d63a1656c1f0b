//! # selftest-client
//!
//! Self-test pipeline and fleet orchestrator for GPU marketplace hosts.
//!
//! This crate performs the I/O that `selftest-core` stays away from:
//! creating and destroying test instances, polling their status, and
//! driving the diagnostic agent inside them.
//!
//! ## Features
//!
//! - **Guaranteed teardown**: a [`TeardownGuard`] owns every created instance
//! - **Failure isolation**: panics and errors stay inside one host's report
//! - **Bounded fleet runs**: sampling, a concurrency cap and a stop signal
//! - **Pluggable platform**: HTTP adapters for production, a mock for tests
//!
//! ## Example
//!
//! ```ignore
//! use selftest_client::{session_over, FleetOptions, FleetOrchestrator, MockPlatform, StopSignal};
//!
//! let platform = MockPlatform::healthy_fleet([HostId::new(1), HostId::new(2)]);
//! let ctx = session_over(platform, PipelineSettings::default());
//! let run = FleetOrchestrator::new(ctx, FleetOptions::default())?
//!     .run(&[HostId::new(1), HostId::new(2)], StopSignal::never())
//!     .await?;
//! println!("{}", selftest_core::summarize_fleet(&run));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod fleet;
pub mod pipeline;
pub mod provision;
pub mod remote;
pub mod stop;
pub mod suite;
pub mod teardown;

pub use fleet::{FleetError, FleetOptions, FleetOrchestrator};
pub use pipeline::{quick_settings, session_over, PipelineSettings, SelfTest, SessionContext};
pub use provision::{ProvisionError, ProvisionSettings, Provisioner};
pub use remote::{
    healthy_host, HttpPlatform, HttpProbe, InstanceProbe, MockPlatform, ProbeStep, RemoteClient,
    RemoteError, DEFAULT_API_URL,
};
pub use stop::{stop_signal, StopHandle, StopSignal};
pub use suite::{
    Check, CheckTarget, CheckVerdict, DiagnosticSettings, DiagnosticSuite, SuiteError, SuiteRun,
    SystemCheck, TestCase,
};
pub use teardown::{destroy_with_retry, TeardownFailure, TeardownGuard};
