//! # selftest-types
//!
//! Data types shared by every gpu-selftest crate:
//! - [`HostId`], [`InstanceId`] - Identity types
//! - [`HostRecord`], [`DriverVersion`] - Host capability metadata
//! - [`InstanceSpec`], [`InstanceStatus`] - Platform wire types for test workloads
//! - [`SystemInfo`], [`KernelReport`], [`StressReport`] - Diagnostic agent replies
//! - [`ParseError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod host;
mod ids;
mod instance;
mod probe;

pub use error::ParseError;
pub use host::{DriverVersion, HostRecord, HostStatus};
pub use ids::{HostId, InstanceId};
pub use instance::{InstanceSpec, InstanceStatus, RemoteState};
pub use probe::{KernelReport, KernelSpec, StressReport, SystemInfo};
