//! # selftest-core
//!
//! Pure logic for GPU host self-tests (no I/O, instant tests).
//!
//! This crate holds the requirement evaluator, the test instance state
//! machine, the retry policy, fleet sampling, hardware tolerance bands,
//! the report model and the text reporter.
//!
//! ## Design Philosophy
//!
//! Nothing here touches the network, the clock of a remote platform, or
//! the filesystem. `selftest-client` performs the I/O and feeds events
//! into these types:
//! - Requirement evaluation is a function of the host record alone
//! - Instance state transitions are a function of the current state and event
//! - Sampling takes an injected RNG, so a seed reproduces a fleet selection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod hardware;
pub mod image;
pub mod lifecycle;
pub mod report;
pub mod reporter;
pub mod requirements;
pub mod retry;
pub mod sampling;

pub use hardware::{HardwareClass, ToleranceBand};
pub use image::{cuda_image_tag, ImageSettings, UnsupportedCuda};
pub use lifecycle::{InstanceState, LifecycleEvent, TestInstance};
pub use report::{
    FleetRun, PipelineFailure, SelfTestReport, TeardownOutcome, TestOutcome, TestResult,
    TestStage, Verdict,
};
pub use reporter::{summarize, summarize_fleet};
pub use requirements::{
    evaluate, Observation, Requirement, RequirementCheckResult, RequirementFailure,
    RequirementThresholds, Severity,
};
pub use retry::RetryPolicy;
pub use sampling::{seeded_rng, select_hosts, SamplePercent, SelectionError};
