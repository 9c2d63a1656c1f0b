//! The per-host self-test pipeline.
//!
//! Requirement check, then provisioning, then diagnostics, then teardown,
//! strictly in that order. Every failure, panics included, is folded into
//! the host's [`SelfTestReport`]; nothing escapes [`SelfTest::run`].

use crate::provision::{ProvisionError, ProvisionSettings, Provisioner};
use crate::remote::{InstanceProbe, RemoteClient, RemoteError};
use crate::stop::StopSignal;
use crate::suite::{DiagnosticSuite, SuiteRun};
use crate::teardown::TeardownGuard;
use futures_util::FutureExt;
use selftest_core::{
    evaluate, HardwareClass, PipelineFailure, Requirement, RequirementThresholds, RetryPolicy,
    SelfTestReport,
};
use selftest_types::{HostId, HostRecord};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Everything a pipeline run needs besides the host id.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Requirements checked before provisioning.
    pub requirements: Vec<Requirement>,
    /// Provisioning knobs.
    pub provision: ProvisionSettings,
    /// Destroy retry policy.
    pub teardown: RetryPolicy,
    /// Diagnostic cases.
    pub suite: DiagnosticSuite,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            requirements: RequirementThresholds::default().requirements(),
            provision: ProvisionSettings::default(),
            teardown: RetryPolicy::teardown(),
            suite: DiagnosticSuite::standard(&Default::default()),
        }
    }
}

/// Read-only session shared by every pipeline of a run.
///
/// Holds the authenticated platform client, the agent probe and settings.
#[derive(Clone)]
pub struct SessionContext {
    /// Marketplace API client.
    pub client: Arc<dyn RemoteClient>,
    /// Diagnostic agent client.
    pub probe: Arc<dyn InstanceProbe>,
    /// Pipeline settings.
    pub settings: Arc<PipelineSettings>,
}

impl SessionContext {
    /// Create a session.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        probe: Arc<dyn InstanceProbe>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            client,
            probe,
            settings: Arc::new(settings),
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl From<ProvisionError> for PipelineFailure {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::Timeout { .. } => PipelineFailure::ProvisionTimeout(e.to_string()),
            ProvisionError::Rejected(msg) => PipelineFailure::ProvisionRejected(msg),
            ProvisionError::Cancelled(_) => PipelineFailure::Cancelled(e.to_string()),
        }
    }
}

/// One host's self-test.
#[derive(Debug, Clone, Copy)]
pub struct SelfTest<'a> {
    ctx: &'a SessionContext,
    ignore_requirements: bool,
}

impl<'a> SelfTest<'a> {
    /// Create a self-test bound to a session.
    pub fn new(ctx: &'a SessionContext, ignore_requirements: bool) -> Self {
        Self {
            ctx,
            ignore_requirements,
        }
    }

    /// Run the full pipeline for one host. Never fails and never panics.
    pub async fn run(&self, host_id: HostId, stop: &StopSignal) -> SelfTestReport {
        match AssertUnwindSafe(self.run_stages(host_id, stop))
            .catch_unwind()
            .await
        {
            Ok(report) => report,
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!(%host_id, "self-test panicked: {}", msg);
                SelfTestReport::failed(host_id, PipelineFailure::Internal(format!("panic: {}", msg)))
            }
        }
    }

    async fn run_stages(&self, host_id: HostId, stop: &StopSignal) -> SelfTestReport {
        if stop.is_stopped() {
            return SelfTestReport::failed(
                host_id,
                PipelineFailure::Cancelled("stopped before the self-test started".into()),
            );
        }

        let settings = &self.ctx.settings;
        let host = match self.fetch_host(host_id).await {
            Ok(host) => host,
            Err(e) => {
                tracing::warn!(%host_id, "host metadata unavailable: {}", e);
                return SelfTestReport::failed(
                    host_id,
                    PipelineFailure::MetadataUnavailable(e.to_string()),
                );
            }
        };

        let requirements = evaluate(&host, &settings.requirements);
        for failure in &requirements.failures {
            tracing::info!(%host_id, severity = ?failure.severity, "requirement unmet: {}", failure);
        }
        let mut report =
            SelfTestReport::new(host_id, requirements, self.ignore_requirements);
        report.hardware_class = Some(HardwareClass::of(&host));

        if !report.requirements.met {
            if !self.ignore_requirements {
                tracing::info!(%host_id, "requirements unmet, not provisioning");
                return report.finalize();
            }
            tracing::warn!(%host_id, "requirements unmet, continuing because they are ignored");
        }

        if stop.is_stopped() {
            report.failure = Some(PipelineFailure::Cancelled(
                "stopped before provisioning".into(),
            ));
            return report.finalize();
        }

        let mut guard = TeardownGuard::new(
            Arc::clone(&self.ctx.client),
            settings.teardown,
            settings.provision.call_timeout,
            host_id,
        );
        let body = AssertUnwindSafe(self.provision_and_diagnose(&host, &mut guard, stop))
            .catch_unwind()
            .await;

        match body {
            Ok(Ok(run)) => {
                report.results = run.results;
                if run.cancelled {
                    report.failure = Some(PipelineFailure::Cancelled(
                        "stopped during diagnostics".into(),
                    ));
                }
            }
            Ok(Err(failure)) => report.failure = Some(failure),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                tracing::error!(%host_id, "diagnostics panicked: {}", msg);
                report.failure = Some(PipelineFailure::Internal(format!("panic: {}", msg)));
            }
        }

        report.teardown = guard.release().await;
        let report = report.finalize();
        tracing::info!(%host_id, verdict = %report.verdict, "self-test finished");
        report
    }

    async fn fetch_host(&self, host_id: HostId) -> Result<HostRecord, RemoteError> {
        let timeout = self.ctx.settings.provision.call_timeout;
        tokio::time::timeout(timeout, self.ctx.client.host_metadata(host_id))
            .await
            .unwrap_or(Err(RemoteError::Timeout))
    }

    async fn provision_and_diagnose(
        &self,
        host: &HostRecord,
        guard: &mut TeardownGuard,
        stop: &StopSignal,
    ) -> Result<SuiteRun, PipelineFailure> {
        let settings = &self.ctx.settings;
        Provisioner::new(self.ctx.client.as_ref(), &settings.provision)
            .provision(host, guard, stop)
            .await?;

        if stop.is_stopped() {
            return Err(PipelineFailure::Cancelled("stopped before diagnostics".into()));
        }

        let instance = guard
            .instance_mut()
            .ok_or_else(|| PipelineFailure::Internal("no instance after provisioning".into()))?;
        settings
            .suite
            .run(instance, self.ctx.probe.as_ref(), host, stop)
            .await
            .map_err(|e| PipelineFailure::TestExecutionError(e.to_string()))
    }
}

/// Shorthand for a session over one platform object that is both client
/// and probe, as the mock is.
pub fn session_over<P>(platform: P, settings: PipelineSettings) -> SessionContext
where
    P: RemoteClient + InstanceProbe + Clone + 'static,
{
    SessionContext::new(Arc::new(platform.clone()), Arc::new(platform), settings)
}

/// Settings with short timeouts and no backoff, for tests and mock runs.
pub fn quick_settings() -> PipelineSettings {
    let zero = RetryPolicy::new(20, Duration::ZERO, Duration::ZERO);
    PipelineSettings {
        provision: ProvisionSettings {
            timeout: Duration::from_secs(5),
            poll: zero,
            call_timeout: Duration::from_secs(2),
            ..ProvisionSettings::default()
        },
        teardown: RetryPolicy::new(3, Duration::ZERO, Duration::ZERO),
        suite: DiagnosticSuite::standard(&crate::suite::DiagnosticSettings {
            case_timeout: Duration::from_secs(2),
            stress_duration: Duration::from_secs(1),
            kernel: Default::default(),
        }),
        ..PipelineSettings::default()
    }
}
