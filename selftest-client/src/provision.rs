//! Test instance provisioning with bounded status polling.

use crate::remote::{RemoteClient, RemoteError};
use crate::stop::StopSignal;
use crate::teardown::TeardownGuard;
use selftest_core::{ImageSettings, LifecycleEvent, RetryPolicy, TestInstance};
use selftest_types::{HostRecord, InstanceId, InstanceStatus, RemoteState};
use std::time::Duration;
use thiserror::Error;

/// Provisioning failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProvisionError {
    /// Instance did not become ready before the deadline or the poll bound.
    #[error("instance {instance_id} not running after {waited:?} (last state: {last_state})")]
    Timeout {
        /// Instance that was waited on.
        instance_id: InstanceId,
        /// Time spent waiting.
        waited: Duration,
        /// Last state the platform reported.
        last_state: String,
    },

    /// The platform refused the instance or it broke while starting.
    #[error("{0}")]
    Rejected(String),

    /// Stop requested while waiting.
    #[error("stopped while waiting for instance {0}")]
    Cancelled(InstanceId),
}

/// Knobs for [`Provisioner`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionSettings {
    /// Deadline for the instance to reach Ready.
    pub timeout: Duration,
    /// Poll bound and backoff between status reads.
    pub poll: RetryPolicy,
    /// Upper bound on each individual API call.
    pub call_timeout: Duration,
    /// How the instance spec is built.
    pub image: ImageSettings,
}

impl Default for ProvisionSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            poll: RetryPolicy::provisioning(),
            call_timeout: Duration::from_secs(30),
            image: ImageSettings::default(),
        }
    }
}

enum Poll {
    Ready(String),
    Broken(String),
    Waiting(String),
}

fn classify(status: &InstanceStatus) -> Poll {
    let msg = status.status_msg.as_deref().unwrap_or("").trim();
    if status.reports_error() {
        return Poll::Broken(format!("instance reported an error: {}", msg));
    }
    match status.actual {
        RemoteState::Running => match &status.endpoint {
            Some(endpoint) => Poll::Ready(endpoint.clone()),
            None => Poll::Waiting("running, agent endpoint not published".into()),
        },
        RemoteState::Offline => Poll::Broken("instance went offline while starting".into()),
        RemoteState::Exited | RemoteState::Destroyed => {
            Poll::Broken(format!("instance stopped while starting: {:?}", status.actual))
        }
        other => Poll::Waiting(format!("{:?}", other).to_lowercase()),
    }
}

/// Creates the test instance and waits for it to become Ready.
pub struct Provisioner<'a> {
    client: &'a dyn RemoteClient,
    settings: &'a ProvisionSettings,
}

impl<'a> Provisioner<'a> {
    /// Create a provisioner.
    pub fn new(client: &'a dyn RemoteClient, settings: &'a ProvisionSettings) -> Self {
        Self { client, settings }
    }

    /// Provision an instance on `host` and leave it Ready inside `guard`.
    ///
    /// The guard adopts the instance as soon as creation is acknowledged,
    /// so every error after that point still ends in a destroy.
    pub async fn provision(
        &self,
        host: &HostRecord,
        guard: &mut TeardownGuard,
        stop: &StopSignal,
    ) -> Result<(), ProvisionError> {
        let spec = self
            .settings
            .image
            .spec_for(host)
            .map_err(|e| ProvisionError::Rejected(e.to_string()))?;

        let created = tokio::time::timeout(
            self.settings.call_timeout,
            self.client.create_instance(host.id, &spec),
        )
        .await
        .unwrap_or(Err(RemoteError::Timeout));
        let instance_id = created
            .map_err(|e| ProvisionError::Rejected(format!("create instance failed: {}", e)))?;

        tracing::info!(host_id = %host.id, %instance_id, image = %spec.image, "instance created");
        guard.adopt(TestInstance::accepted(
            instance_id,
            host.id,
            self.settings.timeout,
        ));

        let Some(instance) = guard.instance_mut() else {
            return Err(ProvisionError::Rejected("instance lost after adoption".into()));
        };
        self.wait_ready(instance, stop).await
    }

    async fn wait_ready(
        &self,
        instance: &mut TestInstance,
        stop: &StopSignal,
    ) -> Result<(), ProvisionError> {
        let policy = &self.settings.poll;
        let mut stop = stop.clone();
        let mut last_state = String::from("requested");
        let mut attempt = 0;

        loop {
            attempt += 1;
            let remaining = instance.remaining();
            if remaining.is_zero() {
                break;
            }

            let status = tokio::time::timeout(
                self.settings.call_timeout.min(remaining),
                self.client.instance_status(instance.id),
            )
            .await
            .unwrap_or(Err(RemoteError::Timeout));

            match status {
                Ok(status) => match classify(&status) {
                    Poll::Ready(endpoint) => {
                        tracing::info!(
                            host_id = %instance.host_id,
                            instance_id = %instance.id,
                            %endpoint,
                            "instance ready"
                        );
                        instance.mark_ready(endpoint);
                        return Ok(());
                    }
                    Poll::Broken(reason) => {
                        instance.apply(LifecycleEvent::Rejected);
                        tracing::warn!(
                            host_id = %instance.host_id,
                            instance_id = %instance.id,
                            "{}",
                            reason
                        );
                        return Err(ProvisionError::Rejected(reason));
                    }
                    Poll::Waiting(state) => {
                        tracing::debug!(
                            host_id = %instance.host_id,
                            instance_id = %instance.id,
                            attempt,
                            "instance status: {}",
                            state
                        );
                        last_state = state;
                    }
                },
                Err(e) if e.is_transient() || matches!(e, RemoteError::NotFound(_)) => {
                    tracing::debug!(
                        instance_id = %instance.id,
                        attempt,
                        "status read failed: {}",
                        e
                    );
                }
                Err(e) => {
                    instance.apply(LifecycleEvent::Rejected);
                    return Err(ProvisionError::Rejected(format!("status read failed: {}", e)));
                }
            }

            if !policy.should_retry(attempt) {
                break;
            }
            let delay = policy.backoff(attempt).min(instance.remaining());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.stopped() => {
                    return Err(ProvisionError::Cancelled(instance.id));
                }
            }
        }

        instance.apply(LifecycleEvent::TimedOut);
        let waited = self.settings.timeout.saturating_sub(instance.remaining());
        tracing::warn!(
            host_id = %instance.host_id,
            instance_id = %instance.id,
            "instance not ready after {:?}",
            waited
        );
        Err(ProvisionError::Timeout {
            instance_id: instance.id,
            waited,
            last_state,
        })
    }
}
