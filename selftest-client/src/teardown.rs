//! Scoped ownership of a test instance with guaranteed destroy.
//!
//! The provisioner hands the instance to a [`TeardownGuard`] as soon as the
//! platform acknowledges creation. From then on the destroy call happens
//! exactly once, through one of two paths:
//!
//! - [`TeardownGuard::release`], awaited by the pipeline on every normal or
//!   failed exit, returning a [`TeardownOutcome`] for the report
//! - `Drop`, when the owning future is dropped before `release` ran; the
//!   destroy is spawned on the ambient tokio runtime

use crate::remote::{RemoteClient, RemoteError};
use selftest_core::{LifecycleEvent, RetryPolicy, TeardownOutcome, TestInstance};
use selftest_types::{HostId, InstanceId};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Destroy never succeeded within the retry bound.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to destroy instance {instance_id} after {attempts} attempts: {last_error}")]
pub struct TeardownFailure {
    /// Instance that may have leaked.
    pub instance_id: InstanceId,
    /// Destroy calls made.
    pub attempts: u32,
    /// Error from the last call.
    pub last_error: RemoteError,
}

/// Destroy an instance, retrying transient failures.
///
/// `NotFound` counts as destroyed. Each call is bounded by `call_timeout`;
/// an elapsed call is a transient [`RemoteError::Timeout`]. Returns the
/// number of calls made.
pub async fn destroy_with_retry(
    client: &dyn RemoteClient,
    policy: &RetryPolicy,
    call_timeout: Duration,
    instance_id: InstanceId,
) -> Result<u32, TeardownFailure> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = tokio::time::timeout(call_timeout, client.destroy_instance(instance_id))
            .await
            .unwrap_or(Err(RemoteError::Timeout));
        match result {
            Ok(()) => return Ok(attempt),
            Err(RemoteError::NotFound(_)) => {
                tracing::debug!(%instance_id, "instance already gone");
                return Ok(attempt);
            }
            Err(e) if e.is_transient() && policy.should_retry(attempt) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    %instance_id,
                    attempt,
                    "destroy failed: {}; retrying in {:?}",
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(TeardownFailure {
                    instance_id,
                    attempts: attempt,
                    last_error: e,
                })
            }
        }
    }
}

/// Owns at most one test instance and destroys it on every exit path.
pub struct TeardownGuard {
    client: Arc<dyn RemoteClient>,
    policy: RetryPolicy,
    call_timeout: Duration,
    host_id: HostId,
    instance: Option<TestInstance>,
}

impl TeardownGuard {
    /// Create an empty guard for a host.
    ///
    /// `call_timeout` bounds each destroy call.
    pub fn new(
        client: Arc<dyn RemoteClient>,
        policy: RetryPolicy,
        call_timeout: Duration,
        host_id: HostId,
    ) -> Self {
        Self {
            client,
            policy,
            call_timeout,
            host_id,
            instance: None,
        }
    }

    /// Take ownership of an acknowledged instance.
    ///
    /// A guard owns one instance per run; adopting a second one destroys
    /// the first in the background.
    pub fn adopt(&mut self, instance: TestInstance) {
        if let Some(previous) = self.instance.replace(instance) {
            tracing::warn!(
                host_id = %self.host_id,
                instance_id = %previous.id,
                "guard already owned an instance"
            );
            self.spawn_destroy(previous.id);
        }
    }

    /// The owned instance, if any.
    pub fn instance(&self) -> Option<&TestInstance> {
        self.instance.as_ref()
    }

    /// Mutable access to the owned instance, for lifecycle events.
    pub fn instance_mut(&mut self) -> Option<&mut TestInstance> {
        self.instance.as_mut()
    }

    /// Destroy the owned instance, if any, and report what happened.
    ///
    /// Never fails: exhausting the retries yields [`TeardownOutcome::Leaked`].
    pub async fn release(mut self) -> TeardownOutcome {
        let Some(mut instance) = self.instance.take() else {
            return TeardownOutcome::NotProvisioned;
        };
        let instance_id = instance.id;

        let destroyed = destroy_with_retry(
            self.client.as_ref(),
            &self.policy,
            self.call_timeout,
            instance_id,
        )
        .await;
        match destroyed {
            Ok(attempts) => {
                instance.apply(LifecycleEvent::Destroyed);
                tracing::info!(
                    host_id = %self.host_id,
                    %instance_id,
                    attempts,
                    "instance destroyed"
                );
                TeardownOutcome::Destroyed {
                    instance_id,
                    attempts,
                }
            }
            Err(failure) => {
                tracing::error!(
                    host_id = %self.host_id,
                    %instance_id,
                    "{}; the instance may still be billing",
                    failure
                );
                TeardownOutcome::Leaked {
                    instance_id,
                    attempts: failure.attempts,
                    error: failure.last_error.to_string(),
                }
            }
        }
    }

    fn spawn_destroy(&self, instance_id: InstanceId) {
        let client = Arc::clone(&self.client);
        let policy = self.policy;
        let call_timeout = self.call_timeout;
        let host_id = self.host_id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(failure) =
                        destroy_with_retry(client.as_ref(), &policy, call_timeout, instance_id)
                            .await
                    {
                        tracing::error!(%host_id, %instance_id, "{}", failure);
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    %host_id,
                    %instance_id,
                    "no async runtime to destroy instance; it may still be billing"
                );
            }
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            tracing::warn!(
                host_id = %self.host_id,
                instance_id = %instance.id,
                "teardown guard dropped while owning an instance; destroying in background"
            );
            self.spawn_destroy(instance.id);
        }
    }
}

impl std::fmt::Debug for TeardownGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownGuard")
            .field("host_id", &self.host_id)
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}
