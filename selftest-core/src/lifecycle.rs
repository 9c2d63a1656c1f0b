//! Test instance lifecycle state machine.
//!
//! Pure state transitions: the provisioner, suite and teardown guard in
//! selftest-client feed events in and act on the resulting state.
//!
//! ```text
//! Requested ──accepted──► Provisioning ──booted──► Ready ──started──► Running ──finished──► Completed
//!     │                        │                                         │
//!     └────rejected────────────┴──rejected / timed out──► Failed ◄──aborted┘
//!
//! any state except Destroyed ──destroyed──► Destroyed
//! ```

use serde::{Deserialize, Serialize};
use selftest_types::{HostId, InstanceId};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Deadline used when `now + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Lifecycle state of an ephemeral test instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Creation sent, not yet acknowledged.
    Requested,
    /// Acknowledged by the platform, waiting for the workload to boot.
    Provisioning,
    /// Workload running and agent reachable.
    Ready,
    /// Diagnostics in progress.
    Running,
    /// Diagnostics finished.
    Completed,
    /// Destroyed on the platform.
    Destroyed,
    /// Provisioning or diagnostics failed.
    Failed,
}

/// Inputs to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Platform acknowledged creation.
    Accepted,
    /// Platform refused or reported the workload as broken.
    Rejected,
    /// Workload is running with a reachable agent.
    Booted,
    /// Provisioning deadline passed.
    TimedOut,
    /// Diagnostic suite started.
    DiagnosticsStarted,
    /// Diagnostic suite finished.
    DiagnosticsFinished,
    /// Diagnostic suite was interrupted.
    Aborted,
    /// Platform confirmed destruction.
    Destroyed,
}

impl InstanceState {
    /// Apply an event and return the new state.
    ///
    /// Invalid transitions leave the state unchanged.
    pub fn on_event(self, event: LifecycleEvent) -> Self {
        use InstanceState::*;
        use LifecycleEvent as E;

        match (self, event) {
            (Destroyed, _) => Destroyed,
            (_, E::Destroyed) => Destroyed,

            (Requested, E::Accepted) => Provisioning,
            (Requested, E::Rejected) => Failed,

            (Provisioning, E::Booted) => Ready,
            (Provisioning, E::Rejected | E::TimedOut) => Failed,

            (Ready, E::DiagnosticsStarted) => Running,

            (Running, E::DiagnosticsFinished) => Completed,
            (Running, E::Aborted) => Failed,

            (state, _) => state,
        }
    }

    /// True once the platform holds a billable resource for this instance.
    pub fn holds_resource(self) -> bool {
        !matches!(self, Self::Requested | Self::Destroyed)
    }
}

/// An ephemeral workload created on one host for one self-test run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestInstance {
    /// Platform identifier.
    pub id: InstanceId,
    /// Host the instance runs on.
    pub host_id: HostId,
    state: InstanceState,
    /// Unix time (seconds) the instance was requested.
    pub created_at: u64,
    /// Provisioning must reach Ready before this instant.
    pub deadline: Instant,
    /// `ip:port` of the diagnostic agent, known once Ready.
    pub endpoint: Option<String>,
}

impl TestInstance {
    /// Track a newly acknowledged instance.
    ///
    /// Starts in `Provisioning`: creation was accepted by the platform.
    pub fn accepted(id: InstanceId, host_id: HostId, timeout: Duration) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        Self {
            id,
            host_id,
            state: InstanceState::Requested.on_event(LifecycleEvent::Accepted),
            created_at,
            deadline,
            endpoint: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// Feed an event into the state machine.
    pub fn apply(&mut self, event: LifecycleEvent) -> InstanceState {
        self.state = self.state.on_event(event);
        self.state
    }

    /// Mark Ready with the agent endpoint.
    pub fn mark_ready(&mut self, endpoint: String) {
        if self.apply(LifecycleEvent::Booted) == InstanceState::Ready {
            self.endpoint = Some(endpoint);
        }
    }

    /// Time left before the provisioning deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use InstanceState::*;

    #[test]
    fn happy_path() {
        let s = Requested.on_event(LifecycleEvent::Accepted);
        assert_eq!(s, Provisioning);
        let s = s.on_event(LifecycleEvent::Booted);
        assert_eq!(s, Ready);
        let s = s.on_event(LifecycleEvent::DiagnosticsStarted);
        assert_eq!(s, Running);
        let s = s.on_event(LifecycleEvent::DiagnosticsFinished);
        assert_eq!(s, Completed);
        let s = s.on_event(LifecycleEvent::Destroyed);
        assert_eq!(s, Destroyed);
    }

    #[test]
    fn timeout_fails_provisioning() {
        assert_eq!(Provisioning.on_event(LifecycleEvent::TimedOut), Failed);
        assert_eq!(Provisioning.on_event(LifecycleEvent::Rejected), Failed);
        assert_eq!(Requested.on_event(LifecycleEvent::Rejected), Failed);
    }

    #[test]
    fn failed_instance_can_still_be_destroyed() {
        assert_eq!(Failed.on_event(LifecycleEvent::Destroyed), Destroyed);
    }

    #[test]
    fn destroyed_is_terminal() {
        for event in [
            LifecycleEvent::Accepted,
            LifecycleEvent::Booted,
            LifecycleEvent::DiagnosticsStarted,
            LifecycleEvent::Destroyed,
        ] {
            assert_eq!(Destroyed.on_event(event), Destroyed);
        }
    }

    #[test]
    fn diagnostics_cannot_start_unless_ready() {
        for state in [Provisioning, Running, Completed, Failed] {
            assert_eq!(state.on_event(LifecycleEvent::DiagnosticsStarted), state);
        }
    }

    #[test]
    fn completed_cannot_restart() {
        assert_eq!(Completed.on_event(LifecycleEvent::DiagnosticsStarted), Completed);
        assert_eq!(Completed.on_event(LifecycleEvent::Booted), Completed);
    }

    #[test]
    fn holds_resource_after_acceptance() {
        assert!(!Requested.holds_resource());
        assert!(Provisioning.holds_resource());
        assert!(Failed.holds_resource());
        assert!(!Destroyed.holds_resource());
    }

    #[test]
    fn test_instance_tracks_readiness() {
        let mut inst = TestInstance::accepted(
            InstanceId::new(9),
            HostId::new(1),
            Duration::from_secs(60),
        );
        assert_eq!(inst.state(), Provisioning);
        assert!(inst.remaining() > Duration::from_secs(50));

        inst.mark_ready("1.2.3.4:5000".into());
        assert_eq!(inst.state(), Ready);
        assert_eq!(inst.endpoint.as_deref(), Some("1.2.3.4:5000"));
    }

    #[test]
    fn huge_timeout_saturates() {
        let inst = TestInstance::accepted(InstanceId::new(9), HostId::new(1), Duration::MAX);
        assert_eq!(inst.state(), Provisioning);
        assert!(inst.remaining() > Duration::from_secs(86_400));
    }

    #[test]
    fn mark_ready_ignored_after_failure() {
        let mut inst =
            TestInstance::accepted(InstanceId::new(9), HostId::new(1), Duration::from_secs(1));
        inst.apply(LifecycleEvent::TimedOut);
        inst.mark_ready("1.2.3.4:5000".into());
        assert_eq!(inst.state(), Failed);
        assert!(inst.endpoint.is_none());
    }
}
