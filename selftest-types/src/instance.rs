//! Platform wire types for ephemeral test instances.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What to launch on a host for a self-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// Container image carrying the diagnostic agent.
    pub image: String,
    /// Disk to allocate in GB.
    pub disk_gb: f64,
    /// Command run when the container starts.
    pub onstart_cmd: String,
    /// Container port the diagnostic agent listens on.
    pub agent_port: u16,
    /// Extra environment for the container.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Label attached to the instance so leaked ones are recognisable.
    pub label: String,
}

/// State of an instance as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteState {
    /// Contract accepted, container not yet scheduled.
    Created,
    /// Image pulling or container starting.
    Loading,
    /// Container running.
    Running,
    /// Container exited.
    Exited,
    /// Host stopped reporting.
    Offline,
    /// Instance no longer exists.
    Destroyed,
    /// Anything the platform reports that is not recognised.
    #[serde(other)]
    Unknown,
}

/// One status read of an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Observed state.
    pub actual: RemoteState,
    /// Free-form status message from the host daemon.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_msg: Option<String>,
    /// `ip:port` of the diagnostic agent, once mapped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl InstanceStatus {
    /// Status with only a state.
    pub fn new(actual: RemoteState) -> Self {
        Self {
            actual,
            status_msg: None,
            endpoint: None,
        }
    }

    /// Running status with the agent endpoint mapped.
    pub fn running(endpoint: &str) -> Self {
        Self {
            actual: RemoteState::Running,
            status_msg: None,
            endpoint: Some(endpoint.to_string()),
        }
    }

    /// Attach a status message.
    pub fn with_message(mut self, msg: &str) -> Self {
        self.status_msg = Some(msg.to_string());
        self
    }

    /// The host daemon reported an error for this instance.
    pub fn reports_error(&self) -> bool {
        self.status_msg
            .as_deref()
            .is_some_and(|msg| msg.contains("Error") || msg.contains("error:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_platform_json() {
        let json = r#"{"actual": "loading", "status_msg": "pulling image"}"#;
        let status: InstanceStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.actual, RemoteState::Loading);
        assert!(!status.reports_error());
        assert!(status.endpoint.is_none());
    }

    #[test]
    fn unknown_remote_state_is_tolerated() {
        let status: InstanceStatus = serde_json::from_str(r#"{"actual": "scheduling"}"#).unwrap();
        assert_eq!(status.actual, RemoteState::Unknown);
    }

    #[test]
    fn error_message_is_detected() {
        let status = InstanceStatus::new(RemoteState::Loading)
            .with_message("Error response from daemon: no such image");
        assert!(status.reports_error());
    }

    #[test]
    fn running_helper_sets_endpoint() {
        let status = InstanceStatus::running("10.0.0.5:41234");
        assert_eq!(status.actual, RemoteState::Running);
        assert_eq!(status.endpoint.as_deref(), Some("10.0.0.5:41234"));
    }
}
