//! HTTP adapters for the marketplace API and the diagnostic agent.

use super::{InstanceProbe, RemoteClient, RemoteError};
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use selftest_types::{
    HostId, HostRecord, InstanceId, InstanceSpec, InstanceStatus, KernelReport, KernelSpec,
    RemoteState, StressReport, SystemInfo,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default marketplace API base URL.
pub const DEFAULT_API_URL: &str = "https://console.vast.ai";

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_connect() {
            RemoteError::Unreachable(e.to_string())
        } else if e.is_decode() {
            RemoteError::Rejected(format!("unexpected response body: {}", e))
        } else {
            RemoteError::Transient(e.to_string())
        }
    }
}

/// Map a non-success status to an error.
async fn check(response: Response, what: &str) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = format!("{} ({}): {}", what, status, body.trim());

    Err(if status == StatusCode::NOT_FOUND {
        RemoteError::NotFound(what.to_string())
    } else if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        RemoteError::Transient(detail)
    } else {
        RemoteError::Rejected(detail)
    })
}

async fn send_json<T: DeserializeOwned>(req: RequestBuilder, what: &str) -> Result<T, RemoteError> {
    let response = check(req.send().await?, what).await?;
    Ok(response.json().await?)
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    #[serde(flatten)]
    spec: &'a InstanceSpec,
    runtype: &'static str,
}

#[derive(Deserialize)]
struct CreateResponse {
    new_contract: u64,
}

#[derive(Deserialize)]
struct InstanceEnvelope {
    instances: InstanceWire,
}

#[derive(Deserialize)]
struct InstanceWire {
    #[serde(default)]
    actual_status: Option<RemoteState>,
    #[serde(default)]
    status_msg: Option<String>,
    #[serde(default)]
    public_ipaddr: Option<String>,
    #[serde(default)]
    agent_port: Option<u16>,
}

impl From<InstanceWire> for InstanceStatus {
    fn from(wire: InstanceWire) -> Self {
        let actual = wire.actual_status.unwrap_or(RemoteState::Created);
        let endpoint = match (wire.public_ipaddr, wire.agent_port) {
            (Some(ip), Some(port)) if !ip.trim().is_empty() => {
                Some(format!("{}:{}", ip.trim(), port))
            }
            _ => None,
        };
        InstanceStatus {
            actual,
            status_msg: wire.status_msg.filter(|m| !m.is_empty()),
            endpoint,
        }
    }
}

/// Marketplace API client.
#[derive(Debug, Clone)]
pub struct HttpPlatform {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpPlatform {
    /// Create a client. `timeout` bounds every request.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Rejected(format!("http client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    /// Base URL requests go to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build an API URL from a path below `/api/v0`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v0{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http.get(self.api_url(path)).bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl RemoteClient for HttpPlatform {
    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self.get("/users/current/").send().await?;
        check(response, "current user").await.map(|_| ())
    }

    async fn host_metadata(&self, host_id: HostId) -> Result<HostRecord, RemoteError> {
        let req = self.get(&format!("/machines/{}/selftest/", host_id));
        let mut record: HostRecord = send_json(req, &format!("host {}", host_id)).await?;
        record.id = host_id;
        Ok(record)
    }

    async fn create_instance(
        &self,
        host_id: HostId,
        spec: &InstanceSpec,
    ) -> Result<InstanceId, RemoteError> {
        let req = self
            .http
            .put(self.api_url(&format!("/machines/{}/selftest/instances/", host_id)))
            .bearer_auth(&self.api_key)
            .json(&CreateRequest {
                spec,
                runtype: "args",
            });
        let created: CreateResponse = send_json(req, &format!("host {}", host_id)).await?;
        Ok(InstanceId::new(created.new_contract))
    }

    async fn instance_status(
        &self,
        instance_id: InstanceId,
    ) -> Result<InstanceStatus, RemoteError> {
        let req = self.get(&format!("/instances/{}/", instance_id));
        let envelope: InstanceEnvelope =
            send_json(req, &format!("instance {}", instance_id)).await?;
        Ok(envelope.instances.into())
    }

    async fn destroy_instance(&self, instance_id: InstanceId) -> Result<(), RemoteError> {
        let response = self
            .http
            .delete(self.api_url(&format!("/instances/{}/", instance_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        check(response, &format!("instance {}", instance_id))
            .await
            .map(|_| ())
    }
}

#[derive(Serialize)]
struct StressRequest {
    duration_secs: u64,
}

/// Client for the diagnostic agent's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe. `timeout` bounds every request; the stress call
    /// extends it by the requested duration.
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Rejected(format!("http client: {}", e)))?;
        Ok(Self { http })
    }

    /// URL of an agent endpoint.
    pub fn agent_url(endpoint: &str, path: &str) -> String {
        format!("http://{}{}", endpoint, path)
    }
}

#[async_trait]
impl InstanceProbe for HttpProbe {
    async fn system_info(&self, endpoint: &str) -> Result<SystemInfo, RemoteError> {
        let req = self.http.get(Self::agent_url(endpoint, "/system"));
        send_json(req, "agent system info").await
    }

    async fn run_kernel(
        &self,
        endpoint: &str,
        spec: KernelSpec,
    ) -> Result<KernelReport, RemoteError> {
        let req = self
            .http
            .post(Self::agent_url(endpoint, "/kernel"))
            .json(&spec);
        send_json(req, "agent kernel run").await
    }

    async fn stress(&self, endpoint: &str, duration: Duration) -> Result<StressReport, RemoteError> {
        let req = self
            .http
            .post(Self::agent_url(endpoint, "/stress"))
            .timeout(duration.saturating_add(Duration::from_secs(60)))
            .json(&StressRequest {
                duration_secs: duration.as_secs(),
            });
        send_json(req, "agent stress run").await
    }
}
