//! Scripted in-process platform for tests and `--mock` runs.
//!
//! Every host is healthy unless scripted otherwise. Create and destroy calls
//! are recorded per host and per instance so tests can check teardown.

use super::{InstanceProbe, RemoteClient, RemoteError};
use async_trait::async_trait;
use selftest_core::HardwareClass;
use selftest_types::{
    HostId, HostRecord, HostStatus, InstanceId, InstanceSpec, InstanceStatus, KernelReport,
    KernelSpec, RemoteState, StressReport, SystemInfo,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Diagnostic agent call, used to script probe failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeStep {
    /// `system_info`
    SystemInfo,
    /// `run_kernel`
    Kernel,
    /// `stress`
    Stress,
}

/// A host record that meets every default requirement.
pub fn healthy_host(id: HostId) -> HostRecord {
    HostRecord {
        id,
        gpu_count: 4,
        gpu_model: "RTX 4090".into(),
        gpu_ram_gb: 24.0,
        cpu_ram_gb: 256.0,
        cpu_cores: 32,
        disk_gb: 500.0,
        inet_down_mbps: 1000.0,
        inet_up_mbps: 800.0,
        pcie_bw_gbps: 12.5,
        reliability: 0.99,
        direct_port_count: 100,
        cuda_max_good: 12.4,
        driver_version: "550.54.14".parse().unwrap_or_default(),
        status: HostStatus::Listed,
    }
}

#[derive(Debug, Clone)]
enum Boot {
    /// Loading for this many polls, then running.
    After(u32),
    /// Loading forever.
    Never,
    /// Reports this status from the first poll on.
    Broken(InstanceStatus),
}

#[derive(Debug, Clone)]
struct HostScript {
    record: HostRecord,
    boot: Boot,
    create_error: Option<RemoteError>,
    destroy_failures: u32,
    system_info: Option<SystemInfo>,
    kernel: Option<KernelReport>,
    stress: Option<StressReport>,
    probe_errors: HashMap<ProbeStep, RemoteError>,
    panic_on: Option<ProbeStep>,
}

impl HostScript {
    fn healthy(record: HostRecord) -> Self {
        Self {
            record,
            boot: Boot::After(1),
            create_error: None,
            destroy_failures: 0,
            system_info: None,
            kernel: None,
            stress: None,
            probe_errors: HashMap::new(),
            panic_on: None,
        }
    }
}

#[derive(Debug)]
struct MockInstance {
    host_id: HostId,
    endpoint: String,
    polls: u32,
    destroyed: bool,
}

#[derive(Debug, Default)]
struct MockPlatformInner {
    hosts: HashMap<HostId, HostScript>,
    unreachable: bool,
    next_instance: u64,
    instances: HashMap<InstanceId, MockInstance>,
    endpoints: HashMap<String, InstanceId>,
    create_calls: Vec<(HostId, InstanceId)>,
    destroy_calls: HashMap<InstanceId, u32>,
    live: usize,
    max_live: usize,
    probe_delay: Duration,
}

/// Mock marketplace and diagnostic agent.
///
/// Clones share state, so a test can keep one handle for assertions while
/// the pipeline owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    inner: Arc<Mutex<MockPlatformInner>>,
}

impl MockPlatform {
    /// Create an empty platform. Unknown hosts have no metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a platform where every listed host is healthy.
    pub fn healthy_fleet(ids: impl IntoIterator<Item = HostId>) -> Self {
        let platform = Self::new();
        for id in ids {
            platform.add_host(healthy_host(id));
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, MockPlatformInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn script(&self, host_id: HostId, f: impl FnOnce(&mut HostScript)) {
        let mut inner = self.lock();
        let script = inner
            .hosts
            .entry(host_id)
            .or_insert_with(|| HostScript::healthy(healthy_host(host_id)));
        f(script);
    }

    /// Register a host with the given metadata.
    pub fn add_host(&self, record: HostRecord) {
        let mut inner = self.lock();
        inner.hosts.insert(record.id, HostScript::healthy(record));
    }

    /// Make every call fail as if the platform were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Instances on this host report `loading` for `polls` status reads first.
    pub fn boot_after(&self, host_id: HostId, polls: u32) {
        self.script(host_id, |s| s.boot = Boot::After(polls));
    }

    /// Instances on this host never leave `loading`.
    pub fn never_ready(&self, host_id: HostId) {
        self.script(host_id, |s| s.boot = Boot::Never);
    }

    /// Instances on this host report `status` instead of booting.
    pub fn fail_boot(&self, host_id: HostId, status: InstanceStatus) {
        self.script(host_id, |s| s.boot = Boot::Broken(status));
    }

    /// Cause create calls for this host to fail.
    pub fn fail_create(&self, host_id: HostId, error: RemoteError) {
        self.script(host_id, |s| s.create_error = Some(error));
    }

    /// Cause the next `times` destroy calls for this host to fail transiently.
    pub fn fail_destroy(&self, host_id: HostId, times: u32) {
        self.script(host_id, |s| s.destroy_failures = times);
    }

    /// Cause a probe call to fail with `error`.
    pub fn fail_probe(&self, host_id: HostId, step: ProbeStep, error: RemoteError) {
        self.script(host_id, |s| {
            s.probe_errors.insert(step, error);
        });
    }

    /// Cause a probe call to panic.
    pub fn panic_on(&self, host_id: HostId, step: ProbeStep) {
        self.script(host_id, |s| s.panic_on = Some(step));
    }

    /// Override what the agent reports as system info.
    pub fn set_system_info(&self, host_id: HostId, info: SystemInfo) {
        self.script(host_id, |s| s.system_info = Some(info));
    }

    /// Override the kernel result.
    pub fn set_kernel(&self, host_id: HostId, report: KernelReport) {
        self.script(host_id, |s| s.kernel = Some(report));
    }

    /// Override the stress result.
    pub fn set_stress(&self, host_id: HostId, report: StressReport) {
        self.script(host_id, |s| s.stress = Some(report));
    }

    /// Delay every probe call.
    pub fn set_probe_delay(&self, delay: Duration) {
        self.lock().probe_delay = delay;
    }

    /// Number of create calls that reached this host.
    pub fn create_calls(&self, host_id: HostId) -> usize {
        let inner = self.lock();
        inner.create_calls.iter().filter(|(h, _)| *h == host_id).count()
    }

    /// Instances created on this host, in creation order.
    pub fn instances_for(&self, host_id: HostId) -> Vec<InstanceId> {
        let inner = self.lock();
        inner
            .create_calls
            .iter()
            .filter(|(h, _)| *h == host_id)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Total instances created.
    pub fn total_created(&self) -> usize {
        self.lock().create_calls.len()
    }

    /// Destroy calls made for an instance, failed ones included.
    pub fn destroy_calls(&self, instance_id: InstanceId) -> u32 {
        let inner = self.lock();
        inner.destroy_calls.get(&instance_id).copied().unwrap_or(0)
    }

    /// Whether the instance has been destroyed.
    pub fn is_destroyed(&self, instance_id: InstanceId) -> bool {
        let inner = self.lock();
        inner
            .instances
            .get(&instance_id)
            .is_some_and(|i| i.destroyed)
    }

    /// Instances created and not yet destroyed.
    pub fn live_instances(&self) -> usize {
        self.lock().live
    }

    /// Highest number of simultaneously live instances seen.
    pub fn max_live_instances(&self) -> usize {
        self.lock().max_live
    }

    fn probe_target(
        &self,
        endpoint: &str,
        step: ProbeStep,
    ) -> Result<(HostScript, Duration), RemoteError> {
        let inner = self.lock();
        let instance = inner
            .endpoints
            .get(endpoint)
            .and_then(|id| inner.instances.get(id))
            .filter(|i| !i.destroyed)
            .ok_or_else(|| RemoteError::Unreachable(format!("no agent at {}", endpoint)))?;
        let script = inner
            .hosts
            .get(&instance.host_id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("host {}", instance.host_id)))?;
        if let Some(error) = script.probe_errors.get(&step) {
            return Err(error.clone());
        }
        Ok((script, inner.probe_delay))
    }

    async fn enter_probe(
        &self,
        endpoint: &str,
        step: ProbeStep,
    ) -> Result<HostScript, RemoteError> {
        let (script, delay) = self.probe_target(endpoint, step)?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if script.panic_on == Some(step) {
            panic!("mock agent crashed during {:?}", step);
        }
        Ok(script)
    }
}

#[async_trait]
impl RemoteClient for MockPlatform {
    async fn ping(&self) -> Result<(), RemoteError> {
        if self.lock().unreachable {
            return Err(RemoteError::Unreachable("mock platform is down".into()));
        }
        Ok(())
    }

    async fn host_metadata(&self, host_id: HostId) -> Result<HostRecord, RemoteError> {
        let inner = self.lock();
        if inner.unreachable {
            return Err(RemoteError::Unreachable("mock platform is down".into()));
        }
        inner
            .hosts
            .get(&host_id)
            .map(|s| s.record.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("host {}", host_id)))
    }

    async fn create_instance(
        &self,
        host_id: HostId,
        spec: &InstanceSpec,
    ) -> Result<InstanceId, RemoteError> {
        let mut inner = self.lock();
        if inner.unreachable {
            return Err(RemoteError::Unreachable("mock platform is down".into()));
        }
        let script = inner
            .hosts
            .get(&host_id)
            .ok_or_else(|| RemoteError::NotFound(format!("host {}", host_id)))?;
        if let Some(error) = script.create_error.clone() {
            return Err(error);
        }

        inner.next_instance += 1;
        let id = InstanceId::new(1000 + inner.next_instance);
        let endpoint = format!("mock-{}:{}", id, spec.agent_port);

        inner.create_calls.push((host_id, id));
        inner.endpoints.insert(endpoint.clone(), id);
        inner.instances.insert(
            id,
            MockInstance {
                host_id,
                endpoint,
                polls: 0,
                destroyed: false,
            },
        );
        inner.live += 1;
        inner.max_live = inner.max_live.max(inner.live);
        Ok(id)
    }

    async fn instance_status(
        &self,
        instance_id: InstanceId,
    ) -> Result<InstanceStatus, RemoteError> {
        let mut inner = self.lock();
        if inner.unreachable {
            return Err(RemoteError::Unreachable("mock platform is down".into()));
        }
        let (host_id, polls, endpoint) = match inner.instances.get_mut(&instance_id) {
            Some(i) if !i.destroyed => {
                i.polls += 1;
                (i.host_id, i.polls, i.endpoint.clone())
            }
            _ => return Err(RemoteError::NotFound(format!("instance {}", instance_id))),
        };
        let boot = inner
            .hosts
            .get(&host_id)
            .map(|s| s.boot.clone())
            .unwrap_or(Boot::Never);

        let status = match boot {
            Boot::After(n) if polls > n => InstanceStatus::running(&endpoint),
            Boot::After(_) | Boot::Never => {
                InstanceStatus::new(RemoteState::Loading).with_message("pulling image")
            }
            Boot::Broken(status) => status,
        };
        Ok(status)
    }

    async fn destroy_instance(&self, instance_id: InstanceId) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        *inner.destroy_calls.entry(instance_id).or_insert(0) += 1;

        let host_id = match inner.instances.get(&instance_id) {
            Some(i) if !i.destroyed => i.host_id,
            _ => return Err(RemoteError::NotFound(format!("instance {}", instance_id))),
        };
        if let Some(script) = inner.hosts.get_mut(&host_id) {
            if script.destroy_failures > 0 {
                script.destroy_failures -= 1;
                return Err(RemoteError::Transient("mock destroy failure".into()));
            }
        }

        if let Some(instance) = inner.instances.get_mut(&instance_id) {
            instance.destroyed = true;
        }
        inner.live = inner.live.saturating_sub(1);
        Ok(())
    }
}

#[async_trait]
impl InstanceProbe for MockPlatform {
    async fn system_info(&self, endpoint: &str) -> Result<SystemInfo, RemoteError> {
        let script = self.enter_probe(endpoint, ProbeStep::SystemInfo).await?;
        let host = &script.record;
        Ok(script.system_info.unwrap_or_else(|| SystemInfo {
            gpu_count: host.gpu_count,
            gpu_model: host.gpu_model.clone(),
            driver_version: host.driver_version.to_string(),
            cpu_cores: host.cpu_cores,
            ram_gb: host.cpu_ram_gb,
            disk_free_gb: host.disk_gb,
        }))
    }

    async fn run_kernel(
        &self,
        endpoint: &str,
        _spec: KernelSpec,
    ) -> Result<KernelReport, RemoteError> {
        let script = self.enter_probe(endpoint, ProbeStep::Kernel).await?;
        let gpus = script.record.gpu_count;
        Ok(script.kernel.unwrap_or(KernelReport {
            devices_ok: gpus,
            devices_total: gpus,
            max_abs_error: 1e-6,
            elapsed_ms: 1200,
        }))
    }

    async fn stress(&self, endpoint: &str, duration: Duration) -> Result<StressReport, RemoteError> {
        let script = self.enter_probe(endpoint, ProbeStep::Stress).await?;
        let host = &script.record;
        let band = HardwareClass::of(host).band();
        Ok(script.stress.unwrap_or_else(|| StressReport {
            throughput_tflops: band.min_tflops_per_gpu * f64::from(host.gpu_count.max(1)) * 1.2,
            error_rate: 0.0,
            duration_secs: duration.as_secs(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> InstanceSpec {
        InstanceSpec {
            image: "gpu-selftest/agent:self-test-cu124".into(),
            disk_gb: 40.0,
            onstart_cmd: "/verification/remote.sh".into(),
            agent_port: 5000,
            env: Default::default(),
            label: "selftest".into(),
        }
    }

    #[tokio::test]
    async fn unknown_host_has_no_metadata() {
        let platform = MockPlatform::new();
        let result = platform.host_metadata(HostId::new(1)).await;
        assert!(matches!(result, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test]
    async fn instance_boots_after_scripted_polls() {
        let host = HostId::new(1);
        let platform = MockPlatform::healthy_fleet([host]);
        platform.boot_after(host, 2);

        let id = platform.create_instance(host, &spec()).await.unwrap();
        assert_eq!(platform.instance_status(id).await.unwrap().actual, RemoteState::Loading);
        assert_eq!(platform.instance_status(id).await.unwrap().actual, RemoteState::Loading);
        let status = platform.instance_status(id).await.unwrap();
        assert_eq!(status.actual, RemoteState::Running);
        assert_eq!(status.endpoint, Some(format!("mock-{}:5000", id)));
    }

    #[tokio::test]
    async fn destroy_counts_calls_and_reports_not_found_after() {
        let host = HostId::new(1);
        let platform = MockPlatform::healthy_fleet([host]);
        let id = platform.create_instance(host, &spec()).await.unwrap();
        assert_eq!(platform.live_instances(), 1);

        platform.destroy_instance(id).await.unwrap();
        assert!(platform.is_destroyed(id));
        assert_eq!(platform.live_instances(), 0);

        let again = platform.destroy_instance(id).await;
        assert!(matches!(again, Err(RemoteError::NotFound(_))));
        assert_eq!(platform.destroy_calls(id), 2);
    }

    #[tokio::test]
    async fn scripted_destroy_failures_are_transient() {
        let host = HostId::new(1);
        let platform = MockPlatform::healthy_fleet([host]);
        platform.fail_destroy(host, 1);
        let id = platform.create_instance(host, &spec()).await.unwrap();

        let first = platform.destroy_instance(id).await.unwrap_err();
        assert!(first.is_transient());
        platform.destroy_instance(id).await.unwrap();
        assert!(platform.is_destroyed(id));
    }

    #[tokio::test]
    async fn probe_reflects_host_record() {
        let host = HostId::new(3);
        let platform = MockPlatform::healthy_fleet([host]);
        platform.boot_after(host, 0);
        let id = platform.create_instance(host, &spec()).await.unwrap();
        let endpoint = platform.instance_status(id).await.unwrap().endpoint.unwrap();

        let info = platform.system_info(&endpoint).await.unwrap();
        assert_eq!(info.gpu_count, 4);
        assert_eq!(info.driver_version, "550.54.14");

        let stress = platform.stress(&endpoint, Duration::from_secs(30)).await.unwrap();
        let band = HardwareClass::Consumer.band();
        assert!(band.judge(&stress, 4).is_ok());
    }

    #[tokio::test]
    async fn probe_fails_after_destroy() {
        let host = HostId::new(3);
        let platform = MockPlatform::healthy_fleet([host]);
        platform.boot_after(host, 0);
        let id = platform.create_instance(host, &spec()).await.unwrap();
        let endpoint = platform.instance_status(id).await.unwrap().endpoint.unwrap();
        platform.destroy_instance(id).await.unwrap();

        assert!(platform.system_info(&endpoint).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_platform_fails_ping() {
        let platform = MockPlatform::new();
        platform.set_unreachable(true);
        assert!(matches!(platform.ping().await, Err(RemoteError::Unreachable(_))));
    }
}
