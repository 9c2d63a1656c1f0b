//! Test image selection and instance spec construction.

use selftest_types::{HostRecord, InstanceSpec};
use std::collections::BTreeMap;
use thiserror::Error;

/// CUDA versions with a published self-test image, as (tenths, tag).
const CUDA_TAGS: &[(u32, &str)] = &[
    (118, "cu118"),
    (121, "cu121"),
    (124, "cu124"),
    (126, "cu126"),
    (128, "cu128"),
];

/// No self-test image fits the host.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("no self-test image for CUDA {0} or any lower version")]
pub struct UnsupportedCuda(pub f64);

/// Pick the image tag for a host's max CUDA version.
///
/// Uses the highest mapped version not above the host's, stepping down
/// in 0.1 increments.
pub fn cuda_image_tag(cuda_max_good: f64) -> Result<&'static str, UnsupportedCuda> {
    if !cuda_max_good.is_finite() {
        return Err(UnsupportedCuda(cuda_max_good));
    }
    let tenths = (cuda_max_good * 10.0 + 1e-6).floor() as i64;
    CUDA_TAGS
        .iter()
        .rev()
        .find(|(v, _)| i64::from(*v) <= tenths)
        .map(|(_, tag)| *tag)
        .ok_or(UnsupportedCuda(cuda_max_good))
}

/// Knobs for building the self-test [`InstanceSpec`].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSettings {
    /// Image repository, tagged `self-test-<cuda tag>`.
    pub repo: String,
    /// Disk to request in GB.
    pub disk_gb: f64,
    /// Port the diagnostic agent listens on inside the container.
    pub agent_port: u16,
    /// Command that starts the agent.
    pub onstart_cmd: String,
}

impl Default for ImageSettings {
    fn default() -> Self {
        Self {
            repo: "gpu-selftest/agent".to_string(),
            disk_gb: 40.0,
            agent_port: 5000,
            onstart_cmd: "/verification/remote.sh".to_string(),
        }
    }
}

impl ImageSettings {
    /// Build the instance spec for a host.
    pub fn spec_for(&self, host: &HostRecord) -> Result<InstanceSpec, UnsupportedCuda> {
        let tag = cuda_image_tag(host.cuda_max_good)?;
        let mut env = BTreeMap::new();
        env.insert("SELFTEST_HOST_ID".to_string(), host.id.to_string());
        env.insert("SELFTEST_GPU_COUNT".to_string(), host.gpu_count.to_string());

        Ok(InstanceSpec {
            image: format!("{}:self-test-{}", self.repo, tag),
            disk_gb: self.disk_gb,
            onstart_cmd: self.onstart_cmd.clone(),
            agent_port: self.agent_port,
            env,
            label: format!("selftest-{}", host.id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selftest_types::HostId;

    #[test]
    fn exact_versions_map_directly() {
        assert_eq!(cuda_image_tag(11.8).unwrap(), "cu118");
        assert_eq!(cuda_image_tag(12.4).unwrap(), "cu124");
        assert_eq!(cuda_image_tag(12.8).unwrap(), "cu128");
    }

    #[test]
    fn in_between_versions_fall_back() {
        assert_eq!(cuda_image_tag(12.2).unwrap(), "cu121");
        assert_eq!(cuda_image_tag(12.0).unwrap(), "cu118");
        assert_eq!(cuda_image_tag(13.0).unwrap(), "cu128");
    }

    #[test]
    fn float_noise_does_not_drop_a_version() {
        assert_eq!(cuda_image_tag(12.1 - 1e-12).unwrap(), "cu121");
    }

    #[test]
    fn too_old_is_unsupported() {
        assert_eq!(cuda_image_tag(11.7), Err(UnsupportedCuda(11.7)));
        assert!(cuda_image_tag(f64::NAN).is_err());
    }

    #[test]
    fn spec_for_host() {
        let host = HostRecord {
            id: HostId::new(54321),
            gpu_count: 2,
            cuda_max_good: 12.6,
            ..Default::default()
        };
        let spec = ImageSettings::default().spec_for(&host).unwrap();
        assert_eq!(spec.image, "gpu-selftest/agent:self-test-cu126");
        assert_eq!(spec.disk_gb, 40.0);
        assert_eq!(spec.label, "selftest-54321");
        assert_eq!(spec.env["SELFTEST_GPU_COUNT"], "2");
    }
}
