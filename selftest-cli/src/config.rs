//! Configuration loading for the selftest CLI.
//!
//! Configuration is read from `selftest.toml`. Every section and field is
//! optional; anything missing falls back to the built-in defaults.

use selftest_client::{DiagnosticSettings, DiagnosticSuite, PipelineSettings, ProvisionSettings};
use selftest_core::{ImageSettings, RequirementThresholds, RetryPolicy};
use selftest_types::KernelSpec;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the platform API key.
pub const API_KEY_ENV: &str = "SELFTEST_API_KEY";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Platform API access.
    pub api: ApiConfig,
    /// Thresholds checked before provisioning.
    pub requirements: RequirementThresholds,
    /// Instance creation and readiness polling.
    pub provision: ProvisionConfig,
    /// Destroy retries.
    pub teardown: TeardownConfig,
    /// Diagnostic case timing.
    pub diagnostics: DiagnosticsConfig,
    /// Fleet run defaults.
    pub fleet: FleetConfig,
}

/// Platform API access.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Marketplace API base URL.
    #[serde(default = "default_api_url")]
    pub url: String,
    /// File holding the API key.
    #[serde(default)]
    pub api_key_file: Option<PathBuf>,
}

/// Instance creation and readiness polling.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvisionConfig {
    /// Deadline for the instance to become ready (default: 900).
    #[serde(default = "default_provision_timeout")]
    pub timeout_secs: u64,
    /// Status polls before giving up.
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    /// First delay between polls.
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    /// Largest delay between polls.
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,
    /// Disk requested for the test instance (default: 40 GB).
    #[serde(default = "default_disk_gb")]
    pub disk_gb: f64,
    /// Repository of the diagnostic image.
    #[serde(default = "default_image_repo")]
    pub image_repo: String,
}

/// Destroy retries.
#[derive(Debug, Clone, Deserialize)]
pub struct TeardownConfig {
    /// Destroy calls before reporting a leak.
    #[serde(default = "default_teardown_attempts")]
    pub attempts: u32,
    /// First delay between destroy calls.
    #[serde(default = "default_teardown_initial_ms")]
    pub initial_ms: u64,
    /// Largest delay between destroy calls.
    #[serde(default = "default_teardown_max_ms")]
    pub max_ms: u64,
}

/// Diagnostic case timing.
#[derive(Debug, Clone, Deserialize)]
pub struct DiagnosticsConfig {
    /// Timeout for each non-stress case.
    #[serde(default = "default_case_timeout")]
    pub case_timeout_secs: u64,
    /// How long the stress case runs.
    #[serde(default = "default_stress_secs")]
    pub stress_secs: u64,
    /// Matrix size of the GPU kernel.
    #[serde(default = "default_kernel_size")]
    pub kernel_size: u32,
}

/// Fleet run defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    /// Pipelines running at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Where passing host ids are written.
    #[serde(default = "default_passed_file")]
    pub passed_file: PathBuf,
    /// Where failing host ids are written.
    #[serde(default = "default_failed_file")]
    pub failed_file: PathBuf,
}

// Default value functions
fn default_api_url() -> String {
    selftest_client::DEFAULT_API_URL.to_string()
}

fn default_provision_timeout() -> u64 {
    900 // 15 minutes
}

fn default_poll_attempts() -> u32 {
    RetryPolicy::provisioning().max_attempts
}

fn default_poll_initial_ms() -> u64 {
    RetryPolicy::provisioning().initial_backoff.as_millis() as u64
}

fn default_poll_max_ms() -> u64 {
    RetryPolicy::provisioning().max_backoff.as_millis() as u64
}

fn default_disk_gb() -> f64 {
    ImageSettings::default().disk_gb
}

fn default_image_repo() -> String {
    ImageSettings::default().repo
}

fn default_teardown_attempts() -> u32 {
    RetryPolicy::teardown().max_attempts
}

fn default_teardown_initial_ms() -> u64 {
    RetryPolicy::teardown().initial_backoff.as_millis() as u64
}

fn default_teardown_max_ms() -> u64 {
    RetryPolicy::teardown().max_backoff.as_millis() as u64
}

fn default_case_timeout() -> u64 {
    120
}

fn default_stress_secs() -> u64 {
    60
}

fn default_kernel_size() -> u32 {
    KernelSpec::default().matrix_size
}

fn default_concurrency() -> usize {
    4
}

fn default_passed_file() -> PathBuf {
    PathBuf::from("Pass_testresults.log")
}

fn default_failed_file() -> PathBuf {
    PathBuf::from("Error_testresults.log")
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            url: default_api_url(),
            api_key_file: None,
        }
    }
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provision_timeout(),
            poll_attempts: default_poll_attempts(),
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            disk_gb: default_disk_gb(),
            image_repo: default_image_repo(),
        }
    }
}

impl Default for TeardownConfig {
    fn default() -> Self {
        Self {
            attempts: default_teardown_attempts(),
            initial_ms: default_teardown_initial_ms(),
            max_ms: default_teardown_max_ms(),
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            case_timeout_secs: default_case_timeout(),
            stress_secs: default_stress_secs(),
            kernel_size: default_kernel_size(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            passed_file: default_passed_file(),
            failed_file: default_failed_file(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load the explicit file, or the default file when it exists.
    ///
    /// An explicit path must exist. A missing default file means defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Pipeline settings described by this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        let diagnostics = DiagnosticSettings {
            case_timeout: Duration::from_secs(self.diagnostics.case_timeout_secs),
            stress_duration: Duration::from_secs(self.diagnostics.stress_secs),
            kernel: KernelSpec {
                matrix_size: self.diagnostics.kernel_size,
                ..KernelSpec::default()
            },
        };

        PipelineSettings {
            requirements: self.requirements.requirements(),
            provision: ProvisionSettings {
                timeout: Duration::from_secs(self.provision.timeout_secs),
                poll: RetryPolicy::new(
                    self.provision.poll_attempts,
                    Duration::from_millis(self.provision.poll_initial_ms),
                    Duration::from_millis(self.provision.poll_max_ms),
                ),
                image: ImageSettings {
                    repo: self.provision.image_repo.clone(),
                    disk_gb: self.provision.disk_gb,
                    ..ImageSettings::default()
                },
                ..ProvisionSettings::default()
            },
            teardown: RetryPolicy::new(
                self.teardown.attempts,
                Duration::from_millis(self.teardown.initial_ms),
                Duration::from_millis(self.teardown.max_ms),
            ),
            suite: DiagnosticSuite::standard(&diagnostics),
        }
    }

    /// Resolve the API key: flag, then environment, then key file.
    pub fn api_key(&self, flag: Option<&str>) -> Result<Option<String>, ConfigError> {
        let env = std::env::var(API_KEY_ENV).ok();
        resolve_api_key(flag, env.as_deref(), self.api.api_key_file.as_deref())
    }
}

fn resolve_api_key(
    flag: Option<&str>,
    env: Option<&str>,
    key_file: Option<&Path>,
) -> Result<Option<String>, ConfigError> {
    let given = [flag, env]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|k| !k.is_empty());
    if let Some(key) = given {
        return Ok(Some(key.to_string()));
    }

    let Some(path) = key_file else {
        return Ok(None);
    };
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let key = content.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

/// Default location of `selftest.toml` under the platform config directory.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ydun", "selftest")
        .map(|dirs| dirs.config_dir().join("selftest.toml"))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a configuration or key file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
