//! CLI command implementations.

pub mod fleet;
pub mod machine;

use anyhow::{Context, Result};
use selftest_client::{
    quick_settings, session_over, stop_signal, HttpPlatform, HttpProbe, MockPlatform,
    PipelineSettings, SessionContext, StopSignal,
};
use selftest_core::{summarize, SelfTestReport};
use selftest_types::HostId;
use std::sync::Arc;

use crate::config::Config;

/// Everything the commands share.
#[derive(Debug)]
pub struct RunContext {
    /// Loaded configuration.
    pub config: Config,
    /// Resolved API key, if any.
    pub api_key: Option<String>,
    /// API URL override.
    pub url: Option<String>,
    /// Use the simulated platform.
    pub mock: bool,
    /// Print JSON instead of text.
    pub raw: bool,
}

impl RunContext {
    /// Build the platform session for a run over `hosts`.
    pub fn session(&self, hosts: &[HostId]) -> Result<SessionContext> {
        let settings = self.config.pipeline_settings();

        if self.mock {
            // simulated hosts are all healthy and boot instantly
            let platform = MockPlatform::healthy_fleet(hosts.iter().copied());
            let settings = PipelineSettings {
                requirements: settings.requirements,
                ..quick_settings()
            };
            return Ok(session_over(platform, settings));
        }

        let api_key = self.api_key.as_deref().context(
            "No API key. Pass --api-key, set SELFTEST_API_KEY or configure api.api_key_file",
        )?;
        let url = self.url.as_deref().unwrap_or(&self.config.api.url);
        let timeout = settings.provision.call_timeout;

        let client = HttpPlatform::new(url, api_key, timeout)
            .context("Failed to create platform client")?;
        let probe = HttpProbe::new(timeout).context("Failed to create agent client")?;
        Ok(SessionContext::new(
            Arc::new(client),
            Arc::new(probe),
            settings,
        ))
    }
}

/// Print one host's report as soon as it is ready.
pub fn print_report(report: &SelfTestReport) {
    println!("{}", summarize(report));
}

/// Stop signal raised by Ctrl+C.
///
/// In-flight hosts stop at their next stage boundary and still tear down.
pub fn stop_on_ctrl_c() -> StopSignal {
    let (handle, signal) = stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("stop requested, finishing teardown of running hosts");
            handle.stop();
        }
    });
    signal
}
