use std::path::Path;

use ag_limiter::LimiterConfig;
use config::Config;
use config::ConfigError;
use config::File;
use serde::Deserialize;

/// Settings for the demo submitter binary
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of simulated submissions to issue
    pub operations: u32,

    /// Simulated downstream latency per submission
    pub work_ms: u64,

    pub log_dir: String,
    pub log_level: String,
    pub log_stdout: bool,

    pub limiter: LimiterConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            operations: 12,
            work_ms: 50,
            log_dir: "./logs".to_string(),
            log_level: "info".to_string(),
            log_stdout: true,
            limiter: LimiterConfig::default(),
        }
    }
}

pub fn load_demo_config<P: AsRef<Path>>(path: P) -> Result<DemoConfig, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).build()?;

    config.try_deserialize()
}

/// Load demo config with fallback to default
///
/// Runs before tracing is installed, so the outcome is returned alongside the
/// config for the caller to log.
pub fn load_demo_config_or_default(path: &str) -> (DemoConfig, Option<ConfigError>) {
    match load_demo_config(path) {
        Ok(config) => (config, None),
        Err(err) => (DemoConfig::default(), Some(err)),
    }
}
