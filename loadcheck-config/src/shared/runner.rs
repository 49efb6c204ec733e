use serde::Deserialize;

use crate::Config;
use crate::shared::{BackendConfig, HarnessConfig, MetricsConfig, ValidationError};

/// Top-level configuration of the runner binary.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RunnerConfig {
    /// Harness settings.
    pub harness: HarnessConfig,
    /// Backend the harness drives.
    pub backend: BackendConfig,
    /// Optional Prometheus exporter. Metrics are only recorded in-process when absent.
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

impl RunnerConfig {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.harness.validate()?;
        self.backend.validate()
    }
}

impl Config for RunnerConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
