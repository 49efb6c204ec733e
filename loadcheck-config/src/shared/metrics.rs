use serde::{Deserialize, Serialize};

/// Prometheus exporter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricsConfig {
    /// Port the `/metrics` listener binds to.
    pub port: u16,
}
