use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Settings of the in-process memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MemoryBackendConfig {
    /// Maximum number of outstanding calls before new calls are rejected.
    #[serde(default = "default_max_outstanding_calls")]
    pub max_outstanding_calls: usize,
    /// Simulated latency, in milliseconds, applied before every response.
    #[serde(default)]
    pub latency_ms: u64,
}

impl MemoryBackendConfig {
    /// Default cap on outstanding calls.
    pub const DEFAULT_MAX_OUTSTANDING_CALLS: usize = 10_000;
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            max_outstanding_calls: default_max_outstanding_calls(),
            latency_ms: 0,
        }
    }
}

/// Backend the harness drives.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process store, useful for smoke runs of the harness itself.
    Memory(MemoryBackendConfig),
    /// Postgres database accessed through a connection pool.
    Postgres {
        /// Connection settings.
        connection: PgConnectionConfig,
        /// Maximum number of outstanding calls before new calls are rejected.
        #[serde(default = "default_max_outstanding_calls")]
        max_outstanding_calls: usize,
    },
}

impl BackendConfig {
    /// Validates the backend settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let max_outstanding_calls = match self {
            BackendConfig::Memory(config) => config.max_outstanding_calls,
            BackendConfig::Postgres {
                connection,
                max_outstanding_calls,
            } => {
                connection.validate()?;
                *max_outstanding_calls
            }
        };

        if max_outstanding_calls == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "backend.max_outstanding_calls".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_max_outstanding_calls() -> usize {
    MemoryBackendConfig::DEFAULT_MAX_OUTSTANDING_CALLS
}
