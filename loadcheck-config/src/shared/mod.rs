//! Shared configuration types for load-check runs.

mod backend;
mod base;
mod connection;
mod harness;
mod metrics;
mod runner;
mod table;

pub use backend::{BackendConfig, MemoryBackendConfig};
pub use base::ValidationError;
pub use connection::{IntoConnectOptions, PgConnectionConfig};
pub use harness::{DriverConfig, HarnessConfig, ReconciliationConfig};
pub use metrics::MetricsConfig;
pub use runner::RunnerConfig;
pub use table::{Partitioning, TableConfig};
