//! Logging and metrics initialization shared by the harness binaries and tests.

pub mod metrics;
pub mod tracing;

pub use self::tracing::{init_test_tracing, init_tracing};
