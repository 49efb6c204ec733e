//! Load generation and reconciliation harness.
//!
//! A [`harness::Harness`] starts one load driver and one reconciliation worker per monitored
//! table. Drivers submit rows under a shared admission limit and route each accepted row either
//! to the copy queue or to a direct-delete buffer. Workers copy queued rows and delete them from
//! both tables, checking the number of affected rows of every delete. Any miscount stops the
//! pair that observed it.

pub mod backend;
pub mod concurrency;
pub mod error;
pub mod failpoints;
pub mod harness;
mod macros;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;
pub mod types;
pub mod workers;
