//! Coordination primitives shared by load drivers and reconciliation workers.

pub mod admission;
pub mod barrier;
pub mod queue;
pub mod shutdown;
