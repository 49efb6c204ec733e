//! Helpers for testing the harness against in-process backends.

pub mod backend_wrapper;
pub mod config;
pub mod failpoints;
pub mod fault;
pub mod notify;
