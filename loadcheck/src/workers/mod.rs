pub mod base;
pub mod load_driver;
pub mod policy;
pub mod pool;
pub mod reconciliation;
