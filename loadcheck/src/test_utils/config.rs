use loadcheck_config::shared::{
    DriverConfig, HarnessConfig, Partitioning, ReconciliationConfig, TableConfig,
};

/// Driver settings with a short throttle.
pub fn fast_driver_config(batch_size: usize) -> DriverConfig {
    DriverConfig {
        batch_size,
        throttle_ms: 10,
    }
}

/// Worker settings with a short idle interval.
pub fn fast_reconciliation_config() -> ReconciliationConfig {
    ReconciliationConfig {
        idle_interval_ms: 10,
    }
}

/// Seeded harness settings for `tables` with fast intervals.
pub fn test_harness_config(tables: &[(&str, Partitioning)], batch_size: usize) -> HarnessConfig {
    let tables = tables
        .iter()
        .map(|(name, partitioning)| TableConfig::new(*name, *partitioning))
        .collect();

    HarnessConfig {
        tables,
        admission_permits: 1_000,
        driver: fast_driver_config(batch_size),
        reconciliation: fast_reconciliation_config(),
        seed: Some(42),
    }
}
