use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::shared::{TableConfig, ValidationError};

/// Configuration of the load driver loop shared by every table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DriverConfig {
    /// Number of rows submitted per insert batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause, in milliseconds, applied when an iteration observes no progress.
    #[serde(default = "default_throttle_ms")]
    pub throttle_ms: u64,
}

impl DriverConfig {
    /// Default number of rows per insert batch.
    pub const DEFAULT_BATCH_SIZE: usize = 200;

    /// Default no-progress throttle: 1 second.
    pub const DEFAULT_THROTTLE_MS: u64 = 1_000;

    /// Returns the throttle pause as a [`Duration`].
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    /// Validates driver settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.batch_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "driver.batch_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            throttle_ms: default_throttle_ms(),
        }
    }
}

/// Configuration of the reconciliation worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReconciliationConfig {
    /// Sleep, in milliseconds, after a drain attempt that yielded no ids.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
}

impl ReconciliationConfig {
    /// Default idle interval: 2 seconds.
    pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 2_000;

    /// Returns the idle interval as a [`Duration`].
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
        }
    }
}

/// Configuration of a harness run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Tables to monitor, one driver/worker pair each.
    pub tables: Vec<TableConfig>,
    /// Maximum number of row submissions in flight across all drivers.
    #[serde(default = "default_admission_permits")]
    pub admission_permits: usize,
    /// Load driver settings.
    #[serde(default)]
    pub driver: DriverConfig,
    /// Reconciliation worker settings.
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    /// Seed for row ids and destinies. When absent, every pair seeds from OS entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl HarnessConfig {
    /// Default number of admission permits.
    pub const DEFAULT_ADMISSION_PERMITS: usize = 1_000;

    /// Creates a configuration for `tables` with default settings.
    pub fn new(tables: Vec<TableConfig>) -> Self {
        Self {
            tables,
            admission_permits: default_admission_permits(),
            driver: DriverConfig::default(),
            reconciliation: ReconciliationConfig::default(),
            seed: None,
        }
    }

    /// Validates the harness configuration and every table in it.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        let mut names = HashSet::with_capacity(self.tables.len());
        for table in &self.tables {
            table.validate()?;
            if !names.insert(table.name.as_str()) {
                return Err(ValidationError::DuplicateTable(table.name.clone()));
            }
        }

        if self.admission_permits == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "admission_permits".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.driver.validate()
    }
}

fn default_batch_size() -> usize {
    DriverConfig::DEFAULT_BATCH_SIZE
}

fn default_throttle_ms() -> u64 {
    DriverConfig::DEFAULT_THROTTLE_MS
}

fn default_idle_interval_ms() -> u64 {
    ReconciliationConfig::DEFAULT_IDLE_INTERVAL_MS
}

fn default_admission_permits() -> usize {
    HarnessConfig::DEFAULT_ADMISSION_PERMITS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::Partitioning;

    #[test]
    fn deserializes_with_defaults() {
        let config: HarnessConfig = serde_json::from_str(
            r#"{"tables": [{"name": "loadp", "partitioning": "single_partition"}]}"#,
        )
        .unwrap();

        assert_eq!(config.admission_permits, HarnessConfig::DEFAULT_ADMISSION_PERMITS);
        assert_eq!(config.driver, DriverConfig::default());
        assert_eq!(config.reconciliation.idle_interval(), Duration::from_secs(2));
        assert_eq!(config.tables[0].partition_column_index, 0);
        assert_eq!(config.seed, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_duplicate_tables() {
        let config = HarnessConfig::new(vec![
            TableConfig::new("loadp", Partitioning::SinglePartition),
            TableConfig::new("loadp", Partitioning::MultiPartition),
        ]);

        assert_eq!(
            config.validate(),
            Err(ValidationError::DuplicateTable("loadp".to_string()))
        );
    }

    #[test]
    fn rejects_zero_batch_size_and_permits() {
        let mut config =
            HarnessConfig::new(vec![TableConfig::new("loadmp", Partitioning::MultiPartition)]);
        config.driver.batch_size = 0;
        assert!(config.validate().is_err());

        config.driver.batch_size = 10;
        config.admission_permits = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_partition_column() {
        let mut table = TableConfig::new("loadp", Partitioning::SinglePartition);
        table.partition_column_index = 3;

        assert!(HarnessConfig::new(vec![table]).validate().is_err());
    }

    #[test]
    fn rejects_empty_tables() {
        assert_eq!(
            HarnessConfig::new(vec![]).validate(),
            Err(ValidationError::NoTables)
        );
    }
}
