use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Number of columns in a generated row (`cid`, `txnid`, `rowid`).
const ROW_COLUMN_COUNT: usize = 3;

/// How rows of a table are distributed across backend partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partitioning {
    /// Rows are routed to a single partition through a routing key.
    SinglePartition,
    /// Rows are written through multi-partition procedures without a routing key.
    MultiPartition,
}

impl Partitioning {
    /// Returns `true` for [`Partitioning::SinglePartition`].
    pub fn is_single_partition(&self) -> bool {
        matches!(self, Partitioning::SinglePartition)
    }
}

/// A table monitored by one load driver and its reconciliation worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    /// Name of the load table. The copy table is derived from it by the backend.
    pub name: String,
    /// Partitioning mode of the table.
    pub partitioning: Partitioning,
    /// Zero based index of the partitioned column used to derive routing keys.
    #[serde(default)]
    pub partition_column_index: usize,
}

impl TableConfig {
    /// Creates a table configuration partitioned on its first column.
    pub fn new(name: impl Into<String>, partitioning: Partitioning) -> Self {
        Self {
            name: name.into(),
            partitioning,
            partition_column_index: 0,
        }
    }

    /// Validates the table configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "tables.name".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.partition_column_index >= ROW_COLUMN_COUNT {
            return Err(ValidationError::InvalidFieldValue {
                field: format!("tables.{}.partition_column_index", self.name),
                constraint: format!("must be lower than {ROW_COLUMN_COUNT}"),
            });
        }

        Ok(())
    }
}
