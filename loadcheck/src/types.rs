//! Synthetic rows and the random source that produces them.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Index of the `cid` column.
pub const CID_COLUMN: usize = 0;
/// Index of the `txnid` column.
pub const TXNID_COLUMN: usize = 1;
/// Index of the `rowid` column, which holds the creation timestamp.
pub const ROWID_COLUMN: usize = 2;

/// A row submitted by a load driver.
///
/// The identity of a row is its `id`. `txnid` mirrors the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Row {
    pub id: i64,
    pub txnid: i64,
    /// Milliseconds since the Unix epoch at generation time.
    pub timestamp: i64,
}

impl Row {
    /// Creates a row for `id` stamped with the current time.
    pub fn new(id: i64) -> Self {
        Self {
            id,
            txnid: id,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Returns the value of the column at `index`, in the order `cid`, `txnid`, `rowid`.
    ///
    /// Out of range indexes fall back to the id column.
    pub fn column(&self, index: usize) -> i64 {
        match index {
            TXNID_COLUMN => self.txnid,
            ROWID_COLUMN => self.timestamp,
            _ => self.id,
        }
    }
}

/// Path a row takes to its terminating delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destiny {
    /// Copied into the copy table by the reconciliation worker, then deleted from both tables.
    CopyThenDelete,
    /// Deleted from the load table by the driver's direct-delete flush.
    DirectDelete,
}

impl Destiny {
    /// Number of rows the terminating delete must affect.
    pub fn expected_delete_count(&self) -> i64 {
        match self {
            Destiny::CopyThenDelete => 2,
            Destiny::DirectDelete => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Destiny::CopyThenDelete => "copy_then_delete",
            Destiny::DirectDelete => "direct_delete",
        }
    }
}

/// Random source of row ids and batch destinies.
///
/// Seeded generators produce the same sequence of ids and destinies on every run.
#[derive(Debug)]
pub struct RowGenerator {
    rng: StdRng,
}

impl RowGenerator {
    /// Creates a generator with a fixed seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Creates a generator seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Creates the generator of the pair at `pair_index`.
    ///
    /// With a harness seed every pair gets its own deterministic stream.
    pub fn for_pair(harness_seed: Option<u64>, pair_index: usize) -> Self {
        match harness_seed {
            Some(seed) => Self::seeded(seed.wrapping_add(pair_index as u64)),
            None => Self::from_entropy(),
        }
    }

    /// Draws the destiny shared by every row of the next batch: one in three batches is copied.
    pub fn next_destiny(&mut self) -> Destiny {
        if self.rng.random_ratio(1, 3) {
            Destiny::CopyThenDelete
        } else {
            Destiny::DirectDelete
        }
    }

    /// Draws a fresh row with a positive random id.
    pub fn next_row(&mut self) -> Row {
        Row::new(self.rng.random_range(1..=i64::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_generators_are_reproducible() {
        let mut a = RowGenerator::seeded(42);
        let mut b = RowGenerator::seeded(42);

        for _ in 0..50 {
            assert_eq!(a.next_destiny(), b.next_destiny());
            assert_eq!(a.next_row().id, b.next_row().id);
        }
    }

    #[test]
    fn pair_generators_differ_by_index() {
        let mut first = RowGenerator::for_pair(Some(7), 0);
        let mut second = RowGenerator::for_pair(Some(7), 1);

        let first_ids: Vec<i64> = (0..10).map(|_| first.next_row().id).collect();
        let second_ids: Vec<i64> = (0..10).map(|_| second.next_row().id).collect();
        assert_ne!(first_ids, second_ids);
    }

    #[test]
    fn row_ids_are_positive_and_mirrored() {
        let mut generator = RowGenerator::seeded(1);
        for _ in 0..100 {
            let row = generator.next_row();
            assert!(row.id > 0);
            assert_eq!(row.txnid, row.id);
            assert_eq!(row.column(CID_COLUMN), row.id);
            assert_eq!(row.column(ROWID_COLUMN), row.timestamp);
        }
    }

    #[test]
    fn destinies_are_roughly_one_in_three() {
        let mut generator = RowGenerator::seeded(3);
        let copies = (0..3_000)
            .filter(|_| generator.next_destiny() == Destiny::CopyThenDelete)
            .count();

        assert!((800..1_200).contains(&copies), "copies = {copies}");
    }

    #[test]
    fn expected_delete_counts() {
        assert_eq!(Destiny::CopyThenDelete.expected_delete_count(), 2);
        assert_eq!(Destiny::DirectDelete.expected_delete_count(), 1);
    }
}
