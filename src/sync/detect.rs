//! Change Detection Module
//!
//! Quantifies the difference between two successive dataset snapshots to
//! decide whether a refresh is worth telling the user about. Purely
//! advisory: the result never blocks or retries data flow.

use std::collections::HashMap;

use crate::models::DataRecord;

// == Dataset Diff ==
/// Counts describing how a dataset changed between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetDiff {
    /// Item count of the new dataset
    pub total: usize,
    /// Records present only in the new dataset
    pub added: usize,
    /// Records present only in the old dataset
    pub removed: usize,
    /// Records present in both with materially different values
    pub updated: usize,
    /// Fraction of the dataset that must change to count as significant
    pub threshold: f64,
}

impl DatasetDiff {
    /// Total number of changed records.
    pub fn changed(&self) -> usize {
        self.added + self.removed + self.updated
    }

    // == Significance ==
    /// True when the changed fraction reaches the threshold.
    pub fn has_significant_changes(&self) -> bool {
        self.changed() as f64 / self.total.max(1) as f64 >= self.threshold
    }

    // == Summary ==
    /// One-line human-readable description of the change.
    pub fn summary(&self) -> String {
        format!(
            "{} of {} records changed ({} added, {} removed, {} updated)",
            self.changed(),
            self.total,
            self.added,
            self.removed,
            self.updated
        )
    }
}

// == Diff Datasets ==
/// Compares two snapshots keyed by record id.
///
/// A record counts as updated when it exists under the same id in both
/// snapshots but its value set differs.
pub fn diff_datasets<T: DataRecord + PartialEq>(
    old: &[T],
    new: &[T],
    threshold: f64,
) -> DatasetDiff {
    let old_by_id: HashMap<&str, &T> = old.iter().map(|r| (r.record_id(), r)).collect();

    let mut added = 0;
    let mut updated = 0;
    for record in new {
        match old_by_id.get(record.record_id()) {
            None => added += 1,
            Some(previous) if *previous != record => updated += 1,
            Some(_) => {}
        }
    }

    let new_ids: std::collections::HashSet<&str> =
        new.iter().map(|r| r.record_id()).collect();
    let removed = old
        .iter()
        .filter(|r| !new_ids.contains(r.record_id()))
        .count();

    DatasetDiff {
        total: new.len(),
        added,
        removed,
        updated,
        threshold,
    }
}
