//! Deduplication & Compaction Pass over the price store.
//!
//! Partitions are independent units of consistency: a failure in one is
//! recorded in the report and the pass moves on. Running the pass twice
//! with no intervening ingestion leaves the second run a no-op.

use std::collections::HashSet;
use tracing::warn;

use crate::error::Result;
use crate::models::PriceRecord;
use crate::services::price_store::{CompactionStats, PriceStore, VacuumReport};

/// Outcome of cleaning one (pair, year) partition.
#[derive(Debug)]
pub struct PartitionCleanReport {
    pub pair: String,
    pub year: i32,
    pub rows_before: usize,
    pub duplicates_removed: usize,
    pub rows_after: usize,
    /// Duplicate keys still present after the overwrite. Non-zero means the
    /// dedup key was insufficient or the overwrite did not take effect.
    pub duplicates_remaining: usize,
    pub error: Option<String>,
}

impl PartitionCleanReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates_remaining == 0 && self.error.is_none()
    }
}

/// Aggregate report for one full pass.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub partitions: Vec<PartitionCleanReport>,
    pub compactions: Vec<CompactionStats>,
    /// Dry-run sweep, reported before anything is deleted.
    pub vacuum_preview: VacuumReport,
    /// The actual deletion sweep.
    pub vacuum: VacuumReport,
}

impl CleanReport {
    pub fn total_duplicates_removed(&self) -> usize {
        self.partitions.iter().map(|p| p.duplicates_removed).sum()
    }

    /// Partitions that still report duplicates or errored mid-clean.
    pub fn hard_errors(&self) -> Vec<&PartitionCleanReport> {
        self.partitions.iter().filter(|p| !p.is_clean()).collect()
    }
}

/// Remove duplicate rows, verify, compact fragments, then vacuum orphans.
///
/// Vacuum runs last: compaction's directory swaps produce the displaced
/// artifacts the sweep is there to collect.
pub fn clean(store: &PriceStore) -> Result<CleanReport> {
    let mut report = CleanReport::default();

    for pair in store.partitions()? {
        for year in store.years(&pair)? {
            report.partitions.push(clean_partition(store, &pair, year));
        }
    }

    for pair in store.partitions()? {
        for year in store.years(&pair)? {
            match store.compact_partition(&pair, year) {
                Ok(Some(stats)) => report.compactions.push(stats),
                Ok(None) => {}
                Err(e) => {
                    warn!(pair = %pair, year, error = %e, "compaction failed, partition left as-is")
                }
            }
        }
    }

    report.vacuum_preview = store.vacuum(true)?;
    report.vacuum = store.vacuum(false)?;

    Ok(report)
}

fn clean_partition(store: &PriceStore, pair: &str, year: i32) -> PartitionCleanReport {
    let mut entry = PartitionCleanReport {
        pair: pair.to_string(),
        year,
        rows_before: 0,
        duplicates_removed: 0,
        rows_after: 0,
        duplicates_remaining: 0,
        error: None,
    };

    let records = match store.load_partition(pair, year) {
        Ok(records) => records,
        Err(e) => {
            entry.error = Some(e.to_string());
            return entry;
        }
    };
    entry.rows_before = records.len();

    let deduped = dedup_records(&records);
    entry.duplicates_removed = records.len() - deduped.len();
    entry.rows_after = deduped.len();

    if entry.duplicates_removed == 0 {
        return entry;
    }

    if let Err(e) = store.overwrite_partition(pair, year, &deduped) {
        entry.error = Some(e.to_string());
        return entry;
    }

    // re-read and verify the overwrite took effect
    match store.load_partition(pair, year) {
        Ok(after) => {
            entry.rows_after = after.len();
            entry.duplicates_remaining = count_duplicates(&after);
            if entry.duplicates_remaining > 0 {
                warn!(
                    pair,
                    year,
                    remaining = entry.duplicates_remaining,
                    "duplicates remain after clean"
                );
            }
        }
        Err(e) => entry.error = Some(e.to_string()),
    }

    entry
}

/// Keep the first representative of every (timestamp, pair) key.
pub fn dedup_records(records: &[PriceRecord]) -> Vec<PriceRecord> {
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    for record in records {
        if seen.insert((record.time, record.pair.clone())) {
            kept.push(record.clone());
        }
    }
    kept
}

/// Count rows whose (timestamp, pair) key already appeared.
pub fn count_duplicates(records: &[PriceRecord]) -> usize {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|record| !seen.insert((record.time, record.pair.clone())))
        .count()
}
