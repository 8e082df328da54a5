//! Partitioned price table on the local filesystem.
//!
//! Records live under Hive-style partition directories:
//!
//! ```text
//! <root>/pair=EURUSD/year=2017/part-<id>.csv
//! ```
//!
//! Appends add new fragments. Overwrites stage a full replacement directory
//! and swap it in by rename, so a live partition is never observable
//! half-written; anything a crash leaves behind carries a staged/displaced
//! marker in its name and is collected by `vacuum`.

use chrono::{Datelike, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::constants::{FRAGMENT_HEADER, STORE_TIMESTAMP_FORMAT};
use crate::error::{AppError, Result};
use crate::models::PriceRecord;

const PAIR_PREFIX: &str = "pair=";
const YEAR_PREFIX: &str = "year=";
const FRAGMENT_PREFIX: &str = "part-";
const STAGED_MARKER: &str = ".staged-";
const DISPLACED_MARKER: &str = ".old-";

/// Watermark of stored data for one pair: the newest year holding rows and
/// the newest month observed within that year. Recomputed from disk on every
/// call, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub year: i32,
    pub month: u32,
}

/// Rows written by one `append` call.
#[derive(Debug, Default)]
pub struct AppendStats {
    pub partitions_touched: usize,
    pub rows: usize,
}

/// Result of compacting one partition's fragments.
#[derive(Debug)]
pub struct CompactionStats {
    pub pair: String,
    pub year: i32,
    pub fragments_before: usize,
    pub rows: usize,
}

/// Orphaned artifacts found (and, unless a dry run, removed) by a vacuum sweep.
#[derive(Debug, Default)]
pub struct VacuumReport {
    pub orphans: Vec<PathBuf>,
    pub deleted: bool,
}

/// Filesystem-backed partitioned table of price records.
pub struct PriceStore {
    root: PathBuf,
}

impl PriceStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| AppError::Store(format!("Cannot create {}: {}", root.display(), e)))?;
        Ok(Self { root })
    }

    fn pair_dir(&self, pair: &str) -> PathBuf {
        self.root.join(format!("{}{}", PAIR_PREFIX, pair))
    }

    fn partition_dir(&self, pair: &str, year: i32) -> PathBuf {
        self.pair_dir(pair).join(format!("{}{}", YEAR_PREFIX, year))
    }

    /// Pair codes present in the table, sorted.
    pub fn partitions(&self) -> Result<Vec<String>> {
        let mut pairs = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.path().is_dir() {
                if let Some(code) = name.strip_prefix(PAIR_PREFIX) {
                    pairs.push(code.to_string());
                }
            }
        }
        pairs.sort_unstable();
        Ok(pairs)
    }

    /// Years stored for a pair, ascending. Staged and displaced directories
    /// are not live partitions and are skipped.
    pub fn years(&self, pair: &str) -> Result<Vec<i32>> {
        let dir = self.pair_dir(pair);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut years = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !entry.path().is_dir() || !name.starts_with(YEAR_PREFIX) {
                continue;
            }
            if name.contains(STAGED_MARKER) || name.contains(DISPLACED_MARKER) {
                continue;
            }
            match name[YEAR_PREFIX.len()..].parse::<i32>() {
                Ok(year) => years.push(year),
                Err(_) => warn!(partition = %name, "ignoring unparseable partition directory"),
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    /// Append records, one new fragment per touched (pair, year) partition.
    pub fn append(&self, records: &[PriceRecord]) -> Result<AppendStats> {
        let mut by_partition: BTreeMap<(String, i32), Vec<&PriceRecord>> = BTreeMap::new();
        for record in records {
            by_partition
                .entry((record.pair.clone(), record.year))
                .or_default()
                .push(record);
        }

        let mut stats = AppendStats::default();
        for ((pair, year), rows) in &by_partition {
            let dir = self.partition_dir(pair, *year);
            fs::create_dir_all(&dir)?;
            self.write_fragment(&dir, rows)?;
            stats.partitions_touched += 1;
            stats.rows += rows.len();
            debug!(pair = %pair, year, rows = rows.len(), "appended fragment");
        }
        Ok(stats)
    }

    /// Load every row of one partition, sorted by timestamp. Duplicate rows
    /// are returned as stored; deduplication is the clean pass's job.
    pub fn load_partition(&self, pair: &str, year: i32) -> Result<Vec<PriceRecord>> {
        let dir = self.partition_dir(pair, year);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        for fragment in self.fragments(&dir)? {
            let mut reader = csv::Reader::from_path(&fragment)?;
            for row in reader.records() {
                let row = row?;
                records.push(parse_fragment_row(&row, pair, &fragment)?);
            }
        }
        records.sort_by_key(|r| r.time);
        Ok(records)
    }

    /// Number of live fragments in one partition.
    pub fn fragment_count(&self, pair: &str, year: i32) -> Result<usize> {
        let dir = self.partition_dir(pair, year);
        if !dir.exists() {
            return Ok(0);
        }
        Ok(self.fragments(&dir)?.len())
    }

    /// Recompute the watermark for a pair: newest year with rows, and the
    /// newest month observed in that year.
    pub fn watermark(&self, pair: &str) -> Result<Option<Watermark>> {
        for &year in self.years(pair)?.iter().rev() {
            let records = self.load_partition(pair, year)?;
            if let Some(max_time) = records.iter().map(|r| r.time).max() {
                return Ok(Some(Watermark {
                    year,
                    month: max_time.month(),
                }));
            }
        }
        Ok(None)
    }

    /// Replace one partition's contents. The replacement is staged as a
    /// sibling directory and swapped in by rename; the displaced directory
    /// is removed, or left for `vacuum` if removal fails.
    pub fn overwrite_partition(
        &self,
        pair: &str,
        year: i32,
        records: &[PriceRecord],
    ) -> Result<()> {
        let pair_dir = self.pair_dir(pair);
        fs::create_dir_all(&pair_dir)?;

        let token = Uuid::new_v4().simple().to_string();
        let live = self.partition_dir(pair, year);
        let staged = pair_dir.join(format!("{}{}{}{}", YEAR_PREFIX, year, STAGED_MARKER, token));
        let displaced =
            pair_dir.join(format!("{}{}{}{}", YEAR_PREFIX, year, DISPLACED_MARKER, token));

        fs::create_dir_all(&staged)?;
        let rows: Vec<&PriceRecord> = records.iter().collect();
        self.write_fragment(&staged, &rows)?;

        if live.exists() {
            fs::rename(&live, &displaced)?;
        }
        fs::rename(&staged, &live)?;

        if displaced.exists() {
            if let Err(e) = fs::remove_dir_all(&displaced) {
                warn!(path = %displaced.display(), error = %e, "displaced partition left for vacuum");
            }
        }

        info!(pair = %pair, year, rows = records.len(), "partition overwritten");
        Ok(())
    }

    /// Merge a partition's fragments into one, sorted by timestamp. Returns
    /// `None` when the partition already has at most one fragment.
    pub fn compact_partition(&self, pair: &str, year: i32) -> Result<Option<CompactionStats>> {
        let fragments_before = self.fragment_count(pair, year)?;
        if fragments_before <= 1 {
            return Ok(None);
        }

        let records = self.load_partition(pair, year)?;
        self.overwrite_partition(pair, year, &records)?;
        info!(pair = %pair, year, fragments_before, "partition compacted");
        Ok(Some(CompactionStats {
            pair: pair.to_string(),
            year,
            fragments_before,
            rows: records.len(),
        }))
    }

    /// Sweep staged/displaced directories and stray temp files left behind
    /// by interrupted writes. A dry run only reports them.
    pub fn vacuum(&self, dry_run: bool) -> Result<VacuumReport> {
        let mut report = VacuumReport {
            orphans: Vec::new(),
            deleted: !dry_run,
        };

        for pair in self.partitions()? {
            let pair_dir = self.pair_dir(&pair);
            for entry in fs::read_dir(&pair_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if name.contains(STAGED_MARKER) || name.contains(DISPLACED_MARKER) {
                    report.orphans.push(entry.path());
                    continue;
                }
                if entry.path().is_dir() {
                    for file in fs::read_dir(entry.path())? {
                        let file = file?;
                        let file_name = file.file_name().to_string_lossy().into_owned();
                        if file_name.ends_with(".tmp") {
                            report.orphans.push(file.path());
                        }
                    }
                }
            }
        }
        report.orphans.sort_unstable();

        if !dry_run {
            for path in &report.orphans {
                let removed = if path.is_dir() {
                    fs::remove_dir_all(path)
                } else {
                    fs::remove_file(path)
                };
                match removed {
                    Ok(()) => info!(path = %path.display(), "removed orphaned artifact"),
                    Err(e) => warn!(path = %path.display(), error = %e, "could not remove artifact"),
                }
            }
        }

        Ok(report)
    }

    fn fragments(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut fragments = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(FRAGMENT_PREFIX) && name.ends_with(".csv") {
                fragments.push(entry.path());
            }
        }
        fragments.sort_unstable();
        Ok(fragments)
    }

    /// Write rows to a new fragment: temp file first, rename when complete.
    fn write_fragment(&self, dir: &Path, rows: &[&PriceRecord]) -> Result<PathBuf> {
        let name = format!("{}{}.csv", FRAGMENT_PREFIX, Uuid::new_v4().simple());
        let tmp = dir.join(format!("{}.tmp", name));
        let path = dir.join(&name);

        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            writer.write_record(FRAGMENT_HEADER)?;
            for row in rows {
                writer.write_record(&[
                    row.time.format(STORE_TIMESTAMP_FORMAT).to_string(),
                    row.open.to_string(),
                    row.high.to_string(),
                    row.low.to_string(),
                    row.close.to_string(),
                ])?;
            }
            writer.flush()?;
        }

        fs::rename(&tmp, &path)?;
        Ok(path)
    }
}

fn parse_fragment_row(
    row: &csv::StringRecord,
    pair: &str,
    fragment: &Path,
) -> Result<PriceRecord> {
    if row.len() < 5 {
        return Err(AppError::Parse(format!(
            "Truncated row in fragment {}",
            fragment.display()
        )));
    }

    let raw_time = row.get(0).unwrap_or("");
    let time = NaiveDateTime::parse_from_str(raw_time, STORE_TIMESTAMP_FORMAT).map_err(|e| {
        AppError::Parse(format!(
            "Bad timestamp '{}' in fragment {}: {}",
            raw_time,
            fragment.display(),
            e
        ))
    })?;

    let parse_price = |raw: &str| -> Result<f64> {
        raw.parse().map_err(|e| {
            AppError::Parse(format!(
                "Bad price '{}' in fragment {}: {}",
                raw,
                fragment.display(),
                e
            ))
        })
    };

    Ok(PriceRecord::new(
        time,
        parse_price(row.get(1).unwrap_or(""))?,
        parse_price(row.get(2).unwrap_or(""))?,
        parse_price(row.get(3).unwrap_or(""))?,
        parse_price(row.get(4).unwrap_or(""))?,
        pair.to_string(),
    ))
}
