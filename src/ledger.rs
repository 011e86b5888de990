//! Merging export drops into the canonical, duplicate-free usage ledger.

use crate::error::{Result, UsageError};
use crate::ingestion::{load_directory, LoadOutcome};
use crate::schema::*;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::collections::{BTreeSet, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Name of the "last updated" side-channel file written next to a ledger.
pub const TIMESTAMP_FILE: &str = "update.log";

/// Everything that makes two rows the same logical usage record:
/// all columns except quantity, cost and source file. A blank extra cell
/// and an absent extra column compare equal.
#[derive(PartialEq, Eq, Hash)]
struct RecordIdentity<'a> {
    date: NaiveDate,
    subscription_guid: &'a str,
    subscription_name: &'a str,
    service_type: &'a str,
    service_name: &'a str,
    service_resource: &'a str,
    extra: Vec<(&'a str, &'a str)>,
}

impl<'a> RecordIdentity<'a> {
    fn of(record: &'a UsageRecord) -> Self {
        Self {
            date: record.date,
            subscription_guid: &record.subscription_guid,
            subscription_name: &record.subscription_name,
            service_type: &record.service_type,
            service_name: &record.service_name,
            service_resource: &record.service_resource,
            extra: record
                .extra
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect(),
        }
    }
}

/// Keeps only the last row of every identity group, preserving the relative
/// order of the surviving rows.
pub fn deduplicate(table: UsageTable) -> UsageTable {
    if table.is_schemaless() && table.is_empty() {
        return table;
    }

    let columns = table.columns().to_vec();
    let records = table.into_records();

    let keep = {
        let mut seen = HashSet::with_capacity(records.len());
        let mut keep = vec![false; records.len()];
        for (idx, record) in records.iter().enumerate().rev() {
            keep[idx] = seen.insert(RecordIdentity::of(record));
        }
        keep
    };

    let deduped = records
        .into_iter()
        .zip(keep)
        .filter_map(|(record, keep)| keep.then_some(record))
        .collect();

    UsageTable::new(columns, deduped)
}

/// Concatenates tables (oldest drop first) and resolves duplicates in favour
/// of the most recently loaded drop.
pub fn concat_tables(tables: Vec<UsageTable>) -> UsageTable {
    if tables.is_empty() {
        return UsageTable::schemaless();
    }
    deduplicate(UsageTable::concat(tables))
}

/// Builds the ledger from `base_dir`: every immediate subdirectory is one
/// drop, loaded in name order, and loose files in `base_dir` form the most
/// current drop, loaded last.
///
/// Drops must sort chronologically by name for "latest wins" to hold.
/// An absent or unreadable base directory yields an empty ledger.
pub fn create_ledger(base_dir: &Path) -> Result<LoadOutcome> {
    if !base_dir.exists() {
        debug!("Base directory {} does not exist", base_dir.display());
        return Ok(LoadOutcome::empty());
    }

    let entries = match std::fs::read_dir(base_dir)
        .and_then(|dir| dir.collect::<std::io::Result<Vec<_>>>())
    {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read base directory {}: {}", base_dir.display(), e);
            return Ok(LoadOutcome::empty());
        }
    };

    let mut drops: Vec<PathBuf> = entries
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    drops.sort();
    drops.push(base_dir.to_path_buf());

    let mut tables = Vec::with_capacity(drops.len());
    let mut skipped = Vec::new();

    for drop_dir in &drops {
        let outcome = load_directory(drop_dir)?;
        tables.push(outcome.table);
        skipped.extend(outcome.skipped);
    }

    let raw_rows: usize = tables.iter().map(UsageTable::len).sum();
    let table = concat_tables(tables);

    info!(
        "Ledger built from {} drops: {} rows ({} duplicates dropped, {} files skipped)",
        drops.len(),
        table.len(),
        raw_rows - table.len(),
        skipped.len()
    );

    Ok(LoadOutcome { table, skipped })
}

/// Writes the ledger as `<latest date>-<earliest date>.csv` in `output_dir`.
pub fn export_ledger(table: &UsageTable, output_dir: &Path) -> Result<PathBuf> {
    let (first, last) = table.date_range().ok_or(UsageError::EmptyLedger)?;

    let file_name = format!(
        "{}-{}.csv",
        last.format("%Y-%m-%d"),
        first.format("%Y-%m-%d")
    );
    let path = output_dir.join(file_name);

    let extra_columns: BTreeSet<&str> = table
        .columns()
        .iter()
        .map(String::as_str)
        .filter(|c| !STANDARD_COLUMNS.contains(c) && *c != COL_SOURCE_FILE)
        .chain(
            table
                .records()
                .iter()
                .flat_map(|r| r.extra.keys().map(String::as_str)),
        )
        .collect();

    let mut writer = csv::Writer::from_path(&path)?;

    let mut header: Vec<&str> = STANDARD_COLUMNS.to_vec();
    header.extend(extra_columns.iter().copied());
    header.push(COL_SOURCE_FILE);
    writer.write_record(&header)?;

    for record in table.records() {
        let mut row = vec![
            record.date_str(),
            record.quantity.to_string(),
            record.cost.to_string(),
            record.subscription_guid.clone(),
            record.subscription_name.clone(),
            record.service_type.clone(),
            record.service_name.clone(),
            record.service_resource.clone(),
        ];
        row.extend(
            extra_columns
                .iter()
                .map(|c| record.extra.get(*c).cloned().unwrap_or_default()),
        );
        row.push(record.source_file.clone());
        writer.write_record(&row)?;
    }
    writer.flush()?;

    info!("Wrote {} ledger rows to {}", table.len(), path.display());
    Ok(path)
}

/// Records when the ledger was last prepared.
pub fn write_timestamp(output_dir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    let path = output_dir.join(TIMESTAMP_FILE);
    std::fs::write(&path, format!("{}\n", now.format("%Y-%m-%d %H:%M:%S%.6f")))?;
    Ok(path)
}

/// Merges every drop under `input_dir` into one ledger file in `output_dir`
/// and stamps the time of preparation.
pub fn prepare_ledger(input_dir: &Path, output_dir: &Path, now: NaiveDateTime) -> Result<PathBuf> {
    for dir in [input_dir, output_dir] {
        if !dir.is_dir() {
            return Err(UsageError::IoError(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} cannot be accessed", dir.display()),
            )));
        }
    }

    let outcome = create_ledger(input_dir)?;
    let path = export_ledger(&outcome.table, output_dir)?;
    write_timestamp(output_dir, now)?;
    Ok(path)
}
