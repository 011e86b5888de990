//! Reading one export drop: filename validation, date-convention detection
//! and schema normalization for every usage CSV in a directory.

use crate::error::{Result, UsageError};
use crate::schema::*;
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const EDUHUB_MARKER: &str = "eduhub_";
const FILENAME_DATE_FORMAT: &str = "%Y-%m-%d";

/// Date conventions tried for files exported before the US -> UK switch.
pub const US_FIRST_DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d"];
/// Date conventions tried for files exported after the switch.
pub const UK_FIRST_DATE_FORMATS: &[&str] = &["%d/%m/%Y", "%m/%d/%Y", "%Y-%m-%d"];

/// Last day on which exports still used the US month/day convention.
pub fn date_cutover() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 24).unwrap_or(NaiveDate::MIN)
}

/// Outcome of checking an export filename against `<end>-<start>.csv`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilenameCheck {
    Valid {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    /// Both tokens parse but the start is not strictly before the end.
    Inverted {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },
    /// At least one date token is not a `YYYY-MM-DD` calendar date.
    Malformed,
}

impl FilenameCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, FilenameCheck::Valid { .. })
    }

    /// Start date of a valid name only.
    pub fn start_date(&self) -> Option<NaiveDate> {
        match self {
            FilenameCheck::Valid { start_date, .. } => Some(*start_date),
            _ => None,
        }
    }

    /// End date of a valid name only.
    pub fn end_date(&self) -> Option<NaiveDate> {
        match self {
            FilenameCheck::Valid { end_date, .. } => Some(*end_date),
            _ => None,
        }
    }
}

/// Checks that `filename` reads `<end YYYY-MM-DD>-<start YYYY-MM-DD>.csv`,
/// optionally prefixed with `eduhub_` in any case. Spaces are ignored.
///
/// Failures are logged and returned, never raised: callers still ingest the
/// file and only use the result to pick a date convention.
pub fn check_filename_convention(filename: &str) -> FilenameCheck {
    let lowered = filename.to_lowercase();
    let name = match lowered.find(EDUHUB_MARKER) {
        Some(idx) => &lowered[idx + EDUHUB_MARKER.len()..],
        None => lowered.as_str(),
    };
    let compact: String = name.chars().filter(|c| *c != ' ').collect();

    let end_date = compact.get(0..10).and_then(parse_filename_date);
    let start_date = compact.get(11..21).and_then(parse_filename_date);

    match (start_date, end_date) {
        (Some(start_date), Some(end_date)) if start_date < end_date => FilenameCheck::Valid {
            start_date,
            end_date,
        },
        (Some(start_date), Some(end_date)) => {
            warn!(
                "File name {} has incorrect format: start {} is not before end {}",
                filename, start_date, end_date
            );
            FilenameCheck::Inverted {
                start_date,
                end_date,
            }
        }
        _ => {
            warn!("File name {} has incorrect format", filename);
            FilenameCheck::Malformed
        }
    }
}

fn parse_filename_date(token: &str) -> Option<NaiveDate> {
    let date = NaiveDate::parse_from_str(token, FILENAME_DATE_FORMAT).ok()?;
    // chrono accepts unpadded fields; the convention does not
    (date.format(FILENAME_DATE_FORMAT).to_string() == token).then_some(date)
}

/// Candidate date conventions for a file, most likely first.
pub fn date_formats_for(start_hint: Option<NaiveDate>) -> &'static [&'static str] {
    match start_hint {
        Some(start) if start > date_cutover() => UK_FIRST_DATE_FORMATS,
        _ => US_FIRST_DATE_FORMATS,
    }
}

/// Parses a whole date column with the first format that accepts every value.
pub fn parse_date_column(file: &str, values: &[&str], formats: &[&str]) -> Result<Vec<NaiveDate>> {
    for fmt in formats {
        let parsed: Option<Vec<NaiveDate>> = values
            .iter()
            .map(|v| NaiveDate::parse_from_str(v.trim(), fmt).ok())
            .collect();

        if let Some(dates) = parsed {
            debug!("{}: date column parsed with {}", file, fmt);
            return Ok(dates);
        }
    }

    let offending = values
        .iter()
        .find(|v| {
            formats
                .iter()
                .all(|fmt| NaiveDate::parse_from_str(v.trim(), fmt).is_err())
        })
        .or_else(|| values.first())
        .map(|v| v.to_string())
        .unwrap_or_default();

    Err(UsageError::DateColumn {
        file: file.to_string(),
        value: offending,
        tried: formats.join(", "),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Rows read from a directory tree plus the files that had to be left out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOutcome {
    pub table: UsageTable,
    pub skipped: Vec<SkippedFile>,
}

impl LoadOutcome {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Column positions of one CSV file after schema normalization.
struct FileLayout {
    date: usize,
    quantity: usize,
    cost: usize,
    subscription_guid: usize,
    subscription_name: usize,
    service_type: usize,
    service_name: usize,
    service_resource: usize,
    extra: Vec<(usize, String)>,
    columns: Vec<String>,
}

impl FileLayout {
    fn resolve(headers: &csv::StringRecord, file: &str) -> Result<Self> {
        let is_eduhub = headers.iter().any(|h| h == COL_HANDOUT_NAME);
        if is_eduhub {
            debug!("{}: EduHub schema detected", file);
        }

        let position = |column: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == column)
                .ok_or_else(|| UsageError::MissingColumn {
                    file: file.to_string(),
                    column: column.to_string(),
                })
        };

        let name_column = if is_eduhub {
            COL_HANDOUT_NAME
        } else {
            COL_SUBSCRIPTION_NAME
        };

        let mut columns = Vec::with_capacity(headers.len() + 1);
        let mut extra = Vec::new();

        for (idx, header) in headers.iter().enumerate() {
            let normalized = match header {
                COL_HANDOUT_NAME => COL_SUBSCRIPTION_NAME,
                COL_SUBSCRIPTION_NAME if is_eduhub => continue,
                COL_LAB_NAME | COL_COURSE_NAME if is_eduhub => continue,
                COL_SOURCE_FILE => continue,
                other => other,
            };
            if !STANDARD_COLUMNS.contains(&normalized) {
                extra.push((idx, normalized.to_string()));
            }
            columns.push(normalized.to_string());
        }
        columns.push(COL_SOURCE_FILE.to_string());

        Ok(Self {
            date: position(COL_DATE)?,
            quantity: position(COL_QUANTITY)?,
            cost: position(COL_COST)?,
            subscription_guid: position(COL_SUBSCRIPTION_GUID)?,
            subscription_name: position(name_column)?,
            service_type: position(COL_SERVICE_TYPE)?,
            service_name: position(COL_SERVICE_NAME)?,
            service_resource: position(COL_SERVICE_RESOURCE)?,
            extra,
            columns,
        })
    }
}

/// Parses a numeric cell. A blank cell counts as zero.
fn parse_number(file: &str, column: &str, row: usize, raw: &str) -> Result<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        debug!("{}: blank {} in row {}, counted as 0", file, column, row);
        return Ok(0.0);
    }
    trimmed
        .parse::<f64>()
        .map_err(|_| UsageError::InvalidNumber {
            file: file.to_string(),
            column: column.to_string(),
            row,
            value: raw.to_string(),
        })
}

/// Reads one usage CSV, tagging every row with `filename`.
pub fn load_file(path: &Path, filename: &str) -> Result<UsageTable> {
    let check = check_filename_convention(filename);
    let formats = date_formats_for(check.start_date());

    let mut reader = csv::ReaderBuilder::new().from_path(path)?;
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        debug!("{} has no header row", filename);
        return Ok(UsageTable::schemaless());
    }

    let layout = FileLayout::resolve(&headers, filename)?;
    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<csv::StringRecord>, csv::Error>>()?;

    let raw_dates: Vec<&str> = rows
        .iter()
        .map(|r| r.get(layout.date).unwrap_or(""))
        .collect();
    let dates = parse_date_column(filename, &raw_dates, formats)?;

    let field = |row: &csv::StringRecord, idx: usize| row.get(idx).unwrap_or("").to_string();

    let mut records = Vec::with_capacity(rows.len());
    for (i, (row, date)) in rows.iter().zip(dates).enumerate() {
        let extra: BTreeMap<String, String> = layout
            .extra
            .iter()
            .map(|(idx, name)| (name.clone(), field(row, *idx)))
            .filter(|(_, value)| !value.is_empty())
            .collect();

        records.push(UsageRecord {
            date,
            quantity: parse_number(
                filename,
                COL_QUANTITY,
                i + 1,
                row.get(layout.quantity).unwrap_or(""),
            )?,
            cost: parse_number(filename, COL_COST, i + 1, row.get(layout.cost).unwrap_or(""))?,
            subscription_guid: field(row, layout.subscription_guid),
            subscription_name: field(row, layout.subscription_name),
            service_type: field(row, layout.service_type),
            service_name: field(row, layout.service_name),
            service_resource: field(row, layout.service_resource),
            source_file: filename.to_string(),
            extra,
        });
    }

    debug!("{}: {} rows", filename, records.len());
    Ok(UsageTable::new(layout.columns, records))
}

/// Loads every eligible `.csv` in `dir` (not recursing), in filename order.
///
/// An absent directory, or one without eligible files, yields a schema-less
/// table. Files that cannot be read are skipped and reported; a file whose
/// date column cannot be parsed aborts the whole directory.
pub fn load_directory(dir: &Path) -> Result<LoadOutcome> {
    if !dir.exists() {
        debug!("Directory {} does not exist", dir.display());
        return Ok(LoadOutcome::empty());
    }

    let mut file_names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            continue;
        }
        file_names.push(entry.file_name().to_string_lossy().into_owned());
    }
    file_names.sort();

    let mut tables = Vec::new();
    let mut skipped = Vec::new();

    for filename in file_names {
        if filename.starts_with('_') || !filename.ends_with(".csv") {
            continue;
        }

        let path = dir.join(&filename);
        match load_file(&path, &filename) {
            Ok(table) => tables.push(table),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                skipped.push(SkippedFile {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }

    if tables.is_empty() {
        return Ok(LoadOutcome {
            table: UsageTable::schemaless(),
            skipped,
        });
    }

    let file_count = tables.len();
    let table = UsageTable::concat(tables);
    info!(
        "Loaded {} rows from {} files in {}",
        table.len(),
        file_count,
        dir.display()
    );

    Ok(LoadOutcome { table, skipped })
}
