use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use log::debug;
use std::path::Path;

/// Formats accepted in the "last updated" timestamp file, tried in order.
const TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|d| d.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

/// Number of calendar-month boundaries between `date_from` and `date_to`,
/// ignoring the day of month. Negative when `date_to` is earlier.
pub fn diff_month(date_to: NaiveDate, date_from: NaiveDate) -> i32 {
    (date_to.year() - date_from.year()) * 12 + date_to.month() as i32 - date_from.month() as i32
}

/// Every calendar day in `[start, end)`.
pub fn days_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d < end).collect()
}

/// Normalizes one raw subscription id to the ledger's `{UPPERCASE}` form.
/// Blank input yields an empty string.
pub fn prep_sub_id(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    format!("{{{}}}", raw.trim().to_uppercase())
}

/// Splits a comma separated list of raw ids and normalizes each one.
pub fn prep_sub_ids(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(',').map(prep_sub_id).collect()
}

/// Reads the "last updated" side-channel file. Any failure yields `None`.
pub fn read_timestamp(path: impl AsRef<Path>) -> Option<NaiveDateTime> {
    let path = path.as_ref();
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!("Timestamp file {} not readable: {}", path.display(), e);
            return None;
        }
    };
    parse_timestamp(&contents.replace('\n', ""))
}

pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_month_bounds() {
        assert_eq!(last_of_month(date(2023, 2, 10)), date(2023, 2, 28));
        assert_eq!(last_of_month(date(2024, 2, 1)), date(2024, 2, 29));
        assert_eq!(last_of_month(date(2019, 12, 31)), date(2019, 12, 31));
        assert_eq!(first_of_month(date(2019, 12, 31)), date(2019, 12, 1));
        assert_eq!(add_months(date(2019, 1, 31), 1), date(2019, 2, 28));
    }

    #[test]
    fn test_diff_month() {
        assert_eq!(diff_month(date(2020, 4, 1), date(2019, 1, 1)), 15);
        assert_eq!(diff_month(date(2019, 1, 1), date(2019, 1, 1)), 0);
        assert_eq!(diff_month(date(2018, 1, 1), date(2019, 1, 1)), -12);
    }

    #[test]
    fn test_prep_sub_ids() {
        assert_eq!(prep_sub_id(""), "");
        assert_eq!(prep_sub_id("abC"), "{ABC}");
        assert!(prep_sub_ids("").is_empty());
        assert_eq!(prep_sub_ids("a, b"), vec!["{A}", "{B}"]);
    }

    #[test]
    fn test_days_in_range() {
        let days = days_in_range(date(2019, 2, 27), date(2019, 3, 2));
        assert_eq!(days, vec![date(2019, 2, 27), date(2019, 2, 28), date(2019, 3, 1)]);
    }

    #[test]
    fn test_read_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.log");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "2019-12-12 15:49:30.988079").unwrap();

        let ts = read_timestamp(&path).unwrap();
        assert_eq!(ts.date(), date(2019, 12, 12));
        assert_eq!(ts.hour(), 15);
        assert_eq!(ts.nanosecond(), 988_079_000);

        assert!(read_timestamp(dir.path().join("doesnt_exist.txt")).is_none());
    }
}
