use crate::schema::{UsageRecord, YearMonth};
use crate::utils::{add_months, days_in_range};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCost {
    pub date: NaiveDate,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyCost {
    pub year_month: YearMonth,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMonthlyCost {
    pub subscription_guid: String,
    pub year_month: YearMonth,
    pub cost: f64,
}

/// Cost per calendar day, ascending. With `add_missing_days` every day
/// between the first and last observed date is present, zero if unused.
pub fn group_day(records: &[UsageRecord], add_missing_days: bool) -> Vec<DailyCost> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        *by_day.entry(record.date).or_insert(0.0) += record.cost;
    }

    if add_missing_days {
        let bounds = by_day
            .keys()
            .next()
            .copied()
            .zip(by_day.keys().next_back().copied());
        if let Some((first, last)) = bounds {
            for day in first.iter_days().take_while(|d| *d <= last) {
                by_day.entry(day).or_insert(0.0);
            }
        }
    }

    by_day
        .into_iter()
        .map(|(date, cost)| DailyCost { date, cost })
        .collect()
}

/// Cost per calendar month, ascending.
pub fn group_year_month(records: &[UsageRecord]) -> Vec<MonthlyCost> {
    let mut by_month: BTreeMap<YearMonth, f64> = BTreeMap::new();
    for record in records {
        *by_month.entry(record.year_month()).or_insert(0.0) += record.cost;
    }

    by_month
        .into_iter()
        .map(|(year_month, cost)| MonthlyCost { year_month, cost })
        .collect()
}

/// Adds a zero row for every month touched by stepping from `date_from` in
/// whole months while before `date_to`, keeping the result sorted.
pub fn add_missing_year_months(
    monthly: &mut Vec<MonthlyCost>,
    date_from: NaiveDate,
    date_to: NaiveDate,
) {
    let mut present: HashSet<YearMonth> = monthly.iter().map(|m| m.year_month).collect();

    let mut step = 0;
    loop {
        let cursor = add_months(date_from, step);
        if cursor >= date_to {
            break;
        }
        let year_month = YearMonth::of(cursor);
        if present.insert(year_month) {
            monthly.push(MonthlyCost {
                year_month,
                cost: 0.0,
            });
        }
        step += 1;
    }

    monthly.sort_by_key(|m| m.year_month);
}

/// Cost per (year-month, subscription), ordered by month then subscription.
pub fn group_sub_year_month(records: &[UsageRecord]) -> Vec<SubscriptionMonthlyCost> {
    let mut grouped: BTreeMap<(YearMonth, &str), f64> = BTreeMap::new();
    for record in records {
        *grouped
            .entry((record.year_month(), record.subscription_guid.as_str()))
            .or_insert(0.0) += record.cost;
    }

    grouped
        .into_iter()
        .map(|((year_month, guid), cost)| SubscriptionMonthlyCost {
            subscription_guid: guid.to_string(),
            year_month,
            cost,
        })
        .collect()
}

/// Days in `[date_from, date_to)` with no usage at all. When `today` is
/// given, days from today onwards are not reported.
pub fn check_missing_data(
    records: &[UsageRecord],
    date_from: NaiveDate,
    date_to: NaiveDate,
    today: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    let date_to = match today {
        Some(today) => date_to.min(today),
        None => date_to,
    };
    let observed: HashSet<NaiveDate> = records.iter().map(|r| r.date).collect();

    days_in_range(date_from, date_to)
        .into_iter()
        .filter(|d| !observed.contains(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn record(guid: &str, date: NaiveDate, cost: f64) -> UsageRecord {
        UsageRecord {
            date,
            quantity: 1.0,
            cost,
            subscription_guid: guid.to_string(),
            subscription_name: format!("Sub {}", guid),
            service_type: "Storage".to_string(),
            service_name: "Blob".to_string(),
            service_resource: "LRS".to_string(),
            source_file: "2019-10-01-2019-09-15.csv".to_string(),
            extra: Default::default(),
        }
    }

    fn sample() -> Vec<UsageRecord> {
        vec![
            record("{A}", date(2019, 1, 30), 1.25),
            record("{B}", date(2019, 1, 30), 2.0),
            record("{A}", date(2019, 2, 2), 0.5),
            record("{A}", date(2019, 3, 15), 4.0),
        ]
    }

    #[test]
    fn test_group_day_conserves_cost() {
        let records = sample();
        let total: f64 = records.iter().map(|r| r.cost).sum();

        let sparse = group_day(&records, false);
        assert_eq!(sparse.len(), 3);
        assert_eq!(sparse[0].date, date(2019, 1, 30));
        assert!((sparse[0].cost - 3.25).abs() < 1e-12);

        let dense = group_day(&records, true);
        // 30 Jan through 15 Mar inclusive
        assert_eq!(dense.len(), 45);
        assert!(dense.windows(2).all(|w| w[0].date.succ_opt() == Some(w[1].date)));

        for grouped in [&sparse, &dense] {
            let sum: f64 = grouped.iter().map(|d| d.cost).sum();
            assert!((sum - total).abs() < 1e-12);
        }

        assert!(group_day(&[], true).is_empty());
    }

    #[test]
    fn test_group_year_month() {
        let monthly = group_year_month(&sample());
        let labels: Vec<String> = monthly.iter().map(|m| m.year_month.label()).collect();
        assert_eq!(labels, vec!["2019-01", "2019-02", "2019-03"]);
        assert!((monthly[0].cost - 3.25).abs() < 1e-12);
    }

    #[test]
    fn test_add_missing_year_months() {
        let mut monthly = group_year_month(&sample());
        add_missing_year_months(&mut monthly, date(2018, 11, 1), date(2019, 6, 1));

        let labels: Vec<String> = monthly.iter().map(|m| m.year_month.label()).collect();
        assert_eq!(
            labels,
            vec!["2018-11", "2018-12", "2019-01", "2019-02", "2019-03", "2019-04", "2019-05"]
        );
        let sum: f64 = monthly.iter().map(|m| m.cost).sum();
        assert!((sum - 7.75).abs() < 1e-12);
    }

    #[test]
    fn test_group_sub_year_month() {
        let grouped = group_sub_year_month(&sample());
        assert_eq!(grouped.len(), 4);

        let jan_b = grouped
            .iter()
            .find(|g| g.subscription_guid == "{B}" && g.year_month == YearMonth::new(2019, 1))
            .unwrap();
        assert!((jan_b.cost - 2.0).abs() < 1e-12);
        assert!(grouped.windows(2).all(|w| w[0].year_month <= w[1].year_month));
    }

    #[test]
    fn test_check_missing_data() {
        let records = sample();
        let missing = check_missing_data(&records, date(2019, 1, 29), date(2019, 2, 3), None);
        assert_eq!(
            missing,
            vec![date(2019, 1, 29), date(2019, 1, 31), date(2019, 2, 1)]
        );

        let clipped = check_missing_data(
            &records,
            date(2019, 1, 29),
            date(2019, 2, 3),
            Some(date(2019, 1, 31)),
        );
        assert_eq!(clipped, vec![date(2019, 1, 29)]);
    }
}
