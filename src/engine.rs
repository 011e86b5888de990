//! Straight-line amortization of budgets into monthly ideal and available spend.

use crate::error::{Result, UsageError};
use crate::schema::{AmortizationRow, Budget, ReportingWindow, UsageTable, YearMonth};
use crate::utils::{diff_month, first_of_month, last_of_month};
use chrono::{Months, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};

/// The part of one calendar month that falls inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthSlice {
    year_month: YearMonth,
    end: NaiveDate,
    days: i64,
}

impl MonthSlice {
    fn new(cursor: NaiveDate, date_from: NaiveDate, date_to: NaiveDate) -> Self {
        let start = first_of_month(cursor).max(date_from);
        let end = last_of_month(cursor).min(date_to);
        Self {
            year_month: YearMonth::of(start),
            end,
            days: (end - start).num_days(),
        }
    }
}

fn per_unit(amount: f64, units: i64) -> f64 {
    if units > 0 {
        amount / units as f64
    } else {
        0.0
    }
}

/// Splits budgets into monthly figures around an as-of date: months that
/// have fully elapsed get an "ideal" figure, the rest an "available" one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amortizer {
    as_of: NaiveDate,
    use_days: bool,
}

impl Amortizer {
    /// `as_of` is the most recent day with recorded usage.
    pub fn new(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            use_days: false,
        }
    }

    /// Divide by days (scaled to each month's length) instead of by months.
    pub fn with_days(mut self, use_days: bool) -> Self {
        self.use_days = use_days;
        self
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Amortizes `budget` over `window` assuming nothing has been spent yet.
    pub fn amortize(
        &self,
        budget: &Budget,
        window: &ReportingWindow,
    ) -> Result<Option<Vec<AmortizationRow>>> {
        self.amortize_with_spend(budget, window, 0.0)
    }

    /// One row per calendar month touched by `window`, or `None` when the
    /// budget's validity does not intersect the window.
    pub fn amortize_with_spend(
        &self,
        budget: &Budget,
        window: &ReportingWindow,
        spent: f64,
    ) -> Result<Option<Vec<AmortizationRow>>> {
        window.validate()?;

        if !budget.overlaps(window) {
            debug!(
                "Budget '{}' ({} to {}) is outside {} to {}",
                budget.name, budget.dt_from, budget.dt_to, window.date_from, window.date_to
            );
            return Ok(None);
        }
        budget.validate()?;

        let avg_day = per_unit(budget.amount, budget.validity_days());
        let avg_month = per_unit(budget.amount, i64::from(budget.validity_months()));

        let left = budget.amount - spent;
        let days_left = (budget.dt_to - self.as_of).num_days().max(0);
        let before_as_of_month = first_of_month(self.as_of)
            .pred_opt()
            .unwrap_or(NaiveDate::MIN);
        let months_left = diff_month(budget.dt_to, before_as_of_month).max(0);

        let left_avg_day = per_unit(left, days_left);
        let left_avg_month = per_unit(left, i64::from(months_left));

        let mut rows = Vec::new();
        let mut cursor = first_of_month(window.date_from);

        while cursor <= window.date_to {
            let slice = MonthSlice::new(cursor, window.date_from, window.date_to);

            let row = if self.as_of >= slice.end {
                let ideal = if budget.dt_from >= slice.end {
                    0.0
                } else if self.use_days {
                    avg_day * slice.days as f64
                } else {
                    avg_month
                };
                AmortizationRow {
                    year_month: slice.year_month,
                    ideal_cost: Some(ideal),
                    avail_cost: None,
                }
            } else {
                let avail = if slice.end <= budget.dt_to {
                    if self.use_days {
                        left_avg_day * slice.days as f64
                    } else {
                        left_avg_month
                    }
                } else {
                    0.0
                };
                AmortizationRow {
                    year_month: slice.year_month,
                    ideal_cost: None,
                    avail_cost: Some(avail),
                }
            };
            rows.push(row);

            cursor = match cursor.checked_add_months(Months::new(1)) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(Some(rows))
    }
}

/// Sponsorship amortized over its own analysis window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorshipProjection {
    pub rows: Vec<AmortizationRow>,
    /// Latest usage date inside the window, if any usage was recorded.
    pub as_of: Option<NaiveDate>,
    pub spent: f64,
}

/// Projects ideal and available sponsorship spend per month of `window`.
///
/// The as-of date is the latest usage in the window and the spend is the
/// window's total cost. Without usage nothing counts as elapsed. A window
/// spanning no days yields no rows.
pub fn project_sponsorship(
    usage: &UsageTable,
    window: &ReportingWindow,
    amount: f64,
    use_days: bool,
) -> Result<SponsorshipProjection> {
    let in_window = usage.filter_dates(window.date_from, window.date_to);
    let spent = in_window.total_cost();
    let latest = in_window.date_range().map(|(_, last)| last);

    let date_from = window.date_from;
    let date_to = window
        .date_to
        .succ_opt()
        .ok_or_else(|| UsageError::InvalidWindow(format!("{} has no successor", window.date_to)))?;

    let days_total = (date_to - date_from).num_days();
    if days_total <= 0 {
        return Ok(SponsorshipProjection {
            rows: Vec::new(),
            as_of: latest,
            spent,
        });
    }
    let months_total = i64::from(diff_month(date_to, date_from));

    let day_avg = per_unit(amount, days_total);
    let month_avg = per_unit(amount, months_total);

    let left = amount - spent;
    let (days_left, months_left) = match latest {
        Some(as_of) => (
            (date_to - as_of).num_days().max(0),
            i64::from(diff_month(date_to, as_of).max(0)),
        ),
        None => (days_total, months_total),
    };
    let day_left_avg = per_unit(left, days_left);
    let month_left_avg = per_unit(left, months_left);

    let mut rows = Vec::new();
    let mut step = 0;
    while let Some(cursor) = date_from.checked_add_months(Months::new(step)) {
        if cursor >= date_to {
            break;
        }
        let slice = MonthSlice::new(cursor, date_from, date_to);

        let elapsed = latest.map_or(false, |as_of| as_of >= slice.end);
        let row = if elapsed {
            AmortizationRow {
                year_month: slice.year_month,
                ideal_cost: Some(if use_days {
                    day_avg * slice.days as f64
                } else {
                    month_avg
                }),
                avail_cost: None,
            }
        } else {
            AmortizationRow {
                year_month: slice.year_month,
                ideal_cost: None,
                avail_cost: Some(if use_days {
                    day_left_avg * slice.days as f64
                } else {
                    month_left_avg
                }),
            }
        };
        rows.push(row);
        step += 1;
    }

    Ok(SponsorshipProjection {
        rows,
        as_of: latest,
        spent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UsageRecord;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn financial_year() -> ReportingWindow {
        ReportingWindow::new(date(2019, 10, 1), date(2020, 9, 30)).unwrap()
    }

    fn sum(rows: &[AmortizationRow], pick: fn(&AmortizationRow) -> Option<f64>) -> f64 {
        rows.iter().filter_map(pick).sum()
    }

    fn assert_complementary(rows: &[AmortizationRow]) {
        for row in rows {
            assert!(
                row.ideal_cost.is_some() != row.avail_cost.is_some(),
                "{} has ideal {:?} and avail {:?}",
                row.year_month,
                row.ideal_cost,
                row.avail_cost
            );
        }
    }

    #[test]
    fn test_budget_ending_inside_window() {
        let budget = Budget::new(
            "ASG",
            date(2019, 1, 1),
            date(2020, 3, 31),
            321897.25,
            "USD",
        );
        let rows = Amortizer::new(date(2019, 11, 6))
            .amortize(&budget, &financial_year())
            .unwrap()
            .unwrap();

        assert_eq!(rows.len(), 12);
        assert_eq!(rows[0].year_month.label(), "2019-10");
        assert_eq!(rows[11].year_month.label(), "2020-09");
        assert_complementary(&rows);

        // only October has elapsed: one fourteenth of the budget
        let ideal = sum(&rows, |r| r.ideal_cost);
        assert!((ideal - 321897.25 / 14.0).abs() < 1e-6);

        // November through March share everything, April onwards is zero
        let avail = sum(&rows, |r| r.avail_cost);
        assert!((avail - 321897.25).abs() < 1e-6);
        assert_eq!(rows[6].avail_cost, Some(0.0));
    }

    #[test]
    fn test_budget_outlasting_window() {
        let budget = Budget::new(
            "LwM",
            date(2019, 4, 1),
            date(2024, 3, 31),
            321897.25,
            "USD",
        );
        let rows = Amortizer::new(date(2019, 11, 6))
            .amortize(&budget, &financial_year())
            .unwrap()
            .unwrap();

        assert_complementary(&rows);
        let ideal = sum(&rows, |r| r.ideal_cost);
        assert!((ideal - 321897.25 / 59.0).abs() < 1e-6);

        let avail = sum(&rows, |r| r.avail_cost);
        assert!((avail - 66808.863207547).abs() < 1e-6);
    }

    #[test]
    fn test_spend_reduces_available() {
        let budget = Budget::new("ASG", date(2019, 1, 1), date(2020, 3, 31), 1000.0, "GBP");
        let rows = Amortizer::new(date(2019, 11, 6))
            .amortize_with_spend(&budget, &financial_year(), 400.0)
            .unwrap()
            .unwrap();

        let avail = sum(&rows, |r| r.avail_cost);
        assert!((avail - 600.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_not_started_has_zero_ideal() {
        let budget = Budget::new("Late", date(2020, 1, 15), date(2021, 6, 30), 1200.0, "GBP");
        let rows = Amortizer::new(date(2020, 2, 10))
            .amortize(&budget, &financial_year())
            .unwrap()
            .unwrap();

        assert_complementary(&rows);
        // October to December elapsed before the budget started
        for row in &rows[0..3] {
            assert_eq!(row.ideal_cost, Some(0.0));
        }
        assert!(rows[3].ideal_cost.unwrap() > 0.0);
    }

    #[test]
    fn test_day_granularity() {
        let budget = Budget::new("Days", date(2019, 1, 1), date(2021, 1, 1), 731.0, "GBP");
        let rows = Amortizer::new(date(2019, 11, 6))
            .with_days(true)
            .amortize(&budget, &financial_year())
            .unwrap()
            .unwrap();

        // 731 days at one unit per day; October spans 1st to 31st
        assert_eq!(rows[0].ideal_cost, Some(30.0));
        assert_complementary(&rows);
    }

    #[test]
    fn test_no_overlap_and_bad_inputs() {
        let amortizer = Amortizer::new(date(2019, 11, 6));

        let expired = Budget::new("Old", date(2017, 1, 1), date(2018, 1, 1), 10.0, "GBP");
        assert_eq!(amortizer.amortize(&expired, &financial_year()).unwrap(), None);

        let degenerate = Budget::new("Flat", date(2019, 11, 1), date(2019, 11, 20), 10.0, "GBP");
        assert!(matches!(
            amortizer.amortize(&degenerate, &financial_year()),
            Err(UsageError::DegenerateBudget { .. })
        ));

        let inverted = ReportingWindow {
            date_from: date(2020, 1, 1),
            date_to: date(2019, 1, 1),
        };
        assert!(matches!(
            amortizer.amortize(&expired, &inverted),
            Err(UsageError::InvalidWindow(_))
        ));
    }

    fn usage_on(dates: &[(NaiveDate, f64)]) -> UsageTable {
        let records = dates
            .iter()
            .map(|(date, cost)| UsageRecord {
                date: *date,
                quantity: 1.0,
                cost: *cost,
                subscription_guid: "{A}".to_string(),
                subscription_name: "A".to_string(),
                service_type: "Compute".to_string(),
                service_name: "VM".to_string(),
                service_resource: "D2".to_string(),
                source_file: "2019-11-12-2019-10-01.csv".to_string(),
                extra: Default::default(),
            })
            .collect();
        UsageTable::new(vec!["Date".to_string()], records)
    }

    #[test]
    fn test_sponsorship_projection_conserves_remaining() {
        let usage = usage_on(&[
            (date(2019, 10, 3), 1500.0),
            (date(2019, 11, 11), 250.5),
            (date(2019, 9, 30), 99999.0),
        ]);
        let projection = project_sponsorship(&usage, &financial_year(), 1_000_000.0, false).unwrap();

        assert_eq!(projection.as_of, Some(date(2019, 11, 11)));
        assert!((projection.spent - 1750.5).abs() < 1e-9);
        assert_eq!(projection.rows.len(), 12);
        assert_complementary(&projection.rows);

        let ideal = sum(&projection.rows, |r| r.ideal_cost);
        assert!((ideal - 83333.333333333).abs() < 1e-6);

        let avail = sum(&projection.rows, |r| r.avail_cost);
        assert!((avail - (1_000_000.0 - 1750.5)).abs() < 1e-6);
    }

    #[test]
    fn test_sponsorship_projection_without_usage() {
        let projection =
            project_sponsorship(&UsageTable::schemaless(), &financial_year(), 1200.0, false)
                .unwrap();

        assert_eq!(projection.as_of, None);
        assert!(projection.rows.iter().all(|r| r.ideal_cost.is_none()));
        let avail = sum(&projection.rows, |r| r.avail_cost);
        assert!((avail - 1200.0).abs() < 1e-9);
    }
}
