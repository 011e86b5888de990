//! Pool-level analyses: what each funding pool has left and how spend
//! compares with the straight-line ideal.

use crate::aggregator::aggregate_budgets;
use crate::engine::{project_sponsorship, Amortizer};
use crate::error::Result;
use crate::schema::{
    AmortizationRow, Budget, ReportingWindow, SponsorshipPool, UsageTable, YearMonth,
};
use crate::totals::{add_missing_year_months, group_year_month};
use chrono::NaiveDate;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A projected month next to the cost actually recorded for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBudgetRow {
    pub year_month: YearMonth,
    pub ideal_cost: Option<f64>,
    pub avail_cost: Option<f64>,
    pub cost: f64,
}

impl MonthlyBudgetRow {
    fn from_projection(row: &AmortizationRow, cost: f64) -> Self {
        Self {
            year_month: row.year_month,
            ideal_cost: row.ideal_cost,
            avail_cost: row.avail_cost,
            cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SponsorshipAnalysis {
    pub remaining: f64,
    pub usage: f64,
    /// Latest day with usage in the window.
    pub as_of: Option<NaiveDate>,
    pub rows: Vec<MonthlyBudgetRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EaAnalysis {
    /// Sum of the available spend over all contributing budgets.
    pub budget: f64,
    pub usage: f64,
    pub remaining: f64,
    pub rows: Vec<MonthlyBudgetRow>,
}

/// Compares sponsorship usage in the pool's window with its amortized budget.
pub fn analyse_sponsorship(
    usage: &UsageTable,
    pool: &SponsorshipPool,
    use_days: bool,
) -> Result<SponsorshipAnalysis> {
    let window = pool.window();
    window.validate()?;

    let in_window = usage.filter_dates(window.date_from, window.date_to);
    let spent = in_window.total_cost();

    let mut monthly = group_year_month(in_window.records());
    add_missing_year_months(&mut monthly, window.date_from, window.date_to);
    let actuals: BTreeMap<YearMonth, f64> =
        monthly.into_iter().map(|m| (m.year_month, m.cost)).collect();

    let projection = project_sponsorship(&in_window, &window, pool.amount, use_days)?;
    let rows = projection
        .rows
        .iter()
        .map(|row| {
            let cost = actuals.get(&row.year_month).copied().unwrap_or(0.0);
            MonthlyBudgetRow::from_projection(row, cost)
        })
        .collect();

    let analysis = SponsorshipAnalysis {
        remaining: pool.amount - spent,
        usage: spent,
        as_of: projection.as_of,
        rows,
    };

    info!(
        "Sponsorship {} to {}: used {:.2}, remaining {:.2}",
        window.date_from, window.date_to, analysis.usage, analysis.remaining
    );

    Ok(analysis)
}

/// Projects the EA pool over `window` from its budgets alone.
///
/// EA usage is not ingested, so usage is always zero and the remaining
/// amount equals the pool's available budget.
pub fn analyse_ea(
    budgets: &[Budget],
    window: &ReportingWindow,
    as_of: NaiveDate,
) -> Result<EaAnalysis> {
    warn!("EA analysis does not include EA usage data");

    let projection = aggregate_budgets(budgets, window, &Amortizer::new(as_of))?;
    let rows = projection
        .rows
        .iter()
        .map(|row| MonthlyBudgetRow::from_projection(row, 0.0))
        .collect::<Vec<_>>();

    let usage: f64 = rows.iter().map(|r| r.cost).sum();
    Ok(EaAnalysis {
        budget: projection.total_available,
        usage,
        remaining: projection.total_available - usage,
        rows,
    })
}
