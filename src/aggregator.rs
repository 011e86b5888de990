use crate::engine::Amortizer;
use crate::error::{Result, UsageError};
use crate::schema::{AmortizationRow, Budget, ReportingWindow};
use log::{debug, info};
use serde::{Deserialize, Serialize};

/// Combined projection of every budget that touches a reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolProjection {
    pub rows: Vec<AmortizationRow>,
    /// Names of the budgets that overlapped the window, in input order.
    pub contributing: Vec<String>,
    /// Sum of the available column; the pool's headline budget figure.
    pub total_available: f64,
    pub total_ideal: f64,
}

impl PoolProjection {
    pub fn is_empty(&self) -> bool {
        self.contributing.is_empty()
    }
}

fn add_options(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn merge_rows(
    combined: &mut [AmortizationRow],
    rows: &[AmortizationRow],
    budget: &Budget,
) -> Result<()> {
    let expected: Vec<String> = combined.iter().map(|r| r.year_month.label()).collect();
    let found: Vec<String> = rows.iter().map(|r| r.year_month.label()).collect();
    if expected != found {
        return Err(UsageError::MisalignedProjection {
            budget: budget.name.clone(),
            expected: expected.join(", "),
            found: found.join(", "),
        });
    }

    for (target, row) in combined.iter_mut().zip(rows) {
        target.ideal_cost = add_options(target.ideal_cost, row.ideal_cost);
        target.avail_cost = add_options(target.avail_cost, row.avail_cost);
    }
    Ok(())
}

/// Amortizes each budget over `window` and sums the results month by month.
///
/// Budgets outside the window are skipped. Every contributing budget must
/// yield the same month labels, otherwise `MisalignedProjection` is returned.
/// With no contributing budgets the projection is empty and totals are zero.
pub fn aggregate_budgets(
    budgets: &[Budget],
    window: &ReportingWindow,
    amortizer: &Amortizer,
) -> Result<PoolProjection> {
    window.validate()?;

    let mut projection = PoolProjection::default();
    let mut combined: Option<Vec<AmortizationRow>> = None;

    for budget in budgets {
        let rows = match amortizer.amortize(budget, window)? {
            Some(rows) => rows,
            None => continue,
        };
        debug!("Budget '{}' contributes {} months", budget.name, rows.len());

        match combined.as_mut() {
            Some(existing) => merge_rows(existing, &rows, budget)?,
            None => combined = Some(rows),
        }
        projection.contributing.push(budget.name.clone());
    }

    projection.rows = combined.unwrap_or_default();
    projection.total_available = projection.rows.iter().filter_map(|r| r.avail_cost).sum();
    projection.total_ideal = projection.rows.iter().filter_map(|r| r.ideal_cost).sum();

    info!(
        "Aggregated {} of {} budgets: {:.2} available",
        projection.contributing.len(),
        budgets.len(),
        projection.total_available
    );

    Ok(projection)
}
