//! # Azure Usage
//!
//! A library for turning overlapping Azure billing export drops into one
//! canonical usage ledger, and for projecting how the funding pools that
//! pay for that usage are being spent.
//!
//! ## Core Concepts
//!
//! - **Drops**: directories of CSV exports named `<end>-<start>.csv`, each
//!   covering a date range that may overlap earlier drops
//! - **Ledger**: every drop concatenated in chronological order with
//!   identical line items collapsed; later drops win
//! - **Amortization**: budgets spread evenly over their validity window,
//!   split into elapsed ("ideal") and remaining ("available") months
//! - **Pools**: a sponsorship pool tracked against real usage, and an EA
//!   pool made up of several named budgets
//!
//! ## Example
//!
//! ```rust,ignore
//! use azure_usage::*;
//! use std::path::Path;
//!
//! let config = FundingConfig::from_path("funding.json")?;
//! let report = process_usage(Path::new("data/usage"), &config, false)?;
//!
//! if let Some(sponsorship) = &report.sponsorship {
//!     println!("Remaining sponsorship: {:.2}", sponsorship.remaining);
//! }
//! let top = top_services(Some(&report.ledger), None, ServiceGrouping::Type);
//! ```

pub mod aggregator;
pub mod analysis;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod ledger;
pub mod schema;
pub mod services;
pub mod totals;
pub mod utils;

pub use aggregator::{aggregate_budgets, PoolProjection};
pub use analysis::{
    analyse_ea, analyse_sponsorship, EaAnalysis, MonthlyBudgetRow, SponsorshipAnalysis,
};
pub use engine::{project_sponsorship, Amortizer, SponsorshipProjection};
pub use error::{Result, UsageError};
pub use ingestion::{
    check_filename_convention, date_cutover, load_directory, load_file, FilenameCheck,
    LoadOutcome, SkippedFile,
};
pub use ledger::{create_ledger, deduplicate, export_ledger, prepare_ledger, write_timestamp};
pub use schema::*;
pub use services::{
    detailed_breakdown, exclude_subscriptions, filter_subscriptions, latest_subscription_name,
    top_services, BreakdownRow, CostBand, ServiceGrouping, ServiceShare, SubscriptionGroup,
};
pub use totals::{
    add_missing_year_months, check_missing_data, group_day, group_sub_year_month,
    group_year_month, DailyCost, MonthlyCost, SubscriptionMonthlyCost,
};
pub use utils::{diff_month, prep_sub_id, prep_sub_ids, read_timestamp};

use log::{debug, info};
use std::path::Path;

/// Everything derived from one pass over a data directory.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub ledger: UsageTable,
    pub skipped: Vec<SkippedFile>,
    pub sponsorship: Option<SponsorshipAnalysis>,
    pub ea: Option<EaAnalysis>,
}

pub struct UsageProcessor;

impl UsageProcessor {
    /// Builds the ledger under `base_dir` and analyses both funding pools.
    ///
    /// The EA pool is projected over the sponsorship window, with the latest
    /// sponsorship usage as its as-of date. Without a sponsorship pool there
    /// is no window to project over and the EA analysis is skipped.
    pub fn process(
        base_dir: &Path,
        config: &FundingConfig,
        use_days: bool,
    ) -> Result<UsageReport> {
        config.validate()?;

        info!("Processing usage data under {}", base_dir.display());
        debug!(
            "Configuration contains {} EA budgets, sponsorship pool {}",
            config.ea_budgets.len(),
            if config.sponsorship.is_some() { "present" } else { "absent" }
        );

        let LoadOutcome { table, skipped } = create_ledger(base_dir)?;

        let mut report = UsageReport {
            ledger: table,
            skipped,
            sponsorship: None,
            ea: None,
        };

        let pool = match &config.sponsorship {
            Some(pool) => pool,
            None => {
                debug!("No sponsorship pool configured; skipping pool analyses");
                return Ok(report);
            }
        };

        let sponsorship = analyse_sponsorship(&report.ledger, pool, use_days)?;
        let window = pool.window();
        let as_of = match sponsorship.as_of {
            Some(day) => day,
            None => window.date_from.pred_opt().unwrap_or(window.date_from),
        };

        report.ea = Some(analyse_ea(&config.ea_budgets, &window, as_of)?);
        report.sponsorship = Some(sponsorship);

        Ok(report)
    }
}

pub fn process_usage(
    base_dir: &Path,
    config: &FundingConfig,
    use_days: bool,
) -> Result<UsageReport> {
    UsageProcessor::process(base_dir, config, use_days)
}
