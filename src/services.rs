//! Per-service and per-subscription breakdowns of the ledger.

use crate::schema::{UsageRecord, UsageTable, YearMonth};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

pub const MAX_TOP_SERVICES: usize = 19;
pub const MAX_SERVICE_LENGTH: usize = 50;
pub const OTHER_LABEL: &str = "Other";
pub const TOTAL_ID: &str = "All";
pub const TOTAL_LABEL: &str = "Total";

/// How service line items are labelled before grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceGrouping {
    #[default]
    Type,
    NameTypeResource,
    NameType,
    NameResource,
}

impl ServiceGrouping {
    pub const ALL: [ServiceGrouping; 4] = [
        ServiceGrouping::Type,
        ServiceGrouping::NameTypeResource,
        ServiceGrouping::NameType,
        ServiceGrouping::NameResource,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceGrouping::Type => "Type",
            ServiceGrouping::NameTypeResource => "Name + Type + Resource",
            ServiceGrouping::NameType => "Name + Type",
            ServiceGrouping::NameResource => "Name + Resource",
        }
    }

    pub fn service_label(&self, record: &UsageRecord) -> String {
        match self {
            ServiceGrouping::Type => record.service_type.clone(),
            ServiceGrouping::NameTypeResource => format!(
                "{}: {}: {}",
                record.service_name, record.service_type, record.service_resource
            ),
            ServiceGrouping::NameType => {
                format!("{}: {}", record.service_name, record.service_type)
            }
            ServiceGrouping::NameResource => {
                format!("{}: {}", record.service_name, record.service_resource)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceShare {
    pub service: String,
    pub cost: f64,
    /// Fraction of the total across all returned rows.
    pub perc: f64,
}

/// The `top_n` (default 19) most expensive services, with everything else
/// rolled into one `Other (<count>)` row, sorted by cost descending.
///
/// Returns `None` when there is nothing to show: no table, or a table
/// without any columns. A table with columns but no rows yields an empty
/// list.
pub fn top_services(
    table: Option<&UsageTable>,
    top_n: Option<usize>,
    grouping: ServiceGrouping,
) -> Option<Vec<ServiceShare>> {
    let table = table?;
    if table.is_schemaless() {
        return None;
    }
    let top_n = top_n.unwrap_or(MAX_TOP_SERVICES);

    let mut by_service: BTreeMap<String, f64> = BTreeMap::new();
    for record in table.records() {
        *by_service.entry(grouping.service_label(record)).or_insert(0.0) += record.cost;
    }

    let mut services: Vec<(String, f64)> = by_service
        .into_iter()
        .map(|(label, cost)| (label.chars().take(MAX_SERVICE_LENGTH).collect(), cost))
        .collect();
    services.sort_by(|a, b| b.1.total_cmp(&a.1));

    if services.len() > top_n {
        let rest = services.split_off(top_n);
        let other_cost: f64 = rest.iter().map(|(_, cost)| cost).sum();
        debug!("Rolling {} services into {}", rest.len(), OTHER_LABEL);

        if other_cost > 0.0 {
            services.push((format!("{} ({})", OTHER_LABEL, rest.len()), other_cost));
            services.sort_by(|a, b| b.1.total_cmp(&a.1));
        }
    }

    let total: f64 = services.iter().map(|(_, cost)| cost).sum();

    Some(
        services
            .into_iter()
            .map(|(service, cost)| ServiceShare {
                service,
                cost,
                perc: if total > 0.0 { cost / total } else { 100.0 },
            })
            .collect(),
    )
}

pub fn filter_subscriptions(table: &UsageTable, guids: &[String]) -> UsageTable {
    let wanted: HashSet<&str> = guids.iter().map(String::as_str).collect();
    table.filter(|r| wanted.contains(r.subscription_guid.as_str()))
}

pub fn exclude_subscriptions(table: &UsageTable, guids: &[String]) -> UsageTable {
    let unwanted: HashSet<&str> = guids.iter().map(String::as_str).collect();
    table.filter(|r| !unwanted.contains(r.subscription_guid.as_str()))
}

/// Display name on the most recent row of a subscription. Later rows win
/// ties on the same date.
pub fn latest_subscription_name(records: &[UsageRecord], guid: &str) -> Option<String> {
    records
        .iter()
        .filter(|r| r.subscription_guid == guid)
        .fold(None, |latest: Option<&UsageRecord>, r| match latest {
            Some(best) if best.date > r.date => Some(best),
            _ => Some(r),
        })
        .map(|r| r.subscription_name.clone())
}

pub fn subscription_totals(records: &[UsageRecord]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for record in records {
        *totals.entry(record.subscription_guid.clone()).or_insert(0.0) += record.cost;
    }
    totals
}

/// Subscriptions whose total cost lies in `[total_from, total_to)`.
pub fn subscriptions_with_total_in(
    records: &[UsageRecord],
    total_from: f64,
    total_to: f64,
) -> Vec<String> {
    subscription_totals(records)
        .into_iter()
        .filter(|(_, total)| *total >= total_from && *total < total_to)
        .map(|(guid, _)| guid)
        .collect()
}

/// A fixed set of subscriptions reported as one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionGroup {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

/// Subscriptions whose total spend falls in `[from, to)`, reported as one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBand {
    pub id: String,
    pub from: f64,
    pub to: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub subscription_guid: String,
    pub subscription: String,
    pub monthly: BTreeMap<YearMonth, f64>,
    pub total: f64,
}

impl BreakdownRow {
    fn from_records<'a>(
        guid: impl Into<String>,
        name: impl Into<String>,
        records: impl IntoIterator<Item = &'a UsageRecord>,
    ) -> Self {
        let mut monthly = BTreeMap::new();
        for record in records {
            *monthly.entry(record.year_month()).or_insert(0.0) += record.cost;
        }
        let total = monthly.values().sum();
        Self {
            subscription_guid: guid.into(),
            subscription: name.into(),
            monthly,
            total,
        }
    }
}

/// Subscription x month cost pivot. Named groups come first, then cost
/// bands over the subscriptions outside every group, then each remaining
/// subscription on its own line under its latest name. Rows are sorted by
/// total descending and preceded by a grand total row.
pub fn detailed_breakdown(
    table: &UsageTable,
    groups: &[SubscriptionGroup],
    bands: &[CostBand],
) -> Vec<BreakdownRow> {
    let records = table.records();
    let mut rows = Vec::new();
    let mut claimed: HashSet<String> = HashSet::new();

    for group in groups {
        let members: HashSet<&str> = group.members.iter().map(String::as_str).collect();
        rows.push(BreakdownRow::from_records(
            &group.id,
            &group.name,
            records
                .iter()
                .filter(|r| members.contains(r.subscription_guid.as_str())),
        ));
        claimed.extend(group.members.iter().cloned());
    }

    let ungrouped: Vec<UsageRecord> = records
        .iter()
        .filter(|r| !claimed.contains(&r.subscription_guid))
        .cloned()
        .collect();

    for band in bands {
        let guids = subscriptions_with_total_in(&ungrouped, band.from, band.to);
        let members: HashSet<&str> = guids.iter().map(String::as_str).collect();
        rows.push(BreakdownRow::from_records(
            &band.id,
            format!(
                "{} Subscriptions with {} to {} spent",
                guids.len(),
                band.from as i64,
                band.to as i64
            ),
            ungrouped
                .iter()
                .filter(|r| members.contains(r.subscription_guid.as_str())),
        ));
        claimed.extend(guids);
    }

    for guid in subscription_totals(records).into_keys() {
        if claimed.contains(&guid) {
            continue;
        }
        let name = latest_subscription_name(records, &guid).unwrap_or_default();
        rows.push(BreakdownRow::from_records(
            guid.clone(),
            name,
            records.iter().filter(|r| r.subscription_guid == guid),
        ));
    }

    rows.retain(|row| !row.monthly.is_empty());
    rows.sort_by(|a, b| b.total.total_cmp(&a.total));

    let total_row = BreakdownRow::from_records(TOTAL_ID, TOTAL_LABEL, records.iter());
    rows.insert(0, total_row);
    rows
}
