//! Grouping and pivoting of cost facts.

use crate::CostRecord;
use chrono::NaiveDate;
use cloudwise_common::types::Provider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Axis to group cost facts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostGroupBy {
    Date,
    Service,
    Provider,
    ProviderService,
    Account,
}

/// Group key: the tuple of grouped fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupKey {
    Date(NaiveDate),
    Service(String),
    Provider(Provider),
    ProviderService(Provider, String),
    Account(Provider, String),
}

impl GroupKey {
    /// Canonical string form, used as the deterministic tie-break when
    /// two groups carry the same total.
    pub fn label(&self) -> String {
        match self {
            GroupKey::Date(d) => d.to_string(),
            GroupKey::Service(s) => s.clone(),
            GroupKey::Provider(p) => p.to_string(),
            GroupKey::ProviderService(p, s) => format!("{p}:{s}"),
            GroupKey::Account(p, id) => format!("{p}:{id}"),
        }
    }
}

/// One aggregated group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupTotal {
    pub key: GroupKey,
    pub total: Decimal,
}

/// Sum of all record costs.
pub fn total_cost(records: &[CostRecord]) -> Decimal {
    records.iter().map(|r| r.cost).sum()
}

/// Group records by the requested axis and sum each group's cost.
///
/// Ordering: time-series groupings (`Date`) come back ascending by date
/// for charting; every other axis is descending by total with the key
/// label as an ascending tie-break, so equal totals do not reshuffle
/// between calls.
pub fn sum_by(records: &[CostRecord], group_by: CostGroupBy) -> Vec<GroupTotal> {
    let mut groups: BTreeMap<GroupKey, Decimal> = BTreeMap::new();
    for record in records {
        let key = match group_by {
            CostGroupBy::Date => GroupKey::Date(record.date),
            CostGroupBy::Service => GroupKey::Service(record.service.clone()),
            CostGroupBy::Provider => GroupKey::Provider(record.account.provider()),
            CostGroupBy::ProviderService => GroupKey::ProviderService(
                record.account.provider(),
                record.service.clone(),
            ),
            CostGroupBy::Account => GroupKey::Account(
                record.account.provider(),
                record.account.account_id().to_owned(),
            ),
        };
        *groups.entry(key).or_insert(Decimal::ZERO) += record.cost;
    }

    let mut rows: Vec<GroupTotal> = groups
        .into_iter()
        .map(|(key, total)| GroupTotal { key, total })
        .collect();

    match group_by {
        // BTreeMap iteration already yields dates ascending
        CostGroupBy::Date => {}
        _ => rows.sort_by(|a, b| {
            b.total
                .cmp(&a.total)
                .then_with(|| a.key.label().cmp(&b.key.label()))
        }),
    }
    rows
}

/// One row of the date × provider pivot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyProviderCost {
    pub date: NaiveDate,
    pub aws: Decimal,
    pub azure: Decimal,
    pub gcp: Decimal,
    pub total: Decimal,
}

impl DailyProviderCost {
    fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            aws: Decimal::ZERO,
            azure: Decimal::ZERO,
            gcp: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }

    fn slot_mut(&mut self, provider: Provider) -> &mut Decimal {
        match provider {
            Provider::Aws => &mut self.aws,
            Provider::Azure => &mut self.azure,
            Provider::Gcp => &mut self.gcp,
        }
    }
}

/// Pivot cost facts into one row per calendar day in `[start, end]`,
/// with a column per provider.
///
/// This is a pivot, not a plain group-by: days with no data still get a
/// row, and providers with no spend on a day read as zero. Chart
/// consumers depend on the dense coverage — a gap would render as a
/// misleading discontinuity. Records outside the range are ignored.
pub fn pivot_daily_by_provider(
    records: &[CostRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<DailyProviderCost> {
    let mut rows: BTreeMap<NaiveDate, DailyProviderCost> = BTreeMap::new();
    let mut day = start;
    while day <= end {
        rows.insert(day, DailyProviderCost::zero(day));
        let Some(next) = day.succ_opt() else { break };
        day = next;
    }

    for record in records {
        if let Some(row) = rows.get_mut(&record.date) {
            *row.slot_mut(record.account.provider()) += record.cost;
            row.total += record.cost;
        }
    }

    rows.into_values().collect()
}

/// One counted group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountGroup {
    pub key: String,
    pub count: u64,
}

/// Count items per string key, descending by count with ascending key
/// tie-break.
pub fn count_by<T, F>(items: &[T], key_fn: F) -> Vec<CountGroup>
where
    F: Fn(&T) -> String,
{
    let mut groups: BTreeMap<String, u64> = BTreeMap::new();
    for item in items {
        *groups.entry(key_fn(item)).or_insert(0) += 1;
    }
    let mut rows: Vec<CountGroup> = groups
        .into_iter()
        .map(|(key, count)| CountGroup { key, count })
        .collect();
    rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    rows
}

/// One summed group keyed by string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountGroup {
    pub key: String,
    pub total: Decimal,
}

/// Sum a Decimal amount per string key, descending by total with
/// ascending key tie-break.
pub fn sum_amounts_by<T, F, A>(items: &[T], key_fn: F, amount_fn: A) -> Vec<AmountGroup>
where
    F: Fn(&T) -> String,
    A: Fn(&T) -> Decimal,
{
    let mut groups: BTreeMap<String, Decimal> = BTreeMap::new();
    for item in items {
        *groups.entry(key_fn(item)).or_insert(Decimal::ZERO) += amount_fn(item);
    }
    let mut rows: Vec<AmountGroup> = groups
        .into_iter()
        .map(|(key, total)| AmountGroup { key, total })
        .collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.key.cmp(&b.key)));
    rows
}

/// Share of `part` in `whole` as a percentage, rounded to 2 decimals;
/// zero when `whole` is not positive.
///
/// Rounding happens per reported figure, so a column of percentages may
/// not sum to exactly 100.00 — that is inherent to fixed-precision
/// reporting and is surfaced consistently rather than patched per
/// endpoint.
pub fn percentage(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (part / whole * Decimal::ONE_HUNDRED).round_dp(2)
}
