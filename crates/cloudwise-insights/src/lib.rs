//! Cross-provider aggregation layer.
//!
//! Pure data-shaping over records already scoped to the requesting user:
//! grouping and pivoting of cost facts, run-rate month-end forecasting,
//! z-score anomaly flagging, and idle-resource detection. Nothing here
//! performs I/O or holds state between calls; identical inputs always
//! produce identical output, which the HTTP layer relies on for
//! cache-free idempotent reads.
//!
//! Money is summed in [`rust_decimal::Decimal`] throughout — float
//! accumulation drift across large aggregates is not acceptable in
//! billing output.

pub mod aggregate;
pub mod anomaly;
pub mod forecast;
pub mod idle;

#[cfg(test)]
mod tests;

use chrono::NaiveDate;
use cloudwise_common::types::AccountRef;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single cost fact, the unit of aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostRecord {
    pub account: AccountRef,
    pub date: NaiveDate,
    pub service: String,
    pub cost: Decimal,
}

/// Resource fields the idle detector needs; the storage layer converts
/// its rows into this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub account: AccountRef,
    pub resource_id: String,
    pub name: Option<String>,
    pub resource_type: String,
    pub region: String,
    pub status: String,
    pub utilization: Option<f64>,
    pub cost_per_month: Decimal,
}
