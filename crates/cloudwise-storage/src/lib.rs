//! Relational storage layer for accounts, cost facts, resources,
//! recommendations, and alerts.
//!
//! All access goes through [`store::Store`], a thin facade over a SeaORM
//! [`sea_orm::DatabaseConnection`] (SQLite or PostgreSQL, selected by the
//! connection URL). Queries against the shared fact tables are scoped to
//! the requesting user's accounts through the provider-discriminated
//! filter in [`store::scope`]; there is no `user_id` column on those
//! tables, ownership is always reconstructed per provider.

pub mod credentials;
pub mod entities;
pub mod store;

#[cfg(test)]
mod tests;

pub use store::account::CloudAccountRow;
pub use store::alert::{AlertFilter, AlertRow, AlertSummary};
pub use store::cost::{AccountCostRow, CostDatumRow, CostFilter};
pub use store::recommendation::{
    RecommendationFilter, RecommendationRow, RecommendationSummary, StatusUpdateOutcome,
};
pub use store::resource::{ResourceFilter, ResourceRow, ResourceSummary};
pub use store::user::UserRow;
pub use store::Store;
