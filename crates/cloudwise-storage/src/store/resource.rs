use anyhow::Result;
use chrono::{DateTime, Utc};
use cloudwise_common::types::{AccountRef, OwnedAccountIds, Provider};
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::resource::{self, Column as ResCol, Entity as ResEntity};
use crate::store::scope::scope_condition;
use crate::store::Store;

/// Cloud resource snapshot row. `tags` and `metrics` are stored as JSON
/// text and decoded here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRow {
    pub id: String,
    pub account: AccountRef,
    pub resource_id: String,
    pub name: Option<String>,
    pub resource_type: String,
    pub region: String,
    pub status: String,
    pub utilization: Option<f64>,
    pub cost_per_month: Decimal,
    pub tags: HashMap<String, String>,
    pub metrics: serde_json::Value,
    pub last_synced_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrowing predicates for resource queries.
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub provider_eq: Option<Provider>,
    pub resource_type_eq: Option<String>,
    pub region_eq: Option<String>,
    pub status_eq: Option<String>,
    pub tag_eq: Option<(String, String)>,
}

/// Status rollup across a user's resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub total_resources: u64,
    pub running_resources: u64,
    pub stopped_resources: u64,
    pub other_resources: u64,
    pub total_monthly_cost: Decimal,
}

fn model_to_resource(m: resource::Model) -> Result<ResourceRow> {
    let provider: Provider = m.provider.parse().map_err(anyhow::Error::msg)?;
    let tags: HashMap<String, String> = serde_json::from_str(&m.tags).unwrap_or_default();
    let metrics: serde_json::Value =
        serde_json::from_str(&m.metrics).unwrap_or(serde_json::Value::Null);
    Ok(ResourceRow {
        account: AccountRef::new(provider, m.account_id),
        id: m.id,
        resource_id: m.resource_id,
        name: m.name,
        resource_type: m.resource_type,
        region: m.region,
        status: m.status,
        utilization: m.utilization,
        cost_per_month: m.cost_per_month,
        tags,
        metrics,
        last_synced_at: m.last_synced_at.with_timezone(&Utc),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn apply_filter(
    mut q: sea_orm::Select<ResEntity>,
    filter: &ResourceFilter,
) -> sea_orm::Select<ResEntity> {
    if let Some(p) = filter.provider_eq {
        q = q.filter(ResCol::Provider.eq(p.as_str()));
    }
    if let Some(t) = &filter.resource_type_eq {
        q = q.filter(ResCol::ResourceType.eq(t.clone()));
    }
    if let Some(r) = &filter.region_eq {
        q = q.filter(ResCol::Region.eq(r.clone()));
    }
    if let Some(s) = &filter.status_eq {
        q = q.filter(ResCol::Status.eq(s.clone()));
    }
    q
}

/// Tag filters match on the JSON text; applied post-fetch since tags are
/// an opaque map to the database.
fn matches_tag(row: &ResourceRow, filter: &ResourceFilter) -> bool {
    match &filter.tag_eq {
        None => true,
        Some((key, value)) => row.tags.get(key).is_some_and(|v| v == value),
    }
}

impl Store {
    /// Upsert a resource snapshot by its (provider, account, resource)
    /// identity. `created_at` is preserved across upserts; everything
    /// else reflects the latest sync.
    pub async fn upsert_resource(&self, row: &ResourceRow) -> Result<()> {
        let now = Utc::now().fixed_offset();
        let tags_json = serde_json::to_string(&row.tags)?;
        let metrics_json = serde_json::to_string(&row.metrics)?;
        let am = resource::ActiveModel {
            id: Set(row.id.clone()),
            provider: Set(row.account.provider().to_string()),
            account_id: Set(row.account.account_id().to_owned()),
            resource_id: Set(row.resource_id.clone()),
            name: Set(row.name.clone()),
            resource_type: Set(row.resource_type.clone()),
            region: Set(row.region.clone()),
            status: Set(row.status.clone()),
            utilization: Set(row.utilization),
            cost_per_month: Set(row.cost_per_month),
            tags: Set(tags_json),
            metrics: Set(metrics_json),
            last_synced_at: Set(row.last_synced_at.fixed_offset()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        ResEntity::insert(am)
            .on_conflict(
                OnConflict::columns([ResCol::Provider, ResCol::AccountId, ResCol::ResourceId])
                    .update_columns([
                        ResCol::Name,
                        ResCol::ResourceType,
                        ResCol::Region,
                        ResCol::Status,
                        ResCol::Utilization,
                        ResCol::CostPerMonth,
                        ResCol::Tags,
                        ResCol::Metrics,
                        ResCol::LastSyncedAt,
                        ResCol::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(self.db())
            .await?;
        Ok(())
    }

    pub async fn query_resources(
        &self,
        owned: &OwnedAccountIds,
        filter: &ResourceFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ResourceRow>> {
        let Some(scope) = scope_condition(ResCol::Provider, ResCol::AccountId, owned) else {
            return Ok(Vec::new());
        };
        let q = apply_filter(ResEntity::find().filter(scope), filter)
            .order_by(ResCol::CostPerMonth, Order::Desc)
            .order_by(ResCol::ResourceId, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64);
        let rows = q.all(self.db()).await?;
        let rows: Vec<ResourceRow> = rows
            .into_iter()
            .map(model_to_resource)
            .collect::<Result<_>>()?;
        Ok(rows.into_iter().filter(|r| matches_tag(r, filter)).collect())
    }

    pub async fn count_resources(
        &self,
        owned: &OwnedAccountIds,
        filter: &ResourceFilter,
    ) -> Result<u64> {
        let Some(scope) = scope_condition(ResCol::Provider, ResCol::AccountId, owned) else {
            return Ok(0);
        };
        Ok(apply_filter(ResEntity::find().filter(scope), filter)
            .count(self.db())
            .await?)
    }

    /// Fetch every scoped resource (no pagination), for summaries and
    /// idle-resource analysis.
    pub async fn query_all_resources(&self, owned: &OwnedAccountIds) -> Result<Vec<ResourceRow>> {
        let Some(scope) = scope_condition(ResCol::Provider, ResCol::AccountId, owned) else {
            return Ok(Vec::new());
        };
        let rows = ResEntity::find()
            .filter(scope)
            .order_by(ResCol::ResourceId, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_resource).collect()
    }

    pub async fn resource_summary(&self, owned: &OwnedAccountIds) -> Result<ResourceSummary> {
        let rows = self.query_all_resources(owned).await?;
        let mut summary = ResourceSummary::default();
        for row in &rows {
            summary.total_resources += 1;
            summary.total_monthly_cost += row.cost_per_month;
            match row.status.to_lowercase().as_str() {
                "running" | "active" | "started" => summary.running_resources += 1,
                "stopped" | "deallocated" | "terminated" => summary.stopped_resources += 1,
                _ => summary.other_resources += 1,
            }
        }
        Ok(summary)
    }
}
