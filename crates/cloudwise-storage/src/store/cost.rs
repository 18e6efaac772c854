use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use cloudwise_common::types::{AccountRef, OwnedAccountIds, Provider};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};

use crate::entities::cost_datum::{self, Column as CostCol, Entity as CostEntity};
use crate::store::scope::scope_condition;
use crate::store::Store;

/// Cost fact row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostDatumRow {
    pub id: String,
    pub account: AccountRef,
    pub date: NaiveDate,
    pub service: String,
    pub cost: Decimal,
    pub usage_quantity: Option<Decimal>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied narrowing predicates, ANDed onto the ownership scope.
#[derive(Debug, Clone, Default)]
pub struct CostFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub service_eq: Option<String>,
    pub provider_eq: Option<Provider>,
}

/// Per-account cost total, joined with account display fields by the
/// API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCostRow {
    pub account: AccountRef,
    pub cost: Decimal,
}

fn model_to_datum(m: cost_datum::Model) -> Result<CostDatumRow> {
    let provider: Provider = m.provider.parse().map_err(anyhow::Error::msg)?;
    Ok(CostDatumRow {
        account: AccountRef::new(provider, m.account_id),
        id: m.id,
        date: m.date,
        service: m.service,
        cost: m.cost,
        usage_quantity: m.usage_quantity,
        currency: m.currency,
        created_at: m.created_at.with_timezone(&Utc),
    })
}

impl Store {
    /// Query cost facts visible to the owner of `owned`, narrowed by
    /// `filter`, ordered by date ascending (then service, for a stable
    /// output). An empty owner set short-circuits without a query.
    pub async fn query_cost_data(
        &self,
        owned: &OwnedAccountIds,
        filter: &CostFilter,
    ) -> Result<Vec<CostDatumRow>> {
        let Some(scope) = scope_condition(CostCol::Provider, CostCol::AccountId, owned) else {
            return Ok(Vec::new());
        };

        let mut q = CostEntity::find().filter(scope);
        if let Some(start) = filter.start_date {
            q = q.filter(CostCol::Date.gte(start));
        }
        if let Some(end) = filter.end_date {
            q = q.filter(CostCol::Date.lte(end));
        }
        if let Some(service) = &filter.service_eq {
            q = q.filter(CostCol::Service.eq(service.clone()));
        }
        if let Some(provider) = filter.provider_eq {
            q = q.filter(CostCol::Provider.eq(provider.as_str()));
        }

        let rows = q
            .order_by(CostCol::Date, Order::Asc)
            .order_by(CostCol::Service, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_datum).collect()
    }

    /// Replace the cost facts for one account over a date window with a
    /// freshly synced batch. Facts are immutable individually; a re-sync
    /// swaps the whole (account, window) slice so partial provider
    /// responses never leave stale rows behind.
    pub async fn replace_cost_window(
        &self,
        account: &AccountRef,
        start: NaiveDate,
        end: NaiveDate,
        rows: &[CostDatumRow],
    ) -> Result<usize> {
        CostEntity::delete_many()
            .filter(CostCol::Provider.eq(account.provider().as_str()))
            .filter(CostCol::AccountId.eq(account.account_id()))
            .filter(CostCol::Date.gte(start))
            .filter(CostCol::Date.lte(end))
            .exec(self.db())
            .await?;

        if rows.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().fixed_offset();
        let models: Vec<cost_datum::ActiveModel> = rows
            .iter()
            .map(|r| cost_datum::ActiveModel {
                id: sea_orm::ActiveValue::Set(r.id.clone()),
                provider: sea_orm::ActiveValue::Set(r.account.provider().to_string()),
                account_id: sea_orm::ActiveValue::Set(r.account.account_id().to_owned()),
                date: sea_orm::ActiveValue::Set(r.date),
                service: sea_orm::ActiveValue::Set(r.service.clone()),
                cost: sea_orm::ActiveValue::Set(r.cost),
                usage_quantity: sea_orm::ActiveValue::Set(r.usage_quantity),
                currency: sea_orm::ActiveValue::Set(r.currency.clone()),
                created_at: sea_orm::ActiveValue::Set(now),
            })
            .collect();
        let inserted = models.len();
        CostEntity::insert_many(models).exec(self.db()).await?;
        Ok(inserted)
    }
}
