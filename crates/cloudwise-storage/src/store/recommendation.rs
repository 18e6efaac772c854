use anyhow::Result;
use chrono::{DateTime, Utc};
use cloudwise_common::types::{
    AccountRef, Impact, OwnedAccountIds, Provider, RecommendationStatus, StatusHistoryEntry,
};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::recommendation::{self, Column as RecCol, Entity as RecEntity};
use crate::store::scope::scope_condition;
use crate::store::Store;

/// Cost-saving recommendation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRow {
    pub id: String,
    pub account: AccountRef,
    pub resource_id: String,
    pub recommendation_type: String,
    pub title: String,
    pub description: Option<String>,
    pub status: RecommendationStatus,
    pub potential_savings: Decimal,
    pub impact: Impact,
    pub status_history: Vec<StatusHistoryEntry>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrowing predicates for recommendation queries.
#[derive(Debug, Clone, Default)]
pub struct RecommendationFilter {
    pub status_eq: Option<RecommendationStatus>,
    pub provider_eq: Option<Provider>,
    pub impact_eq: Option<Impact>,
    pub recommendation_type_eq: Option<String>,
}

/// Counts and savings rollup; per-type and per-provider breakdowns are
/// computed by the insights layer from the full row set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationSummary {
    pub total: u64,
    pub open: u64,
    pub in_progress: u64,
    pub implemented: u64,
    pub dismissed: u64,
    pub expired: u64,
    pub total_potential_savings: Decimal,
    pub implemented_savings: Decimal,
}

/// Result of a guarded status update.
#[derive(Debug, Clone)]
pub enum StatusUpdateOutcome {
    /// Transition applied; the refreshed row.
    Updated(RecommendationRow),
    /// No live row with this id inside the caller's scope. Absent and
    /// not-owned are deliberately the same outcome.
    NotFound,
    /// The state machine forbids this transition.
    InvalidTransition { from: RecommendationStatus },
    /// A concurrent update changed the row between read and write; the
    /// caller may re-read and retry.
    Conflict,
}

const STATUS_HISTORY_KEY: &str = "status_history";

fn model_to_recommendation(m: recommendation::Model) -> Result<RecommendationRow> {
    let provider: Provider = m.provider.parse().map_err(anyhow::Error::msg)?;
    let metadata: serde_json::Value =
        serde_json::from_str(&m.metadata).unwrap_or_else(|_| serde_json::json!({}));
    let status_history: Vec<StatusHistoryEntry> = metadata
        .get(STATUS_HISTORY_KEY)
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .unwrap_or_default()
        .unwrap_or_default();
    Ok(RecommendationRow {
        account: AccountRef::new(provider, m.account_id),
        status: m.status.parse().map_err(anyhow::Error::msg)?,
        impact: m.impact.parse().map_err(anyhow::Error::msg)?,
        id: m.id,
        resource_id: m.resource_id,
        recommendation_type: m.recommendation_type,
        title: m.title,
        description: m.description,
        potential_savings: m.potential_savings,
        status_history,
        metadata,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn apply_filter(
    mut q: sea_orm::Select<RecEntity>,
    filter: &RecommendationFilter,
) -> sea_orm::Select<RecEntity> {
    if let Some(s) = filter.status_eq {
        q = q.filter(RecCol::Status.eq(s.to_string()));
    }
    if let Some(p) = filter.provider_eq {
        q = q.filter(RecCol::Provider.eq(p.as_str()));
    }
    if let Some(i) = filter.impact_eq {
        q = q.filter(RecCol::Impact.eq(i.to_string()));
    }
    if let Some(t) = &filter.recommendation_type_eq {
        q = q.filter(RecCol::RecommendationType.eq(t.clone()));
    }
    q
}

impl Store {
    pub async fn insert_recommendation(&self, row: &RecommendationRow) -> Result<RecommendationRow> {
        let now = Utc::now().fixed_offset();
        let mut metadata = row.metadata.clone();
        if !metadata.is_object() {
            metadata = serde_json::json!({});
        }
        let am = recommendation::ActiveModel {
            id: Set(row.id.clone()),
            provider: Set(row.account.provider().to_string()),
            account_id: Set(row.account.account_id().to_owned()),
            resource_id: Set(row.resource_id.clone()),
            recommendation_type: Set(row.recommendation_type.clone()),
            title: Set(row.title.clone()),
            description: Set(row.description.clone()),
            status: Set(row.status.to_string()),
            potential_savings: Set(row.potential_savings),
            impact: Set(row.impact.to_string()),
            metadata: Set(serde_json::to_string(&metadata)?),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        model_to_recommendation(model)
    }

    pub async fn query_recommendations(
        &self,
        owned: &OwnedAccountIds,
        filter: &RecommendationFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<RecommendationRow>> {
        let Some(scope) = scope_condition(RecCol::Provider, RecCol::AccountId, owned) else {
            return Ok(Vec::new());
        };
        let rows = apply_filter(RecEntity::find().filter(scope), filter)
            .order_by(RecCol::PotentialSavings, Order::Desc)
            .order_by(RecCol::Id, Order::Asc)
            .limit(limit as u64)
            .offset(offset as u64)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_recommendation).collect()
    }

    pub async fn count_recommendations(
        &self,
        owned: &OwnedAccountIds,
        filter: &RecommendationFilter,
    ) -> Result<u64> {
        let Some(scope) = scope_condition(RecCol::Provider, RecCol::AccountId, owned) else {
            return Ok(0);
        };
        Ok(apply_filter(RecEntity::find().filter(scope), filter)
            .count(self.db())
            .await?)
    }

    /// Fetch every scoped recommendation, for the summary endpoint's
    /// breakdowns.
    pub async fn query_all_recommendations(
        &self,
        owned: &OwnedAccountIds,
    ) -> Result<Vec<RecommendationRow>> {
        let Some(scope) = scope_condition(RecCol::Provider, RecCol::AccountId, owned) else {
            return Ok(Vec::new());
        };
        let rows = RecEntity::find()
            .filter(scope)
            .order_by(RecCol::Id, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_recommendation).collect()
    }

    pub async fn get_recommendation(
        &self,
        owned: &OwnedAccountIds,
        id: &str,
    ) -> Result<Option<RecommendationRow>> {
        let Some(scope) = scope_condition(RecCol::Provider, RecCol::AccountId, owned) else {
            return Ok(None);
        };
        let model = RecEntity::find_by_id(id)
            .filter(scope)
            .one(self.db())
            .await?;
        model.map(model_to_recommendation).transpose()
    }

    /// Apply a state-machine transition and append to the status history.
    ///
    /// The write is a single conditional UPDATE filtered on the status the
    /// caller read, so two concurrent transitions on the same row cannot
    /// both win: the loser's UPDATE matches zero rows and surfaces as
    /// [`StatusUpdateOutcome::Conflict`]. The history array inside
    /// `metadata` is append-only; entries are never rewritten or removed.
    pub async fn update_recommendation_status(
        &self,
        owned: &OwnedAccountIds,
        id: &str,
        new_status: RecommendationStatus,
        acting_user_id: &str,
    ) -> Result<StatusUpdateOutcome> {
        let Some(current) = self.get_recommendation(owned, id).await? else {
            return Ok(StatusUpdateOutcome::NotFound);
        };

        if !current.status.can_transition_to(new_status) {
            return Ok(StatusUpdateOutcome::InvalidTransition {
                from: current.status,
            });
        }

        let now = Utc::now();
        let entry = StatusHistoryEntry {
            previous_status: current.status,
            new_status,
            timestamp: now,
            user_id: acting_user_id.to_owned(),
        };

        let mut metadata_obj = match current.metadata.clone() {
            serde_json::Value::Object(obj) => obj,
            _ => serde_json::Map::new(),
        };
        let history = metadata_obj
            .entry(STATUS_HISTORY_KEY)
            .or_insert_with(|| serde_json::json!([]));
        if let Some(arr) = history.as_array_mut() {
            arr.push(serde_json::to_value(&entry)?);
        }
        let metadata = serde_json::Value::Object(metadata_obj);

        use sea_orm::sea_query::Expr;
        let result = RecEntity::update_many()
            .col_expr(RecCol::Status, Expr::value(new_status.to_string()))
            .col_expr(RecCol::Metadata, Expr::value(serde_json::to_string(&metadata)?))
            .col_expr(RecCol::UpdatedAt, Expr::value(now.fixed_offset()))
            .filter(RecCol::Id.eq(id))
            .filter(RecCol::Status.eq(current.status.to_string()))
            .exec(self.db())
            .await?;

        if result.rows_affected == 0 {
            return Ok(StatusUpdateOutcome::Conflict);
        }

        match self.get_recommendation(owned, id).await? {
            Some(row) => Ok(StatusUpdateOutcome::Updated(row)),
            None => Ok(StatusUpdateOutcome::NotFound),
        }
    }

    pub async fn recommendation_summary(
        &self,
        owned: &OwnedAccountIds,
    ) -> Result<RecommendationSummary> {
        let rows = self.query_all_recommendations(owned).await?;
        let mut summary = RecommendationSummary::default();
        for row in &rows {
            summary.total += 1;
            summary.total_potential_savings += row.potential_savings;
            match row.status {
                RecommendationStatus::Open => summary.open += 1,
                RecommendationStatus::InProgress => summary.in_progress += 1,
                RecommendationStatus::Implemented => {
                    summary.implemented += 1;
                    summary.implemented_savings += row.potential_savings;
                }
                RecommendationStatus::Dismissed => summary.dismissed += 1,
                RecommendationStatus::Expired => summary.expired += 1,
            }
        }
        Ok(summary)
    }
}
