use anyhow::Result;
use chrono::{DateTime, Utc};
use cloudwise_common::types::{AlertCategory, AlertStatus, Severity};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::entities::alert::{self, Column as AlertCol, Entity as AlertEntity};
use crate::store::Store;

/// Alert row. Alerts are owned directly through `user_id`, unlike the
/// fact tables which are scoped through account ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub user_id: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub category: AlertCategory,
    pub title: String,
    pub message: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Narrowing predicates for alert queries.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity_eq: Option<Severity>,
    pub status_eq: Option<AlertStatus>,
    pub category_eq: Option<AlertCategory>,
}

/// Alert counts by severity, status, and category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertSummary {
    pub total: u64,
    pub by_severity: HashMap<String, u64>,
    pub by_status: HashMap<String, u64>,
    pub by_category: HashMap<String, u64>,
}

fn model_to_alert(m: alert::Model) -> Result<AlertRow> {
    Ok(AlertRow {
        severity: m.severity.parse().map_err(anyhow::Error::msg)?,
        status: m.status.parse().map_err(anyhow::Error::msg)?,
        category: m.category.parse().map_err(anyhow::Error::msg)?,
        id: m.id,
        user_id: m.user_id,
        title: m.title,
        message: m.message,
        source: m.source,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

fn apply_filter(
    mut q: sea_orm::Select<AlertEntity>,
    filter: &AlertFilter,
) -> sea_orm::Select<AlertEntity> {
    if let Some(s) = filter.severity_eq {
        q = q.filter(AlertCol::Severity.eq(s.to_string()));
    }
    if let Some(s) = filter.status_eq {
        q = q.filter(AlertCol::Status.eq(s.to_string()));
    }
    if let Some(c) = filter.category_eq {
        q = q.filter(AlertCol::Category.eq(c.to_string()));
    }
    q
}

impl Store {
    pub async fn insert_alert(&self, row: &AlertRow) -> Result<AlertRow> {
        let now = Utc::now().fixed_offset();
        let am = alert::ActiveModel {
            id: Set(row.id.clone()),
            user_id: Set(row.user_id.clone()),
            severity: Set(row.severity.to_string()),
            status: Set(row.status.to_string()),
            category: Set(row.category.to_string()),
            title: Set(row.title.clone()),
            message: Set(row.message.clone()),
            source: Set(row.source.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        model_to_alert(model)
    }

    pub async fn list_alerts(
        &self,
        user_id: &str,
        filter: &AlertFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AlertRow>> {
        let rows = apply_filter(
            AlertEntity::find().filter(AlertCol::UserId.eq(user_id)),
            filter,
        )
        .order_by(AlertCol::CreatedAt, Order::Desc)
        .order_by(AlertCol::Id, Order::Asc)
        .limit(limit as u64)
        .offset(offset as u64)
        .all(self.db())
        .await?;
        rows.into_iter().map(model_to_alert).collect()
    }

    pub async fn count_alerts(&self, user_id: &str, filter: &AlertFilter) -> Result<u64> {
        Ok(apply_filter(
            AlertEntity::find().filter(AlertCol::UserId.eq(user_id)),
            filter,
        )
        .count(self.db())
        .await?)
    }

    pub async fn get_alert(&self, user_id: &str, id: &str) -> Result<Option<AlertRow>> {
        let model = AlertEntity::find_by_id(id)
            .filter(AlertCol::UserId.eq(user_id))
            .one(self.db())
            .await?;
        model.map(model_to_alert).transpose()
    }

    /// Move an alert forward through its lifecycle. Returns the updated
    /// row, or `None` when no owned row matched. Backward transitions are
    /// rejected by the caller before reaching here; the conditional
    /// filter still guards against a concurrent writer.
    pub async fn update_alert_status(
        &self,
        user_id: &str,
        id: &str,
        expected: AlertStatus,
        next: AlertStatus,
    ) -> Result<Option<AlertRow>> {
        use sea_orm::sea_query::Expr;
        let now = Utc::now().fixed_offset();
        let result = AlertEntity::update_many()
            .col_expr(AlertCol::Status, Expr::value(next.to_string()))
            .col_expr(AlertCol::UpdatedAt, Expr::value(now))
            .filter(AlertCol::Id.eq(id))
            .filter(AlertCol::UserId.eq(user_id))
            .filter(AlertCol::Status.eq(expected.to_string()))
            .exec(self.db())
            .await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.get_alert(user_id, id).await
    }

    pub async fn alert_summary(&self, user_id: &str) -> Result<AlertSummary> {
        let rows = AlertEntity::find()
            .filter(AlertCol::UserId.eq(user_id))
            .all(self.db())
            .await?;
        let mut summary = AlertSummary::default();
        for m in rows {
            summary.total += 1;
            *summary.by_severity.entry(m.severity.clone()).or_insert(0) += 1;
            *summary.by_status.entry(m.status.clone()).or_insert(0) += 1;
            *summary.by_category.entry(m.category.clone()).or_insert(0) += 1;
        }
        Ok(summary)
    }
}
