use anyhow::Result;
use chrono::{DateTime, Utc};
use cloudwise_common::types::{AccountStatus, OwnedAccountIds, Provider};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde::{Deserialize, Serialize};

use crate::entities::cloud_account::{self, Column as AcctCol, Entity as AcctEntity};
use crate::store::Store;

/// Cloud account row.
///
/// `encrypted_credentials` is the AES-256-GCM blob; it never leaves the
/// backend — API response types define their own shape without it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudAccountRow {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub external_id: String,
    pub display_name: String,
    pub encrypted_credentials: String,
    pub status: AccountStatus,
    pub error_message: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user account counts for the dashboard.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudAccountSummary {
    pub total_accounts: u64,
    pub connected_accounts: u64,
    pub error_accounts: u64,
}

fn model_to_account(m: cloud_account::Model) -> Result<CloudAccountRow> {
    Ok(CloudAccountRow {
        provider: m.provider.parse().map_err(anyhow::Error::msg)?,
        status: m.status.parse().map_err(anyhow::Error::msg)?,
        id: m.id,
        user_id: m.user_id,
        external_id: m.external_id,
        display_name: m.display_name,
        encrypted_credentials: m.encrypted_credentials,
        error_message: m.error_message,
        last_sync_at: m.last_sync_at.map(|t| t.with_timezone(&Utc)),
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    })
}

/// Filter out soft-deleted rows; applied to every account query.
fn live() -> sea_orm::sea_query::SimpleExpr {
    AcctCol::DeletedAt.is_null()
}

impl Store {
    /// Resolve the account ids a user owns, per provider.
    ///
    /// Unknown users yield three empty lists — "no accounts" is a valid
    /// state. Soft-deleted accounts are never included.
    pub async fn resolve_owned_account_ids(&self, user_id: &str) -> Result<OwnedAccountIds> {
        let rows: Vec<(String, String)> = AcctEntity::find()
            .select_only()
            .column(AcctCol::Provider)
            .column(AcctCol::Id)
            .filter(AcctCol::UserId.eq(user_id))
            .filter(live())
            .into_tuple()
            .all(self.db())
            .await?;

        let mut owned = OwnedAccountIds::default();
        for (provider, id) in rows {
            match provider.parse::<Provider>() {
                Ok(p) => owned.for_provider_mut(p).push(id),
                Err(_) => {
                    tracing::warn!(provider = %provider, account_id = %id, "Skipping account with unknown provider");
                }
            }
        }
        Ok(owned)
    }

    pub async fn insert_cloud_account(&self, row: &CloudAccountRow) -> Result<CloudAccountRow> {
        let now = Utc::now().fixed_offset();
        let am = cloud_account::ActiveModel {
            id: Set(row.id.clone()),
            user_id: Set(row.user_id.clone()),
            provider: Set(row.provider.to_string()),
            external_id: Set(row.external_id.clone()),
            display_name: Set(row.display_name.clone()),
            encrypted_credentials: Set(row.encrypted_credentials.clone()),
            status: Set(row.status.to_string()),
            error_message: Set(row.error_message.clone()),
            last_sync_at: Set(row.last_sync_at.map(|t| t.fixed_offset())),
            deleted_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        model_to_account(model)
    }

    /// Fetch one account owned by `user_id`. Absent and not-owned are the
    /// same `None` — existence of other users' accounts must not leak.
    pub async fn get_cloud_account(
        &self,
        user_id: &str,
        id: &str,
    ) -> Result<Option<CloudAccountRow>> {
        let model = AcctEntity::find_by_id(id)
            .filter(AcctCol::UserId.eq(user_id))
            .filter(live())
            .one(self.db())
            .await?;
        model.map(model_to_account).transpose()
    }

    pub async fn list_cloud_accounts(&self, user_id: &str) -> Result<Vec<CloudAccountRow>> {
        let rows = AcctEntity::find()
            .filter(AcctCol::UserId.eq(user_id))
            .filter(live())
            .order_by(AcctCol::CreatedAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_account).collect()
    }

    /// Find a live account by its unique (user, provider, external id)
    /// identity, for duplicate-connect detection.
    pub async fn find_cloud_account_by_external_id(
        &self,
        user_id: &str,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<CloudAccountRow>> {
        let model = AcctEntity::find()
            .filter(AcctCol::UserId.eq(user_id))
            .filter(AcctCol::Provider.eq(provider.as_str()))
            .filter(AcctCol::ExternalId.eq(external_id))
            .filter(live())
            .one(self.db())
            .await?;
        model.map(model_to_account).transpose()
    }

    /// Record the outcome of a credential validation or sync run.
    pub async fn update_account_sync_state(
        &self,
        id: &str,
        status: AccountStatus,
        error_message: Option<&str>,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let model = AcctEntity::find_by_id(id).one(self.db()).await?;
        let m = model.ok_or_else(|| anyhow::anyhow!("Cloud account not found: {}", id))?;
        let now = Utc::now().fixed_offset();
        let mut am: cloud_account::ActiveModel = m.into();
        am.status = Set(status.to_string());
        am.error_message = Set(error_message.map(|s| s.to_owned()));
        if let Some(ts) = last_sync_at {
            am.last_sync_at = Set(Some(ts.fixed_offset()));
        }
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(())
    }

    /// Soft-delete an account the user owns. Returns false when no live
    /// owned row matched. Rows are never hard-deleted; historical cost
    /// facts keep pointing at the id.
    pub async fn soft_delete_cloud_account(&self, user_id: &str, id: &str) -> Result<bool> {
        let model = AcctEntity::find_by_id(id)
            .filter(AcctCol::UserId.eq(user_id))
            .filter(live())
            .one(self.db())
            .await?;
        let Some(m) = model else {
            return Ok(false);
        };
        let now = Utc::now().fixed_offset();
        let mut am: cloud_account::ActiveModel = m.into();
        am.deleted_at = Set(Some(now));
        am.updated_at = Set(now);
        am.update(self.db()).await?;
        Ok(true)
    }

    /// Accounts due for a background sync: live, not in error from a
    /// connect failure, last synced before `due_before` (or never).
    pub async fn list_accounts_due_for_sync(
        &self,
        due_before: DateTime<Utc>,
    ) -> Result<Vec<CloudAccountRow>> {
        let rows = AcctEntity::find()
            .filter(live())
            .filter(
                sea_orm::Condition::any()
                    .add(AcctCol::LastSyncAt.is_null())
                    .add(AcctCol::LastSyncAt.lt(due_before.fixed_offset())),
            )
            .order_by(AcctCol::LastSyncAt, Order::Asc)
            .all(self.db())
            .await?;
        rows.into_iter().map(model_to_account).collect()
    }

    pub async fn cloud_account_summary(&self, user_id: &str) -> Result<CloudAccountSummary> {
        let accounts = self.list_cloud_accounts(user_id).await?;
        let connected = accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Connected)
            .count() as u64;
        let error = accounts
            .iter()
            .filter(|a| a.status == AccountStatus::Error)
            .count() as u64;
        Ok(CloudAccountSummary {
            total_accounts: accounts.len() as u64,
            connected_accounts: connected,
            error_accounts: error,
        })
    }
}
