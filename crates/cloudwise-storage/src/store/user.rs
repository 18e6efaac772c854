use anyhow::Result;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};

use crate::entities::user::{self, Column as UserCol, Entity as UserEntity};
use crate::store::Store;

/// User account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    #[serde(skip_serializing)]
    pub token_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn model_to_user(m: user::Model) -> UserRow {
    UserRow {
        id: m.id,
        username: m.username,
        password_hash: m.password_hash,
        token_version: m.token_version,
        created_at: m.created_at.with_timezone(&Utc),
        updated_at: m.updated_at.with_timezone(&Utc),
    }
}

impl Store {
    pub async fn insert_user(&self, id: &str, username: &str, password_hash: &str) -> Result<UserRow> {
        let now = Utc::now().fixed_offset();
        let am = user::ActiveModel {
            id: Set(id.to_owned()),
            username: Set(username.to_owned()),
            password_hash: Set(password_hash.to_owned()),
            token_version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = am.insert(self.db()).await?;
        Ok(model_to_user(model))
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        let model = UserEntity::find()
            .filter(UserCol::Username.eq(username))
            .one(self.db())
            .await?;
        Ok(model.map(model_to_user))
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        let model = UserEntity::find_by_id(id).one(self.db()).await?;
        Ok(model.map(model_to_user))
    }

    /// Create the default admin user on first start if no users exist.
    pub async fn ensure_default_user(&self, username: &str, password_hash: &str) -> Result<()> {
        if self.get_user_by_username(username).await?.is_none() {
            let id = cloudwise_common::id::next_id();
            self.insert_user(&id, username, password_hash).await?;
            tracing::info!(username = %username, "Created default user");
        }
        Ok(())
    }
}
