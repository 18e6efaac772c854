use sea_orm::entity::prelude::*;

/// One (provider, account, date, service, cost) fact row. Immutable once
/// written; `account_id` joins to `cloud_accounts` through the sibling
/// `provider` discriminant, not through a schema-level foreign key.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cost_data")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub provider: String,
    pub account_id: String,
    pub date: Date,
    pub service: String,
    pub cost: Decimal,
    pub usage_quantity: Option<Decimal>,
    pub currency: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
