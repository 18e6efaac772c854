use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "resources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub provider: String,
    pub account_id: String,
    pub resource_id: String,
    pub name: Option<String>,
    pub resource_type: String,
    pub region: String,
    pub status: String,
    pub utilization: Option<f64>,
    pub cost_per_month: Decimal,
    pub tags: String,
    pub metrics: String,
    pub last_synced_at: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
