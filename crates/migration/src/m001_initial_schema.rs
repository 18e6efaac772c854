use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_initial_schema"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Tables are created in dependency order.
        //
        // SQLite has no exact-decimal storage class, so the storage layer
        // reads the money columns as f64. A column declared `DECIMAL` has
        // NUMERIC affinity, which silently coerces whole-number floats to
        // INTEGER on write — and that INTEGER then fails to decode back as
        // f64. Declaring those columns with REAL affinity on SQLite keeps
        // the value a float end-to-end. PostgreSQL keeps `DECIMAL`
        // (exact NUMERIC), which it decodes natively.
        let sql = if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            UP_SQL.replace("DECIMAL", "REAL")
        } else {
            UP_SQL.to_string()
        };
        manager.get_connection().execute_unprepared(&sql).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(DOWN_SQL)
            .await?;
        Ok(())
    }
}

const UP_SQL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    token_version INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cloud_accounts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    external_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    encrypted_credentials TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    error_message TEXT,
    last_sync_at TEXT,
    deleted_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cloud_accounts_user ON cloud_accounts(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cloud_accounts_owner_external
    ON cloud_accounts(user_id, provider, external_id)
    WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS cost_data (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    account_id TEXT NOT NULL,
    date TEXT NOT NULL,
    service TEXT NOT NULL,
    cost DECIMAL NOT NULL,
    usage_quantity DECIMAL,
    currency TEXT NOT NULL DEFAULT 'USD',
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_cost_data_fact
    ON cost_data(provider, account_id, date, service);
CREATE INDEX IF NOT EXISTS idx_cost_data_scope_date ON cost_data(provider, account_id, date);
CREATE INDEX IF NOT EXISTS idx_cost_data_date ON cost_data(date);

CREATE TABLE IF NOT EXISTS resources (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    account_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    name TEXT,
    resource_type TEXT NOT NULL,
    region TEXT NOT NULL,
    status TEXT NOT NULL,
    utilization REAL,
    cost_per_month DECIMAL NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '{}',
    metrics TEXT NOT NULL DEFAULT '{}',
    last_synced_at TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_resources_identity
    ON resources(provider, account_id, resource_id);
CREATE INDEX IF NOT EXISTS idx_resources_type ON resources(resource_type);
CREATE INDEX IF NOT EXISTS idx_resources_region ON resources(region);

CREATE TABLE IF NOT EXISTS recommendations (
    id TEXT PRIMARY KEY NOT NULL,
    provider TEXT NOT NULL,
    account_id TEXT NOT NULL,
    resource_id TEXT NOT NULL,
    recommendation_type TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    status TEXT NOT NULL DEFAULT 'open',
    potential_savings DECIMAL NOT NULL DEFAULT 0,
    impact TEXT NOT NULL DEFAULT 'medium',
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_recommendations_scope ON recommendations(provider, account_id);
CREATE INDEX IF NOT EXISTS idx_recommendations_status ON recommendations(status);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL,
    severity TEXT NOT NULL DEFAULT 'info',
    status TEXT NOT NULL DEFAULT 'new',
    category TEXT NOT NULL DEFAULT 'other',
    title TEXT NOT NULL,
    message TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'system',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_user ON alerts(user_id);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at DESC);
";

const DOWN_SQL: &str = "
DROP TABLE IF EXISTS alerts;
DROP TABLE IF EXISTS recommendations;
DROP TABLE IF EXISTS resources;
DROP TABLE IF EXISTS cost_data;
DROP TABLE IF EXISTS cloud_accounts;
DROP TABLE IF EXISTS users;
";
