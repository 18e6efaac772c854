use crate::config::ServerConfig;
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use cloudwise_common::id::next_id;
use cloudwise_common::types::{
    AccountRef, AccountStatus, AlertCategory, AlertStatus, Impact, OwnedAccountIds,
    RecommendationStatus, Severity,
};
use cloudwise_insights::aggregate::pivot_daily_by_provider;
use cloudwise_insights::anomaly;
use cloudwise_insights::idle::find_idle;
use cloudwise_insights::{CostRecord, ResourceUsage};
use cloudwise_notify::{DomainEvent, EventBus};
use cloudwise_providers::build_adapter;
use cloudwise_storage::{
    AlertFilter, AlertRow, CloudAccountRow, CostDatumRow, CostFilter, RecommendationFilter,
    RecommendationRow, ResourceRow, Store,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{interval, timeout, Duration};

pub struct SyncOutcome {
    pub cost_rows: usize,
    pub resources: usize,
}

/// Run one full sync for an account: pull cost facts over the configured
/// window, snapshot resources, and record the result on the account row.
/// Success and failure both land in the account's sync state and on the
/// event bus; the caller only decides scheduling and timeouts.
pub async fn run_account_sync(
    store: &Store,
    events: &EventBus,
    config: &ServerConfig,
    account: &CloudAccountRow,
) -> Result<SyncOutcome> {
    match sync_inner(store, config, account).await {
        Ok(outcome) => {
            store
                .update_account_sync_state(
                    &account.id,
                    AccountStatus::Connected,
                    None,
                    Some(Utc::now()),
                )
                .await?;
            events.emit(DomainEvent::AccountSynced {
                user_id: account.user_id.clone(),
                provider: account.provider,
                account_id: account.id.clone(),
                display_name: account.display_name.clone(),
                cost_rows: outcome.cost_rows,
                resources: outcome.resources,
            });
            if let Err(e) = check_cost_anomaly(store, events, config, &account.user_id).await {
                tracing::warn!(error = %e, user_id = %account.user_id, "Post-sync anomaly check failed");
            }
            Ok(outcome)
        }
        Err(e) => {
            let message = e.to_string();
            tracing::error!(
                account_id = %account.id,
                provider = %account.provider,
                error = %message,
                "Account sync failed"
            );
            store
                .update_account_sync_state(
                    &account.id,
                    AccountStatus::Error,
                    Some(&message),
                    None,
                )
                .await?;
            let alert = AlertRow {
                id: next_id(),
                user_id: account.user_id.clone(),
                severity: Severity::High,
                status: AlertStatus::New,
                category: AlertCategory::Availability,
                title: format!("Sync failed for {}", account.display_name),
                message: message.clone(),
                source: "sync".to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            if let Err(insert_err) = store.insert_alert(&alert).await {
                tracing::error!(error = %insert_err, "Failed to persist sync-failure alert");
            }
            events.emit(DomainEvent::AccountSyncFailed {
                user_id: account.user_id.clone(),
                provider: account.provider,
                account_id: account.id.clone(),
                display_name: account.display_name.clone(),
                error: message,
            });
            Err(e)
        }
    }
}

async fn sync_inner(
    store: &Store,
    config: &ServerConfig,
    account: &CloudAccountRow,
) -> Result<SyncOutcome> {
    let credentials = store
        .encryptor()
        .decrypt(&account.encrypted_credentials)
        .context("Failed to decrypt account credentials")?;
    let adapter = build_adapter(account.provider, &credentials)?;

    let end = Utc::now().date_naive();
    let start = end - ChronoDuration::days(i64::from(config.sync.cost_window_days) - 1);
    let account_ref = AccountRef::new(account.provider, account.id.clone());

    let normalized = adapter
        .fetch_cost_and_usage(&account.external_id, start, end)
        .await?;
    let mut cost_rows = Vec::with_capacity(normalized.len());
    for record in normalized {
        if record.cost < Decimal::ZERO {
            // Credits and refunds show up as negative amounts on some
            // providers; the fact table holds gross spend only.
            tracing::warn!(
                service = %record.service,
                date = %record.date,
                cost = %record.cost,
                "Skipping negative cost record"
            );
            continue;
        }
        cost_rows.push(CostDatumRow {
            id: next_id(),
            account: account_ref.clone(),
            date: record.date,
            service: record.service,
            cost: record.cost,
            usage_quantity: record.usage_quantity,
            currency: record.currency,
            created_at: Utc::now(),
        });
    }
    let inserted = store
        .replace_cost_window(&account_ref, start, end, &cost_rows)
        .await?;

    let resources = adapter.fetch_resources(&account.external_id).await?;
    let resource_count = resources.len();
    for resource in resources {
        let row = ResourceRow {
            id: next_id(),
            account: account_ref.clone(),
            resource_id: resource.resource_id,
            name: resource.name,
            resource_type: resource.resource_type,
            region: resource.region,
            status: resource.status,
            utilization: resource.utilization,
            cost_per_month: resource.cost_per_month,
            tags: resource.tags,
            metrics: resource.metrics,
            last_synced_at: resource.observed_at,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.upsert_resource(&row).await?;
    }

    generate_idle_recommendations(store, config, account, &account_ref).await?;

    Ok(SyncOutcome {
        cost_rows: inserted,
        resources: resource_count,
    })
}

/// Derive rightsizing recommendations from the freshly synced inventory:
/// one open recommendation per idle resource, skipping resources that
/// already have a live one so a re-sync does not duplicate. Potential
/// savings is the resource's monthly cost — the saving of turning it off.
async fn generate_idle_recommendations(
    store: &Store,
    config: &ServerConfig,
    account: &CloudAccountRow,
    account_ref: &AccountRef,
) -> Result<()> {
    let mut scope = OwnedAccountIds::default();
    scope
        .for_provider_mut(account.provider)
        .push(account.id.clone());

    let resources = store.query_all_resources(&scope).await?;
    let usages: Vec<ResourceUsage> = resources
        .iter()
        .map(|r| ResourceUsage {
            account: r.account.clone(),
            resource_id: r.resource_id.clone(),
            name: r.name.clone(),
            resource_type: r.resource_type.clone(),
            region: r.region.clone(),
            status: r.status.clone(),
            utilization: r.utilization,
            cost_per_month: r.cost_per_month,
        })
        .collect();
    let idle = find_idle(&usages, config.insights.idle_utilization_threshold);
    if idle.is_empty() {
        return Ok(());
    }

    let existing = store
        .query_recommendations(&scope, &RecommendationFilter::default(), 1000, 0)
        .await?;
    let has_live = |resource_id: &str| {
        existing
            .iter()
            .any(|r| r.resource_id == resource_id && !r.status.is_terminal())
    };

    for resource in idle {
        if has_live(&resource.resource_id) {
            continue;
        }
        let impact = if resource.cost_per_month >= Decimal::from(100) {
            Impact::High
        } else if resource.cost_per_month >= Decimal::from(20) {
            Impact::Medium
        } else {
            Impact::Low
        };
        let label = resource
            .name
            .clone()
            .unwrap_or_else(|| resource.resource_id.clone());
        let row = RecommendationRow {
            id: next_id(),
            account: account_ref.clone(),
            resource_id: resource.resource_id.clone(),
            recommendation_type: "idle_resource".to_string(),
            title: format!("Stop or downsize idle {} {label}", resource.resource_type),
            description: Some(format!(
                "Utilization {:.1}% is below the {:.0}% idle threshold; stopping it saves about {} per month",
                resource.utilization.unwrap_or(0.0),
                config.insights.idle_utilization_threshold,
                resource.cost_per_month,
            )),
            status: RecommendationStatus::Open,
            potential_savings: resource.cost_per_month,
            impact,
            status_history: Vec::new(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        store.insert_recommendation(&row).await?;
    }
    Ok(())
}

/// Score the user's recent daily totals and raise a cost alert when the
/// latest day is an outlier. One alert per (user, day); a re-sync on the
/// same day must not stack duplicates.
async fn check_cost_anomaly(
    store: &Store,
    events: &EventBus,
    config: &ServerConfig,
    user_id: &str,
) -> Result<()> {
    let owned = store.resolve_owned_account_ids(user_id).await?;
    if owned.is_empty() {
        return Ok(());
    }

    let end = Utc::now().date_naive();
    let start = end - ChronoDuration::days(i64::from(config.insights.anomaly_window_days) - 1);
    let rows = store
        .query_cost_data(
            &owned,
            &CostFilter {
                start_date: Some(start),
                end_date: Some(end),
                ..Default::default()
            },
        )
        .await?;
    let records: Vec<CostRecord> = rows
        .into_iter()
        .map(|r| CostRecord {
            account: r.account,
            date: r.date,
            service: r.service,
            cost: r.cost,
        })
        .collect();

    let daily = pivot_daily_by_provider(&records, start, end);
    let series: Vec<f64> = daily
        .iter()
        .map(|d| d.total.to_f64().unwrap_or(0.0))
        .collect();
    let points = anomaly::score(&series, config.insights.anomaly_z_threshold);

    let Some(last) = points.last() else {
        return Ok(());
    };
    if !last.is_anomaly {
        return Ok(());
    }

    let title = format!("Cost anomaly detected on {end}");
    let recent = store
        .list_alerts(user_id, &AlertFilter::default(), 50, 0)
        .await?;
    if recent
        .iter()
        .any(|a| a.title == title && a.status != AlertStatus::Resolved)
    {
        return Ok(());
    }

    let message = format!(
        "Daily spend {:.2} is {:.1} standard deviations from the {}-day mean",
        last.value, last.z_score, config.insights.anomaly_window_days
    );
    let alert = AlertRow {
        id: next_id(),
        user_id: user_id.to_string(),
        severity: Severity::High,
        status: AlertStatus::New,
        category: AlertCategory::Cost,
        title: title.clone(),
        message: message.clone(),
        source: "anomaly".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    store.insert_alert(&alert).await?;
    events.emit(DomainEvent::AlertRaised {
        user_id: user_id.to_string(),
        severity: Severity::High,
        category: AlertCategory::Cost,
        title,
        message,
        source: "anomaly".to_string(),
    });
    Ok(())
}

/// Background scheduler: every tick, sync the accounts whose last sync
/// is older than the configured interval, bounded by a semaphore and a
/// per-account timeout.
pub struct SyncScheduler {
    store: Arc<Store>,
    events: EventBus,
    config: Arc<ServerConfig>,
}

impl SyncScheduler {
    pub fn new(store: Arc<Store>, events: EventBus, config: Arc<ServerConfig>) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    pub async fn run(&self) {
        tracing::info!(
            tick_secs = self.config.sync.tick_secs,
            interval_secs = self.config.sync.interval_secs,
            max_concurrent = self.config.sync.max_concurrent,
            "Account sync scheduler started"
        );

        let mut tick = interval(Duration::from_secs(self.config.sync.tick_secs));
        loop {
            tick.tick().await;
            if let Err(e) = self.sync_due_accounts().await {
                tracing::error!(error = %e, "Sync cycle failed");
            }
        }
    }

    async fn sync_due_accounts(&self) -> Result<()> {
        let due_before =
            Utc::now() - ChronoDuration::seconds(self.config.sync.interval_secs as i64);
        let due = self.store.list_accounts_due_for_sync(due_before).await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::info!(count = due.len(), "Accounts due for sync");

        let semaphore = Arc::new(Semaphore::new(self.config.sync.max_concurrent));
        let timeout_duration = Duration::from_secs(self.config.sync.timeout_secs);
        let mut tasks = Vec::new();

        for account in due {
            let sem = Arc::clone(&semaphore);
            let store = Arc::clone(&self.store);
            let events = self.events.clone();
            let config = Arc::clone(&self.config);

            tasks.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return;
                };
                match timeout(
                    timeout_duration,
                    run_account_sync(&store, &events, &config, &account),
                )
                .await
                {
                    Ok(Ok(outcome)) => {
                        tracing::info!(
                            account_id = %account.id,
                            cost_rows = outcome.cost_rows,
                            resources = outcome.resources,
                            "Account synced"
                        );
                    }
                    Ok(Err(_)) => {
                        // Already recorded by run_account_sync
                    }
                    Err(_) => {
                        tracing::warn!(
                            account_id = %account.id,
                            timeout = ?timeout_duration,
                            "Account sync timed out"
                        );
                    }
                }
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Sync task panicked");
            }
        }
        Ok(())
    }
}
