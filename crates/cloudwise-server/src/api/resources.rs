use crate::api::pagination::PaginationParams;
use crate::api::{storage_error, success_paginated_response, success_response};
use crate::auth::Claims;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use cloudwise_common::types::Provider;
use cloudwise_insights::aggregate::count_by;
use cloudwise_insights::idle::find_idle;
use cloudwise_insights::ResourceUsage;
use cloudwise_storage::{ResourceFilter, ResourceRow};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct ResourceQueryParams {
    /// aws | azure | gcp
    #[param(required = false)]
    provider: Option<String>,
    #[param(required = false)]
    resource_type: Option<String>,
    #[param(required = false)]
    region: Option<String>,
    #[param(required = false)]
    status: Option<String>,
    /// Tag match, `key:value`
    #[param(required = false)]
    tag: Option<String>,
}

impl ResourceQueryParams {
    fn to_filter(&self) -> ResourceFilter {
        ResourceFilter {
            provider_eq: self.provider.as_deref().and_then(|p| p.parse().ok()),
            resource_type_eq: self.resource_type.clone(),
            region_eq: self.region.clone(),
            status_eq: self.status.clone(),
            tag_eq: self.tag.as_deref().and_then(|t| {
                t.split_once(':')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            }),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct ResourceResponse {
    id: String,
    provider: Provider,
    account_id: String,
    resource_id: String,
    name: Option<String>,
    resource_type: String,
    region: String,
    status: String,
    utilization: Option<f64>,
    cost_per_month: Decimal,
    tags: HashMap<String, String>,
    last_synced_at: DateTime<Utc>,
}

impl From<ResourceRow> for ResourceResponse {
    fn from(row: ResourceRow) -> Self {
        Self {
            id: row.id,
            provider: row.account.provider(),
            account_id: row.account.account_id().to_owned(),
            resource_id: row.resource_id,
            name: row.name,
            resource_type: row.resource_type,
            region: row.region,
            status: row.status,
            utilization: row.utilization,
            cost_per_month: row.cost_per_month,
            tags: row.tags,
            last_synced_at: row.last_synced_at,
        }
    }
}

/// List resources across all owned accounts, costliest first.
#[utoipa::path(
    get,
    path = "/v1/resources",
    tag = "Resources",
    security(("bearer_auth" = [])),
    params(ResourceQueryParams, PaginationParams),
    responses(
        (status = 200, description = "Resource page", body = Vec<ResourceResponse>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn list_resources(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<ResourceQueryParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = params.to_filter();
    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts");
            return storage_error(&trace_id);
        }
    };

    let total = match state.store.count_resources(&owned, &filter).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count resources");
            return storage_error(&trace_id);
        }
    };
    match state
        .store
        .query_resources(&owned, &filter, pagination.limit(), pagination.offset())
        .await
    {
        Ok(rows) => {
            let items: Vec<ResourceResponse> = rows.into_iter().map(Into::into).collect();
            success_paginated_response(
                StatusCode::OK,
                &trace_id,
                items,
                total,
                pagination.limit(),
                pagination.offset(),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to query resources");
            storage_error(&trace_id)
        }
    }
}

#[derive(Serialize, ToSchema)]
struct CountRow {
    key: String,
    count: u64,
}

/// Resource inventory rollup.
#[derive(Serialize, ToSchema)]
struct ResourceSummaryResponse {
    total_resources: u64,
    running_resources: u64,
    stopped_resources: u64,
    other_resources: u64,
    total_monthly_cost: Decimal,
    by_type: Vec<CountRow>,
    by_provider: Vec<CountRow>,
    by_region: Vec<CountRow>,
}

/// Summary counts across the whole inventory.
#[utoipa::path(
    get,
    path = "/v1/resources/summary",
    tag = "Resources",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Inventory rollup", body = ResourceSummaryResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn resource_summary(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts");
            return storage_error(&trace_id);
        }
    };
    let rows = match state.store.query_all_resources(&owned).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query resources");
            return storage_error(&trace_id);
        }
    };
    let summary = match state.store.resource_summary(&owned).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize resources");
            return storage_error(&trace_id);
        }
    };

    let to_rows = |groups: Vec<cloudwise_insights::aggregate::CountGroup>| {
        groups
            .into_iter()
            .map(|g| CountRow {
                key: g.key,
                count: g.count,
            })
            .collect::<Vec<_>>()
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        ResourceSummaryResponse {
            total_resources: summary.total_resources,
            running_resources: summary.running_resources,
            stopped_resources: summary.stopped_resources,
            other_resources: summary.other_resources,
            total_monthly_cost: summary.total_monthly_cost,
            by_type: to_rows(count_by(&rows, |r| r.resource_type.clone())),
            by_provider: to_rows(count_by(&rows, |r| r.account.provider().to_string())),
            by_region: to_rows(count_by(&rows, |r| r.region.clone())),
        },
    )
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct IdleParams {
    /// Utilization percent below which a running resource counts as
    /// idle (default from server config)
    #[param(required = false)]
    threshold: Option<f64>,
}

#[derive(Serialize, ToSchema)]
struct IdleResourceResponse {
    provider: Provider,
    account_id: String,
    resource_id: String,
    name: Option<String>,
    resource_type: String,
    region: String,
    utilization: Option<f64>,
    cost_per_month: Decimal,
}

#[derive(Serialize, ToSchema)]
struct IdleResponse {
    threshold: f64,
    /// Monthly spend tied up in idle resources
    total_monthly_cost: Decimal,
    items: Vec<IdleResourceResponse>,
}

/// Running resources with utilization below the idle threshold,
/// costliest first.
#[utoipa::path(
    get,
    path = "/v1/resources/idle",
    tag = "Resources",
    security(("bearer_auth" = [])),
    params(IdleParams),
    responses(
        (status = 200, description = "Idle resources", body = IdleResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn idle_resources(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<IdleParams>,
) -> impl IntoResponse {
    let threshold = params
        .threshold
        .unwrap_or(state.config.insights.idle_utilization_threshold);

    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts");
            return storage_error(&trace_id);
        }
    };
    let rows = match state.store.query_all_resources(&owned).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query resources");
            return storage_error(&trace_id);
        }
    };

    let usages: Vec<ResourceUsage> = rows
        .into_iter()
        .map(|r| ResourceUsage {
            account: r.account,
            resource_id: r.resource_id,
            name: r.name,
            resource_type: r.resource_type,
            region: r.region,
            status: r.status,
            utilization: r.utilization,
            cost_per_month: r.cost_per_month,
        })
        .collect();
    let idle = find_idle(&usages, threshold);
    let total_monthly_cost: Decimal = idle.iter().map(|r| r.cost_per_month).sum();
    let items: Vec<IdleResourceResponse> = idle
        .into_iter()
        .map(|r| IdleResourceResponse {
            provider: r.account.provider(),
            account_id: r.account.account_id().to_owned(),
            resource_id: r.resource_id,
            name: r.name,
            resource_type: r.resource_type,
            region: r.region,
            utilization: r.utilization,
            cost_per_month: r.cost_per_month,
        })
        .collect();

    success_response(
        StatusCode::OK,
        &trace_id,
        IdleResponse {
            threshold,
            total_monthly_cost,
            items,
        },
    )
}

pub fn resource_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_resources))
        .routes(routes!(resource_summary))
        .routes(routes!(idle_resources))
}
