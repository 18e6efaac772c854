use crate::api::{storage_error, success_response};
use crate::auth::Claims;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{Datelike, Utc};
use cloudwise_insights::forecast::{days_in_month, first_of_month, forecast, previous_month_bounds};
use cloudwise_storage::CostFilter;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Dashboard overview payload.
#[derive(Serialize, ToSchema)]
struct DashboardOverview {
    /// Connected account counts
    accounts: AccountSummary,
    /// Spend so far this month
    month_to_date_cost: Decimal,
    /// Projected month-end spend at the current run rate
    projected_cost: Decimal,
    /// Change vs. last month, percent (2 decimals)
    change_percentage: Decimal,
    /// Open recommendations
    open_recommendations: u64,
    /// Savings available if every open recommendation were implemented
    open_potential_savings: Decimal,
    /// Alert counts by severity
    alerts_by_severity: HashMap<String, u64>,
}

#[derive(Serialize, ToSchema)]
struct AccountSummary {
    #[schema(example = 3)]
    total_accounts: u64,
    #[schema(example = 2)]
    connected_accounts: u64,
    #[schema(example = 1)]
    error_accounts: u64,
}

/// Dashboard overview: accounts, spend, forecast, recommendations,
/// alerts — one call for the landing page.
#[utoipa::path(
    get,
    path = "/v1/dashboard/overview",
    tag = "Dashboard",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Dashboard overview", body = DashboardOverview),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn dashboard_overview(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let account_summary = match state.store.cloud_account_summary(&claims.sub).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize accounts for dashboard");
            return storage_error(&trace_id);
        }
    };

    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts for dashboard");
            return storage_error(&trace_id);
        }
    };

    let today = Utc::now().date_naive();
    let month_start = first_of_month(today);
    let (prev_start, prev_end) = previous_month_bounds(today);

    let sum_window = |rows: Vec<cloudwise_storage::CostDatumRow>| {
        rows.iter().map(|r| r.cost).sum::<Decimal>()
    };
    let month_to_date = match state
        .store
        .query_cost_data(
            &owned,
            &CostFilter {
                start_date: Some(month_start),
                end_date: Some(today),
                ..Default::default()
            },
        )
        .await
    {
        Ok(rows) => sum_window(rows),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query month-to-date cost for dashboard");
            return storage_error(&trace_id);
        }
    };
    let previous_month = match state
        .store
        .query_cost_data(
            &owned,
            &CostFilter {
                start_date: Some(prev_start),
                end_date: Some(prev_end),
                ..Default::default()
            },
        )
        .await
    {
        Ok(rows) => sum_window(rows),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query previous month cost for dashboard");
            return storage_error(&trace_id);
        }
    };
    let projection = forecast(
        month_to_date,
        today.day(),
        days_in_month(today),
        previous_month,
    );

    let recommendations = match state.store.recommendation_summary(&owned).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize recommendations for dashboard");
            return storage_error(&trace_id);
        }
    };
    // Savings still on the table: open and in-progress items
    let open_savings = match state.store.query_all_recommendations(&owned).await {
        Ok(rows) => rows
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.potential_savings)
            .sum::<Decimal>(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query recommendations for dashboard");
            return storage_error(&trace_id);
        }
    };

    let alerts = match state.store.alert_summary(&claims.sub).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize alerts for dashboard");
            return storage_error(&trace_id);
        }
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        DashboardOverview {
            accounts: AccountSummary {
                total_accounts: account_summary.total_accounts,
                connected_accounts: account_summary.connected_accounts,
                error_accounts: account_summary.error_accounts,
            },
            month_to_date_cost: month_to_date,
            projected_cost: projection.projected_cost,
            change_percentage: projection.change_percentage,
            open_recommendations: recommendations.open + recommendations.in_progress,
            open_potential_savings: open_savings,
            alerts_by_severity: alerts.by_severity,
        },
    )
}

pub fn dashboard_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(routes!(dashboard_overview))
}
