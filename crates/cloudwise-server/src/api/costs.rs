use crate::api::{error_response, storage_error, success_response};
use crate::auth::Claims;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{Duration, NaiveDate, Utc};
use cloudwise_common::types::{OwnedAccountIds, Provider};
use cloudwise_insights::aggregate::{
    pivot_daily_by_provider, sum_by, total_cost, CostGroupBy, GroupKey,
};
use cloudwise_insights::anomaly;
use cloudwise_insights::forecast::{
    days_in_month, first_of_month, forecast, previous_month_bounds,
};
use cloudwise_insights::CostRecord;
use cloudwise_storage::{CostDatumRow, CostFilter};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Default query window when the caller gives no dates: the 30 days
/// ending today, inclusive.
fn default_window() -> (NaiveDate, NaiveDate) {
    let end = Utc::now().date_naive();
    (end - Duration::days(29), end)
}

fn to_cost_records(rows: Vec<CostDatumRow>) -> Vec<CostRecord> {
    rows.into_iter()
        .map(|r| CostRecord {
            account: r.account,
            date: r.date,
            service: r.service,
            cost: r.cost,
        })
        .collect()
}

async fn scoped_cost_records(
    state: &AppState,
    user_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<(OwnedAccountIds, Vec<CostRecord>)> {
    let owned = state.store.resolve_owned_account_ids(user_id).await?;
    let rows = state
        .store
        .query_cost_data(
            &owned,
            &CostFilter {
                start_date: Some(start),
                end_date: Some(end),
                ..Default::default()
            },
        )
        .await?;
    Ok((owned, to_cost_records(rows)))
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct CostQueryParams {
    /// Window start (inclusive, ISO date; default: 29 days before end)
    #[param(required = false)]
    start_date: Option<NaiveDate>,
    /// Window end (inclusive, ISO date; default: today)
    #[param(required = false)]
    end_date: Option<NaiveDate>,
    /// provider | service | date (default: date)
    #[param(required = false)]
    group_by: Option<String>,
}

/// One day of the provider pivot.
#[derive(Serialize, ToSchema)]
struct DailyCostRow {
    date: NaiveDate,
    aws: Decimal,
    azure: Decimal,
    gcp: Decimal,
    total: Decimal,
}

/// One group of a provider/service breakdown.
#[derive(Serialize, ToSchema)]
struct CostGroupRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider: Option<Provider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    service: Option<String>,
    cost: Decimal,
}

#[derive(Serialize, ToSchema)]
#[serde(untagged)]
enum CostData {
    Daily(Vec<DailyCostRow>),
    Groups(Vec<CostGroupRow>),
}

/// Total cost over a window, with an optional breakdown.
#[derive(Serialize, ToSchema)]
struct CostBreakdownResponse {
    total_cost: Decimal,
    start_date: NaiveDate,
    end_date: NaiveDate,
    group_by: String,
    data: CostData,
}

/// Total cost over a date window.
///
/// `group_by=date` (the default) returns one row per calendar day with a
/// column per provider, dense over the whole window; `provider` and
/// `service` return descending breakdowns.
#[utoipa::path(
    get,
    path = "/v1/costs",
    tag = "Costs",
    security(("bearer_auth" = [])),
    params(CostQueryParams),
    responses(
        (status = 200, description = "Cost totals and breakdown", body = CostBreakdownResponse),
        (status = 400, description = "Bad group_by or date range", body = crate::api::ApiError),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn get_costs(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<CostQueryParams>,
) -> impl IntoResponse {
    let (default_start, default_end) = default_window();
    let start = params.start_date.unwrap_or(default_start);
    let end = params.end_date.unwrap_or(default_end);
    if start > end {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "start_date must not be after end_date",
        );
    }
    let group_by = params.group_by.as_deref().unwrap_or("date");

    let (_owned, records) = match scoped_cost_records(&state, &claims.sub, start, end).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query cost data");
            return storage_error(&trace_id);
        }
    };

    let data = match group_by {
        "date" => CostData::Daily(
            pivot_daily_by_provider(&records, start, end)
                .into_iter()
                .map(|d| DailyCostRow {
                    date: d.date,
                    aws: d.aws,
                    azure: d.azure,
                    gcp: d.gcp,
                    total: d.total,
                })
                .collect(),
        ),
        "provider" => CostData::Groups(
            sum_by(&records, CostGroupBy::Provider)
                .into_iter()
                .map(|g| CostGroupRow {
                    provider: match g.key {
                        GroupKey::Provider(p) => Some(p),
                        _ => None,
                    },
                    service: None,
                    cost: g.total,
                })
                .collect(),
        ),
        "service" => CostData::Groups(
            sum_by(&records, CostGroupBy::Service)
                .into_iter()
                .map(|g| CostGroupRow {
                    provider: None,
                    service: match g.key {
                        GroupKey::Service(s) => Some(s),
                        _ => None,
                    },
                    cost: g.total,
                })
                .collect(),
        ),
        other => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("unsupported group_by: {other}"),
            );
        }
    };

    success_response(
        StatusCode::OK,
        &trace_id,
        CostBreakdownResponse {
            total_cost: total_cost(&records),
            start_date: start,
            end_date: end,
            group_by: group_by.to_string(),
            data,
        },
    )
}

/// Month-end projection from the current run rate.
#[derive(Serialize, ToSchema)]
struct ForecastResponse {
    projected_cost: Decimal,
    daily_average: Decimal,
    change_amount: Decimal,
    /// Percent vs. the previous month, 2 decimals; 0 when the previous
    /// month had no cost
    change_percentage: Decimal,
    month_to_date_cost: Decimal,
    previous_month_cost: Decimal,
    days_in_month: u32,
    days_passed: u32,
    days_remaining: u32,
}

/// Forecast month-end spend from month-to-date actuals.
#[utoipa::path(
    get,
    path = "/v1/costs/forecast",
    tag = "Costs",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Run-rate forecast", body = ForecastResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn get_forecast(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let today = Utc::now().date_naive();
    let month_start = first_of_month(today);
    let (prev_start, prev_end) = previous_month_bounds(today);

    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts");
            return storage_error(&trace_id);
        }
    };

    let query = |start: NaiveDate, end: NaiveDate| CostFilter {
        start_date: Some(start),
        end_date: Some(end),
        ..Default::default()
    };
    let month_to_date = match state.store.query_cost_data(&owned, &query(month_start, today)).await
    {
        Ok(rows) => rows.iter().map(|r| r.cost).sum::<Decimal>(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query month-to-date cost");
            return storage_error(&trace_id);
        }
    };
    let previous_month = match state
        .store
        .query_cost_data(&owned, &query(prev_start, prev_end))
        .await
    {
        Ok(rows) => rows.iter().map(|r| r.cost).sum::<Decimal>(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to query previous month cost");
            return storage_error(&trace_id);
        }
    };

    use chrono::Datelike;
    let day_of_month = today.day();
    let month_days = days_in_month(today);
    let result = forecast(month_to_date, day_of_month, month_days, previous_month);

    success_response(
        StatusCode::OK,
        &trace_id,
        ForecastResponse {
            projected_cost: result.projected_cost,
            daily_average: result.daily_average,
            change_amount: result.change_amount,
            change_percentage: result.change_percentage,
            month_to_date_cost: month_to_date,
            previous_month_cost: previous_month,
            days_in_month: month_days,
            days_passed: day_of_month,
            days_remaining: month_days.saturating_sub(day_of_month),
        },
    )
}

/// Per-account cost over the window.
#[derive(Serialize, ToSchema)]
struct AccountCostResponse {
    /// Internal account id
    id: String,
    name: String,
    provider: Provider,
    external_id: String,
    cost: Decimal,
}

/// Cost per owned account, descending. Accounts with no spend in the
/// window still appear with zero.
#[utoipa::path(
    get,
    path = "/v1/costs/by-account",
    tag = "Costs",
    security(("bearer_auth" = [])),
    params(CostQueryParams),
    responses(
        (status = 200, description = "Cost per account", body = Vec<AccountCostResponse>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn get_costs_by_account(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<CostQueryParams>,
) -> impl IntoResponse {
    let (default_start, default_end) = default_window();
    let start = params.start_date.unwrap_or(default_start);
    let end = params.end_date.unwrap_or(default_end);

    let accounts = match state.store.list_cloud_accounts(&claims.sub).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list accounts");
            return storage_error(&trace_id);
        }
    };
    let (_owned, records) = match scoped_cost_records(&state, &claims.sub, start, end).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query cost data");
            return storage_error(&trace_id);
        }
    };

    let totals = sum_by(&records, CostGroupBy::Account);
    let cost_for = |provider: Provider, id: &str| {
        totals
            .iter()
            .find(|g| match &g.key {
                GroupKey::Account(p, account_id) => *p == provider && account_id == id,
                _ => false,
            })
            .map(|g| g.total)
            .unwrap_or(Decimal::ZERO)
    };

    let mut items: Vec<AccountCostResponse> = accounts
        .into_iter()
        .map(|a| AccountCostResponse {
            cost: cost_for(a.provider, &a.id),
            id: a.id,
            name: a.display_name,
            provider: a.provider,
            external_id: a.external_id,
        })
        .collect();
    items.sort_by(|a, b| b.cost.cmp(&a.cost).then_with(|| a.name.cmp(&b.name)));

    success_response(StatusCode::OK, &trace_id, items)
}

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct AnomalyParams {
    /// Days of daily totals to score (default from server config)
    #[param(required = false)]
    days: Option<u32>,
    /// Z-score threshold override (default from server config)
    #[param(required = false)]
    threshold: Option<f64>,
}

/// One scored day.
#[derive(Serialize, ToSchema)]
struct AnomalyPointResponse {
    date: NaiveDate,
    value: f64,
    z_score: f64,
    is_anomaly: bool,
}

#[derive(Serialize, ToSchema)]
struct AnomalyResponse {
    threshold: f64,
    window_days: u32,
    points: Vec<AnomalyPointResponse>,
}

/// Score recent daily spend for outliers.
#[utoipa::path(
    get,
    path = "/v1/costs/anomalies",
    tag = "Costs",
    security(("bearer_auth" = [])),
    params(AnomalyParams),
    responses(
        (status = 200, description = "Scored daily totals", body = AnomalyResponse),
        (status = 400, description = "Bad parameters", body = crate::api::ApiError),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn get_cost_anomalies(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<AnomalyParams>,
) -> impl IntoResponse {
    let window_days = params
        .days
        .unwrap_or(state.config.insights.anomaly_window_days);
    if window_days == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "days must be positive",
        );
    }
    let threshold = params
        .threshold
        .unwrap_or(state.config.insights.anomaly_z_threshold);
    if !threshold.is_finite() || threshold <= 0.0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "threshold must be a positive number",
        );
    }

    let end = Utc::now().date_naive();
    let start = end - Duration::days(i64::from(window_days) - 1);
    let (_owned, records) = match scoped_cost_records(&state, &claims.sub, start, end).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query cost data");
            return storage_error(&trace_id);
        }
    };

    let daily = pivot_daily_by_provider(&records, start, end);
    let series: Vec<f64> = daily
        .iter()
        .map(|d| d.total.to_f64().unwrap_or(0.0))
        .collect();
    let points: Vec<AnomalyPointResponse> = anomaly::score(&series, threshold)
        .into_iter()
        .zip(daily.iter())
        .map(|(p, day)| AnomalyPointResponse {
            date: day.date,
            value: p.value,
            z_score: p.z_score,
            is_anomaly: p.is_anomaly,
        })
        .collect();

    success_response(
        StatusCode::OK,
        &trace_id,
        AnomalyResponse {
            threshold,
            window_days,
            points,
        },
    )
}

pub fn cost_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(get_costs))
        .routes(routes!(get_forecast))
        .routes(routes!(get_costs_by_account))
        .routes(routes!(get_cost_anomalies))
}
