use crate::api::pagination::PaginationParams;
use crate::api::{error_response, storage_error, success_paginated_response, success_response};
use crate::auth::Claims;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use cloudwise_common::types::{AlertCategory, AlertStatus, Severity};
use cloudwise_storage::{AlertFilter, AlertRow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct AlertQueryParams {
    /// info | low | medium | high | critical
    #[param(required = false)]
    severity: Option<String>,
    /// new | read | acknowledged | resolved
    #[param(required = false)]
    status: Option<String>,
    /// cost | security | performance | availability | other
    #[param(required = false)]
    category: Option<String>,
}

impl AlertQueryParams {
    fn to_filter(&self) -> AlertFilter {
        AlertFilter {
            severity_eq: self.severity.as_deref().and_then(|s| s.parse().ok()),
            status_eq: self.status.as_deref().and_then(|s| s.parse().ok()),
            category_eq: self.category.as_deref().and_then(|c| c.parse().ok()),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct AlertResponse {
    id: String,
    severity: Severity,
    status: AlertStatus,
    category: AlertCategory,
    title: String,
    message: String,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AlertRow> for AlertResponse {
    fn from(row: AlertRow) -> Self {
        Self {
            id: row.id,
            severity: row.severity,
            status: row.status,
            category: row.category,
            title: row.title,
            message: row.message,
            source: row.source,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// List alerts, newest first.
#[utoipa::path(
    get,
    path = "/v1/alerts",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(AlertQueryParams, PaginationParams),
    responses(
        (status = 200, description = "Alert page", body = Vec<AlertResponse>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<AlertQueryParams>,
    Query(pagination): Query<PaginationParams>,
) -> impl IntoResponse {
    let filter = params.to_filter();
    let total = match state.store.count_alerts(&claims.sub, &filter).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count alerts");
            return storage_error(&trace_id);
        }
    };
    match state
        .store
        .list_alerts(&claims.sub, &filter, pagination.limit(), pagination.offset())
        .await
    {
        Ok(rows) => {
            let items: Vec<AlertResponse> = rows.into_iter().map(Into::into).collect();
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
            tracing::error!(error = %e, "Failed to list alerts");
            storage_error(&trace_id)
        }
    }
}

#[derive(Deserialize, ToSchema)]
struct UpdateAlertStatusRequest {
    /// Target status; alerts only move forward
    /// (new → read → acknowledged → resolved)
    status: String,
}

/// Advance an alert's status.
#[utoipa::path(
    put,
    path = "/v1/alerts/{id}/status",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Alert id")),
    request_body = UpdateAlertStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = AlertResponse),
        (status = 400, description = "Unknown status value", body = crate::api::ApiError),
        (status = 404, description = "No such alert", body = crate::api::ApiError),
        (status = 409, description = "Backward transition or concurrent update", body = crate::api::ApiError)
    )
)]
async fn update_alert_status(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateAlertStatusRequest>,
) -> impl IntoResponse {
    let Ok(next) = req.status.parse::<AlertStatus>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            &format!("unknown status: {}", req.status),
        );
    };

    let current = match state.store.get_alert(&claims.sub, &id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("Alert '{id}' not found"),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load alert");
            return storage_error(&trace_id);
        }
    };

    if !current.status.can_transition_to(next) {
        return error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "invalid_transition",
            &format!("cannot move from {} to {next}", current.status),
        );
    }

    match state
        .store
        .update_alert_status(&claims.sub, &id, current.status, next)
        .await
    {
        Ok(Some(row)) => success_response(StatusCode::OK, &trace_id, AlertResponse::from(row)),
        Ok(None) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            "alert was updated concurrently, re-read and retry",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to update alert status");
            storage_error(&trace_id)
        }
    }
}

/// Alert counts by severity, status, and category.
#[derive(Serialize, ToSchema)]
struct AlertSummaryResponse {
    total: u64,
    by_severity: HashMap<String, u64>,
    by_status: HashMap<String, u64>,
    by_category: HashMap<String, u64>,
}

/// Alert rollup.
#[utoipa::path(
    get,
    path = "/v1/alerts/summary",
    tag = "Alerts",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Alert rollup", body = AlertSummaryResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn alert_summary(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.alert_summary(&claims.sub).await {
        Ok(summary) => success_response(
            StatusCode::OK,
            &trace_id,
            AlertSummaryResponse {
                total: summary.total,
                by_severity: summary.by_severity,
                by_status: summary.by_status,
                by_category: summary.by_category,
            },
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize alerts");
            storage_error(&trace_id)
        }
    }
}

pub fn alert_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_alerts))
        .routes(routes!(alert_summary))
        .routes(routes!(update_alert_status))
}
