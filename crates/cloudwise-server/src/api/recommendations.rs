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
use cloudwise_common::types::{Impact, Provider, RecommendationStatus, StatusHistoryEntry};
use cloudwise_insights::aggregate::{count_by, sum_amounts_by};
use cloudwise_notify::DomainEvent;
use cloudwise_storage::{RecommendationFilter, RecommendationRow, StatusUpdateOutcome};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

#[derive(Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
struct RecommendationQueryParams {
    /// open | in_progress | implemented | dismissed | expired
    #[param(required = false)]
    status: Option<String>,
    /// aws | azure | gcp
    #[param(required = false)]
    provider: Option<String>,
    /// high | medium | low
    #[param(required = false)]
    impact: Option<String>,
    #[param(required = false)]
    recommendation_type: Option<String>,
}

impl RecommendationQueryParams {
    fn to_filter(&self) -> RecommendationFilter {
        RecommendationFilter {
            status_eq: self.status.as_deref().and_then(|s| s.parse().ok()),
            provider_eq: self.provider.as_deref().and_then(|p| p.parse().ok()),
            impact_eq: self.impact.as_deref().and_then(|i| i.parse().ok()),
            recommendation_type_eq: self.recommendation_type.clone(),
        }
    }
}

#[derive(Serialize, ToSchema)]
struct RecommendationResponse {
    id: String,
    provider: Provider,
    account_id: String,
    resource_id: String,
    recommendation_type: String,
    title: String,
    description: Option<String>,
    status: RecommendationStatus,
    potential_savings: Decimal,
    impact: Impact,
    status_history: Vec<StatusHistoryEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RecommendationRow> for RecommendationResponse {
    fn from(row: RecommendationRow) -> Self {
        Self {
            id: row.id,
            provider: row.account.provider(),
            account_id: row.account.account_id().to_owned(),
            resource_id: row.resource_id,
            recommendation_type: row.recommendation_type,
            title: row.title,
            description: row.description,
            status: row.status,
            potential_savings: row.potential_savings,
            impact: row.impact,
            status_history: row.status_history,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// List recommendations across owned accounts, highest savings first.
#[utoipa::path(
    get,
    path = "/v1/recommendations",
    tag = "Recommendations",
    security(("bearer_auth" = [])),
    params(RecommendationQueryParams, PaginationParams),
    responses(
        (status = 200, description = "Recommendation page", body = Vec<RecommendationResponse>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn list_recommendations(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Query(params): Query<RecommendationQueryParams>,
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

    let total = match state.store.count_recommendations(&owned, &filter).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "Failed to count recommendations");
            return storage_error(&trace_id);
        }
    };
    match state
        .store
        .query_recommendations(&owned, &filter, pagination.limit(), pagination.offset())
        .await
    {
        Ok(rows) => {
            let items: Vec<RecommendationResponse> = rows.into_iter().map(Into::into).collect();
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
            tracing::error!(error = %e, "Failed to query recommendations");
            storage_error(&trace_id)
        }
    }
}

#[derive(Serialize, ToSchema)]
struct AmountRow {
    key: String,
    total: Decimal,
}

#[derive(Serialize, ToSchema)]
struct CountRow {
    key: String,
    count: u64,
}

/// Counts, savings, and breakdowns across all recommendations.
#[derive(Serialize, ToSchema)]
struct RecommendationSummaryResponse {
    total: u64,
    open: u64,
    in_progress: u64,
    implemented: u64,
    dismissed: u64,
    expired: u64,
    total_potential_savings: Decimal,
    implemented_savings: Decimal,
    savings_by_type: Vec<AmountRow>,
    savings_by_provider: Vec<AmountRow>,
    count_by_type: Vec<CountRow>,
    count_by_impact: Vec<CountRow>,
}

/// Recommendation rollup.
#[utoipa::path(
    get,
    path = "/v1/recommendations/summary",
    tag = "Recommendations",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Recommendation rollup", body = RecommendationSummaryResponse),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn recommendation_summary(
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
    let summary = match state.store.recommendation_summary(&owned).await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Failed to summarize recommendations");
            return storage_error(&trace_id);
        }
    };
    let rows = match state.store.query_all_recommendations(&owned).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "Failed to query recommendations");
            return storage_error(&trace_id);
        }
    };

    let savings_by_type = sum_amounts_by(
        &rows,
        |r| r.recommendation_type.clone(),
        |r| r.potential_savings,
    );
    let savings_by_provider = sum_amounts_by(
        &rows,
        |r| r.account.provider().to_string(),
        |r| r.potential_savings,
    );
    let count_by_type = count_by(&rows, |r| r.recommendation_type.clone());
    let count_by_impact = count_by(&rows, |r| r.impact.to_string());

    success_response(
        StatusCode::OK,
        &trace_id,
        RecommendationSummaryResponse {
            total: summary.total,
            open: summary.open,
            in_progress: summary.in_progress,
            implemented: summary.implemented,
            dismissed: summary.dismissed,
            expired: summary.expired,
            total_potential_savings: summary.total_potential_savings,
            implemented_savings: summary.implemented_savings,
            savings_by_type: savings_by_type
                .into_iter()
                .map(|g| AmountRow {
                    key: g.key,
                    total: g.total,
                })
                .collect(),
            savings_by_provider: savings_by_provider
                .into_iter()
                .map(|g| AmountRow {
                    key: g.key,
                    total: g.total,
                })
                .collect(),
            count_by_type: count_by_type
                .into_iter()
                .map(|g| CountRow {
                    key: g.key,
                    count: g.count,
                })
                .collect(),
            count_by_impact: count_by_impact
                .into_iter()
                .map(|g| CountRow {
                    key: g.key,
                    count: g.count,
                })
                .collect(),
        },
    )
}

#[derive(Deserialize, ToSchema)]
struct UpdateStatusRequest {
    /// Target status
    status: String,
}

/// Move a recommendation through its lifecycle.
///
/// Transitions follow the state machine (open → in_progress → implemented
/// / dismissed; open → dismissed; expiry from open or in_progress); every
/// applied transition is appended to the status history. A concurrent
/// update on the same row surfaces as 409.
#[utoipa::path(
    put,
    path = "/v1/recommendations/{id}/status",
    tag = "Recommendations",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Recommendation id")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = RecommendationResponse),
        (status = 400, description = "Unknown status value", body = crate::api::ApiError),
        (status = 404, description = "No such recommendation", body = crate::api::ApiError),
        (status = 409, description = "Invalid transition or concurrent update", body = crate::api::ApiError)
    )
)]
async fn update_recommendation_status(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateStatusRequest>,
) -> impl IntoResponse {
    let Ok(new_status) = req.status.parse::<RecommendationStatus>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            &format!("unknown status: {}", req.status),
        );
    };

    let owned = match state.store.resolve_owned_account_ids(&claims.sub).await {
        Ok(owned) => owned,
        Err(e) => {
            tracing::error!(error = %e, "Failed to resolve accounts");
            return storage_error(&trace_id);
        }
    };

    match state
        .store
        .update_recommendation_status(&owned, &id, new_status, &claims.sub)
        .await
    {
        Ok(StatusUpdateOutcome::Updated(row)) => {
            let previous = row
                .status_history
                .last()
                .map(|e| e.previous_status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            state.events.emit(DomainEvent::RecommendationStatusChanged {
                user_id: claims.sub,
                recommendation_id: row.id.clone(),
                title: row.title.clone(),
                previous_status: previous,
                new_status: new_status.to_string(),
                potential_savings: row.potential_savings,
            });
            success_response(StatusCode::OK, &trace_id, RecommendationResponse::from(row))
        }
        Ok(StatusUpdateOutcome::NotFound) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Recommendation '{id}' not found"),
        ),
        Ok(StatusUpdateOutcome::InvalidTransition { from }) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "invalid_transition",
            &format!("cannot move from {from} to {new_status}"),
        ),
        Ok(StatusUpdateOutcome::Conflict) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            "recommendation was updated concurrently, re-read and retry",
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to update recommendation status");
            storage_error(&trace_id)
        }
    }
}

pub fn recommendation_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_recommendations))
        .routes(routes!(recommendation_summary))
        .routes(routes!(update_recommendation_status))
}
