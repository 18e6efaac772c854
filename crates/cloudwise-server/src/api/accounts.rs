use crate::api::{error_response, storage_error, success_empty_response, success_response};
use crate::auth::Claims;
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use cloudwise_common::id::next_id;
use cloudwise_common::types::{AccountStatus, Provider};
use cloudwise_notify::DomainEvent;
use cloudwise_providers::{build_adapter, error::ProviderError};
use cloudwise_storage::CloudAccountRow;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Cloud account, as exposed over the API. Credentials never appear here.
#[derive(Serialize, ToSchema)]
struct AccountResponse {
    /// Internal account id
    id: String,
    provider: Provider,
    /// Provider-side identifier (AWS account ID / Azure subscription ID /
    /// GCP project ID)
    external_id: String,
    display_name: String,
    status: AccountStatus,
    error_message: Option<String>,
    last_sync_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<CloudAccountRow> for AccountResponse {
    fn from(row: CloudAccountRow) -> Self {
        Self {
            id: row.id,
            provider: row.provider,
            external_id: row.external_id,
            display_name: row.display_name,
            status: row.status,
            error_message: row.error_message,
            last_sync_at: row.last_sync_at,
            created_at: row.created_at,
        }
    }
}

/// Connect request. `credentials` is the provider-specific payload
/// (access keys / app registration / service account); it is validated
/// against the provider, encrypted, and stored.
#[derive(Deserialize, ToSchema)]
struct ConnectAccountRequest {
    /// aws | azure | gcp
    provider: String,
    external_id: String,
    display_name: Option<String>,
    credentials: serde_json::Value,
}

/// List connected cloud accounts across all providers.
#[utoipa::path(
    get,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Account list", body = Vec<AccountResponse>),
        (status = 401, description = "Unauthenticated", body = crate::api::ApiError)
    )
)]
async fn list_accounts(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    match state.store.list_cloud_accounts(&claims.sub).await {
        Ok(rows) => {
            let items: Vec<AccountResponse> = rows.into_iter().map(Into::into).collect();
            success_response(StatusCode::OK, &trace_id, items)
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to list accounts");
            storage_error(&trace_id)
        }
    }
}

/// Connect a new cloud account.
///
/// Credentials are validated against the provider before the account is
/// stored; a validation failure still creates the account in `error`
/// status so the user can fix and retry from the dashboard.
#[utoipa::path(
    post,
    path = "/v1/accounts",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    request_body = ConnectAccountRequest,
    responses(
        (status = 201, description = "Account created", body = AccountResponse),
        (status = 400, description = "Bad provider or credential payload", body = crate::api::ApiError),
        (status = 409, description = "Account already connected", body = crate::api::ApiError)
    )
)]
async fn connect_account(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Json(req): Json<ConnectAccountRequest>,
) -> impl IntoResponse {
    let Ok(provider) = req.provider.parse::<Provider>() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "invalid_provider",
            &format!("unknown provider: {}", req.provider),
        );
    };
    if req.external_id.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            &format!("{} is required", provider.external_id_label()),
        );
    }

    match state
        .store
        .find_cloud_account_by_external_id(&claims.sub, provider, &req.external_id)
        .await
    {
        Ok(Some(_)) => {
            return error_response(
                StatusCode::CONFLICT,
                &trace_id,
                "duplicate_account",
                "account is already connected",
            );
        }
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "Failed to check for duplicate account");
            return storage_error(&trace_id);
        }
    }

    let credentials_json = req.credentials.to_string();
    let adapter = match build_adapter(provider, &credentials_json) {
        Ok(adapter) => adapter,
        Err(ProviderError::ConfigError(msg)) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("invalid credential payload: {msg}"),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to build provider adapter");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "provider_error",
                "failed to initialize provider client",
            );
        }
    };

    let (status, error_message) = match adapter.validate_credentials().await {
        Ok(()) => (AccountStatus::Connected, None),
        Err(e) => {
            tracing::warn!(provider = %provider, error = %e, "Credential validation failed");
            (AccountStatus::Error, Some(e.to_string()))
        }
    };

    let encrypted = match state.store.encryptor().encrypt(&credentials_json) {
        Ok(blob) => blob,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encrypt credentials");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &trace_id,
                "internal_error",
                "internal error",
            );
        }
    };

    let display_name = req
        .display_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{provider} {}", req.external_id));
    let row = CloudAccountRow {
        id: next_id(),
        user_id: claims.sub.clone(),
        provider,
        external_id: req.external_id,
        display_name: display_name.clone(),
        encrypted_credentials: encrypted,
        status,
        error_message,
        last_sync_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    match state.store.insert_cloud_account(&row).await {
        Ok(row) => {
            if row.status == AccountStatus::Connected {
                state.events.emit(DomainEvent::AccountConnected {
                    user_id: claims.sub,
                    provider,
                    account_id: row.id.clone(),
                    display_name,
                });
            }
            success_response(StatusCode::CREATED, &trace_id, AccountResponse::from(row))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to insert account");
            storage_error(&trace_id)
        }
    }
}

/// Disconnect an account (soft delete).
///
/// The row is retired, never destroyed: historical cost facts keep
/// their account reference. Absent and not-owned are both 404.
#[utoipa::path(
    delete,
    path = "/v1/accounts/{id}",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Account id")),
    responses(
        (status = 200, description = "Account disconnected"),
        (status = 404, description = "No such account", body = crate::api::ApiError)
    )
)]
async fn delete_account(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.soft_delete_cloud_account(&claims.sub, &id).await {
        Ok(true) => success_empty_response(StatusCode::OK, &trace_id, "account disconnected"),
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Account '{id}' not found"),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to delete account");
            storage_error(&trace_id)
        }
    }
}

/// Sync outcome for a manual sync.
#[derive(Serialize, ToSchema)]
struct SyncResponse {
    cost_rows: usize,
    resources: usize,
}

/// Trigger an immediate sync of one account.
#[utoipa::path(
    post,
    path = "/v1/accounts/{id}/sync",
    tag = "Accounts",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Account id")),
    responses(
        (status = 200, description = "Sync completed", body = SyncResponse),
        (status = 404, description = "No such account", body = crate::api::ApiError),
        (status = 502, description = "Provider API failure", body = crate::api::ApiError)
    )
)]
async fn sync_account(
    Extension(trace_id): Extension<TraceId>,
    Extension(claims): Extension<Claims>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let account = match state.store.get_cloud_account(&claims.sub, &id).await {
        Ok(Some(row)) => row,
        Ok(None) => {
            return error_response(
                StatusCode::NOT_FOUND,
                &trace_id,
                "not_found",
                &format!("Account '{id}' not found"),
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to load account");
            return storage_error(&trace_id);
        }
    };

    let timeout = std::time::Duration::from_secs(state.config.sync.timeout_secs);
    match tokio::time::timeout(
        timeout,
        crate::sync::run_account_sync(&state.store, &state.events, &state.config, &account),
    )
    .await
    {
        Ok(Ok(outcome)) => success_response(
            StatusCode::OK,
            &trace_id,
            SyncResponse {
                cost_rows: outcome.cost_rows,
                resources: outcome.resources,
            },
        ),
        Ok(Err(e)) => error_response(
            StatusCode::BAD_GATEWAY,
            &trace_id,
            "provider_error",
            &e.to_string(),
        ),
        Err(_) => error_response(
            StatusCode::BAD_GATEWAY,
            &trace_id,
            "provider_error",
            "sync timed out",
        ),
    }
}

pub fn account_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_accounts, connect_account))
        .routes(routes!(delete_account))
        .routes(routes!(sync_account))
}
