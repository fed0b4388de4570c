use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    response::Json,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::server::app::AppState;
use crate::services::query_service::{DatasetSummary, InstanceFilter, QueryService};

#[derive(Debug, Deserialize)]
pub struct ColumnsQuery {
    /// Comma-separated dataset names to scope the added-column inventory.
    pub datasets: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResolveRequest {
    #[serde(default)]
    pub datasets: Vec<String>,
    #[serde(default)]
    pub filters: Vec<InstanceFilter>,
    /// Dataset name → password, for encrypted datasets in the selection.
    #[serde(default)]
    pub passwords: HashMap<String, String>,
}

#[utoipa::path(
    get,
    path = "/api/v1/datasets",
    responses(
        (status = 200, description = "Dataset inventory", body = [DatasetSummary])
    )
)]
pub async fn list_datasets(
    State(state): State<AppState>,
) -> Result<Json<Vec<DatasetSummary>>, ServiceError> {
    let service = QueryService::new(state.db.clone());
    Ok(Json(service.list_datasets().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/instances",
    responses(
        (status = 200, description = "Instance inventory grouped by name")
    )
)]
pub async fn list_instances(
    State(state): State<AppState>,
) -> Result<Json<IndexMap<String, Vec<String>>>, ServiceError> {
    let service = QueryService::new(state.db.clone());
    Ok(Json(service.list_instances().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/columns",
    responses(
        (status = 200, description = "Columns available for axis selection")
    )
)]
pub async fn list_columns(
    State(state): State<AppState>,
    Query(query): Query<ColumnsQuery>,
) -> Result<Json<Value>, ServiceError> {
    let service = QueryService::new(state.db.clone());

    let columns = match query.datasets.as_deref() {
        Some(names) if !names.is_empty() => {
            let names: Vec<String> = names.split(',').map(|n| n.trim().to_string()).collect();
            let resolved = service.resolve_datasets(&names, &[]).await?;
            let ids: Vec<i32> = resolved.iter().map(|d| d.id).collect();
            service.list_columns(Some(&ids)).await?
        }
        _ => service.list_columns(None).await?,
    };

    Ok(Json(json!({ "columns": columns })))
}

/// Resolve dataset names and/or instance filters into concrete dataset
/// identifiers plus their axis column inventory. Passwords are verified
/// here so the client learns about a bad password before asking for a plot.
#[utoipa::path(
    post,
    path = "/api/v1/datasets/resolve",
    request_body = ResolveRequest,
    responses(
        (status = 200, description = "Resolved dataset identifiers and columns"),
        (status = 400, description = "Neither datasets nor filters supplied"),
        (status = 401, description = "Missing or incorrect password"),
        (status = 404, description = "No dataset matches the selection")
    )
)]
pub async fn resolve_datasets(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Value>, ServiceError> {
    let service = QueryService::new(state.db.clone());
    let resolved = service
        .resolve_datasets(&request.datasets, &request.filters)
        .await?;

    // Fail fast on bad passwords; collect every offender so unrelated
    // datasets in the same request still get reported on.
    let mut auth_errors = Vec::new();
    for dataset in &resolved {
        if let Err(err) = QueryService::unlock_key(dataset, &request.passwords) {
            auth_errors.push(err.to_string());
        }
    }
    if !auth_errors.is_empty() {
        return Err(ServiceError::Unauthorized(auth_errors.join("; ")));
    }

    let ids: Vec<i32> = resolved.iter().map(|d| d.id).collect();
    let columns = service.list_columns(Some(&ids)).await?;

    Ok(Json(json!({
        "dataset_ids": ids,
        "datasets": resolved.iter().map(|d| d.name.clone()).collect::<Vec<_>>(),
        "columns": columns,
    })))
}
