use std::collections::HashMap;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::server::app::AppState;
use crate::services::plot_service::PlotService;
use crate::services::query_service::{InstanceFilter, QueryService};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PlotRequest {
    /// Dataset names; combined with `dataset_ids` when both are given.
    #[serde(default)]
    pub datasets: Vec<String>,
    /// Resolved dataset identifiers, as returned by the resolve endpoint.
    #[serde(default)]
    pub dataset_ids: Vec<i32>,
    #[serde(default)]
    pub filters: Vec<InstanceFilter>,
    pub x_axis: Option<String>,
    #[serde(default)]
    pub y_axis: Vec<String>,
    /// Named preset overriding the axis selection.
    pub preset: Option<String>,
    #[serde(default)]
    pub passwords: HashMap<String, String>,
}

/// Assemble a chart description from the selected datasets. Readers do not
/// take the writer lock, but an in-flight upload reports as busy rather
/// than serving a half-committed batch.
#[utoipa::path(
    post,
    path = "/api/v1/plot",
    request_body = PlotRequest,
    responses(
        (status = 200, description = "Serialized chart description"),
        (status = 400, description = "Missing axis selection"),
        (status = 401, description = "Missing or incorrect password"),
        (status = 404, description = "No plottable data"),
        (status = 423, description = "An upload is writing to the store")
    )
)]
pub async fn build_plot(
    State(state): State<AppState>,
    Json(request): Json<PlotRequest>,
) -> Result<Json<Value>, ServiceError> {
    if state.lock.is_locked() {
        return Err(ServiceError::Locked);
    }

    let (x_axis, y_axes) = match request.preset.as_deref() {
        Some(preset) => PlotService::preset(preset).ok_or_else(|| {
            ServiceError::Validation(format!("unknown preset '{preset}'"))
        })?,
        None => {
            let x_axis = request
                .x_axis
                .clone()
                .ok_or_else(|| ServiceError::Validation("x_axis is required".to_string()))?;
            if request.y_axis.is_empty() {
                return Err(ServiceError::Validation(
                    "at least one y_axis field is required".to_string(),
                ));
            }
            (x_axis, request.y_axis.clone())
        }
    };

    let service = QueryService::new(state.db.clone());
    let mut resolved = Vec::new();
    if !request.dataset_ids.is_empty() {
        resolved.extend(service.datasets_by_ids(&request.dataset_ids).await?);
    }
    if !request.datasets.is_empty() || !request.filters.is_empty() {
        for model in service
            .resolve_datasets(&request.datasets, &request.filters)
            .await?
        {
            if !resolved.iter().any(|d| d.id == model.id) {
                resolved.push(model);
            }
        }
    }
    if resolved.is_empty() {
        return Err(ServiceError::Validation(
            "select at least one dataset or filter".to_string(),
        ));
    }

    let mut auth_errors = Vec::new();
    let mut unlocked = Vec::new();
    for dataset in resolved {
        match QueryService::unlock_key(&dataset, &request.passwords) {
            Ok(key) => unlocked.push((dataset, key)),
            Err(err) => auth_errors.push(err.to_string()),
        }
    }
    if !auth_errors.is_empty() {
        return Err(ServiceError::Unauthorized(auth_errors.join("; ")));
    }

    let mut per_dataset = Vec::with_capacity(unlocked.len());
    for (dataset, key) in &unlocked {
        let rows = service.load_rows(dataset, key.as_ref()).await?;
        debug!(dataset = %dataset.name, rows = rows.len(), "loaded rows for plot");
        per_dataset.push((dataset.name.clone(), rows));
    }

    let chart = PlotService::build_chart(&per_dataset, &x_axis, &y_axes)?;
    Ok(Json(chart))
}
