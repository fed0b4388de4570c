use axum::{
    extract::{Multipart, Path, State},
    response::Json,
};
use serde_json::{json, Value};
use tracing::info;

use crate::errors::ServiceError;
use crate::server::app::AppState;
use crate::services::column_service::{parse_values, ColumnService, ColumnType};

/// Attach a derived column to an existing dataset. Values arrive either as
/// an inline delimited `values` field or as a `file` part; the count must
/// match the dataset's row count exactly.
#[utoipa::path(
    post,
    path = "/api/v1/datasets/{name}/columns",
    params(
        ("name" = String, Path, description = "Target dataset name")
    ),
    responses(
        (status = 200, description = "Column added to every row"),
        (status = 400, description = "Missing fields or value-count mismatch"),
        (status = 401, description = "Missing or incorrect password"),
        (status = 404, description = "Dataset not found"),
        (status = 423, description = "Another upload holds the writer lock")
    )
)]
pub async fn add_column(
    State(state): State<AppState>,
    Path(dataset_name): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ServiceError> {
    let mut column_name: Option<String> = None;
    let mut column_type: Option<String> = None;
    let mut values: Option<Vec<String>> = None;
    let mut password: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("column_name") => {
                column_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServiceError::Validation(e.to_string()))?,
                );
            }
            Some("column_type") => {
                column_type = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ServiceError::Validation(e.to_string()))?,
                );
            }
            Some("values") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                values = Some(parse_values(&text));
            }
            Some("file") => {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                let text = String::from_utf8(data.to_vec()).map_err(|_| {
                    ServiceError::Validation("column file is not valid UTF-8".to_string())
                })?;
                values = Some(parse_values(&text));
            }
            Some("password") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                if !value.is_empty() {
                    password = Some(value);
                }
            }
            _ => {}
        }
    }

    let column_name = column_name
        .ok_or_else(|| ServiceError::Validation("column_name is required".to_string()))?;
    let column_type = ColumnType::parse(column_type.as_deref().unwrap_or_default())?;
    let values = values.ok_or_else(|| {
        ServiceError::Validation("column values are required (inline or as a file)".to_string())
    })?;

    let service = ColumnService::new(state.db.clone(), state.lock.clone());
    let rows_updated = service
        .add_column(
            &dataset_name,
            &column_name,
            column_type,
            &values,
            password.as_deref(),
        )
        .await?;

    info!(dataset = %dataset_name, column = %column_name, rows_updated, "column added");

    Ok(Json(json!({
        "success": true,
        "dataset": dataset_name,
        "column": column_name,
        "rows_updated": rows_updated,
    })))
}
