use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::info;

use crate::errors::ServiceError;
use crate::server::app::AppState;
use crate::services::ingest_service::{IngestService, UploadedFile};

/// Upload one or more worksheet exports, optionally encrypting every file
/// of the batch under a password. Files fail individually; the batch
/// responds 200 as long as at least one file made it, 500 when none did and
/// 423 when another writer holds the lock.
#[utoipa::path(
    post,
    path = "/api/v1/upload",
    responses(
        (status = 200, description = "Batch processed; per-file report included", body = crate::services::ingest_service::BatchReport),
        (status = 400, description = "No files supplied"),
        (status = 423, description = "Another upload holds the writer lock"),
        (status = 500, description = "Every file in the batch failed")
    )
)]
pub async fn upload_files(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ServiceError> {
    let mut files: Vec<UploadedFile> = Vec::new();
    let mut password: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("password") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                if !value.is_empty() {
                    password = Some(value);
                }
            }
            Some("files") | Some("file") => {
                let filename = field.file_name().unwrap_or("upload").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;
                files.push(UploadedFile {
                    filename,
                    data: data.to_vec(),
                });
            }
            _ => {}
        }
    }

    info!(files = files.len(), encrypted = password.is_some(), "upload received");

    let service = IngestService::new(state.db.clone(), state.lock.clone());
    let report = service.ingest_batch(&files, password.as_deref()).await?;

    let status = if report.all_failed() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(json!({
            "success": !report.all_failed(),
            "files": report.files,
        })),
    ))
}
