use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    response::Json,
    routing::{get, post},
    Router,
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

use super::handlers::{columns, datasets, health, plot, upload};
use crate::config::AppConfig;
use crate::lock::FileLock;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub lock: Arc<FileLock>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        upload::upload_files,
        datasets::list_datasets,
        datasets::list_instances,
        datasets::list_columns,
        datasets::resolve_datasets,
        plot::build_plot,
        columns::add_column,
    ),
    components(schemas(
        crate::services::ingest_service::FileReport,
        crate::services::ingest_service::BatchReport,
        crate::services::query_service::DatasetSummary,
        crate::services::query_service::InstanceFilter,
        datasets::ResolveRequest,
        plot::PlotRequest,
    ))
)]
struct ApiDoc;

pub async fn create_app(db: DatabaseConnection, config: &AppConfig) -> Result<Router> {
    let lock = Arc::new(FileLock::new(&config.lock));
    let state = AppState { db, lock };

    let cors = match config.server.cors_origin.as_deref() {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        // Health check endpoint
        .route("/health", get(health::health_check))
        // OpenAPI description
        .route("/api-docs/openapi.json", get(openapi_json))
        // API v1 routes
        .nest("/api/v1", api_v1_routes())
        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(DefaultBodyLimit::max(config.server.max_upload_bytes)),
        )
        .with_state(state);

    Ok(app)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload::upload_files))
        .route("/datasets", get(datasets::list_datasets))
        .route("/instances", get(datasets::list_instances))
        .route("/columns", get(datasets::list_columns))
        .route("/datasets/resolve", post(datasets::resolve_datasets))
        .route("/plot", post(plot::build_plot))
        .route("/datasets/:name/columns", post(columns::add_column))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
