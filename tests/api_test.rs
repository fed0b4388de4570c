//! API integration tests
//!
//! Exercises the HTTP surface end to end: multipart upload, dataset and
//! instance inventories, resolution, plotting and derived columns, plus the
//! busy responses when the writer lock is held.

use anyhow::Result;
use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use sea_orm::Database;
use serde_json::{json, Value};
use tempfile::TempDir;

use soillab::config::AppConfig;
use soillab::database::setup_database;
use soillab::lock::FileLock;
use soillab::server::app::create_app;

fn worksheet_csv(data_rows: &[&str]) -> String {
    let mut lines = vec![
        ",,,,,,,,".to_string(),
        ",Drainage,drained,,,,,,".to_string(),
        ",Shearing,compression,,,,,,".to_string(),
        ",PSD,sand,,,,,,".to_string(),
    ];
    while lines.len() < 10 {
        lines.push(",,,,,,,,".to_string());
    }
    lines.push("Stage,Time start of stage ,Shear induced PWP,,,,,,".to_string());
    lines.push(",(Sec),,Axial strain,Vol strain,Induced PWP,p',q,e".to_string());
    for row in data_rows {
        lines.push(row.to_string());
    }
    lines.join("\n")
}

fn default_rows() -> Vec<&'static str> {
    vec![
        "1,0,0.00,0.01,0.02,0.03,120.5,60.2,0.82",
        "1,10,0.05,0.02,0.03,0.04,119.8,61.0,0.81",
    ]
}

fn csv_part(content: &str, filename: &str) -> Part {
    Part::bytes(content.as_bytes().to_vec())
        .file_name(filename.to_string())
        .mime_type("text/csv")
}

/// Create a test server with a scratch database and lock file.
async fn setup_test_server() -> Result<(TestServer, AppConfig, TempDir)> {
    let dir = tempfile::tempdir()?;
    let db_url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    let mut config = AppConfig::default();
    config.lock.path = dir.path().join("writer.lock");
    config.lock.timeout_secs = 1;
    config.lock.poll_interval_ms = 20;

    let app = create_app(db, &config).await?;
    let server = TestServer::new(app)?;

    Ok((server, config, dir))
}

async fn upload_dataset(server: &TestServer, name: &str, password: Option<&str>) {
    let mut form = MultipartForm::new().add_part(
        "files",
        csv_part(&worksheet_csv(&default_rows()), &format!("{name}.csv")),
    );
    if let Some(password) = password {
        form = form.add_text("password", password.to_string());
    }

    let response = server.post("/api/v1/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["service"], "soillab");
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_upload_and_inventories() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;

    let form = MultipartForm::new()
        .add_part("files", csv_part(&worksheet_csv(&default_rows()), "CSL_1_U.csv"));
    let response = server.post("/api/v1/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["files"][0]["dataset"], "CSL_1_U");
    assert_eq!(body["files"][0]["rows_inserted"], 2);

    let response = server.get("/api/v1/datasets").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let datasets: Vec<Value> = response.json();
    assert_eq!(datasets.len(), 1);
    assert_eq!(datasets[0]["name"], "CSL_1_U");
    assert_eq!(datasets[0]["encrypted"], false);

    let response = server.get("/api/v1/instances").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let instances: Value = response.json();
    assert_eq!(instances["drainage"], json!(["drained"]));

    let response = server.get("/api/v1/columns").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let columns: Value = response.json();
    assert!(columns["columns"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "axial_strain"));

    Ok(())
}

#[tokio::test]
async fn test_upload_rejects_unsupported_file_type() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;

    let form = MultipartForm::new().add_part(
        "files",
        Part::bytes(b"binary".to_vec())
            .file_name("report.docx")
            .mime_type("application/octet-stream"),
    );
    let response = server.post("/api/v1/upload").multipart(form).await;

    // Single file, single failure: the whole batch failed.
    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert!(body["files"][0]["message"]
        .as_str()
        .unwrap()
        .contains("unsupported file type"));

    Ok(())
}

#[tokio::test]
async fn test_partial_batch_reports_per_file() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;

    let form = MultipartForm::new()
        .add_part("files", csv_part(&worksheet_csv(&default_rows()), "CSL_1_U.csv"))
        .add_part("files", csv_part("not a worksheet", "CSL_2_U.csv"))
        .add_part("files", csv_part(&worksheet_csv(&default_rows()), "CSL_3_U.csv"));

    let response = server.post("/api/v1/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert_eq!(body["files"][0]["success"], true);
    assert_eq!(body["files"][1]["success"], false);
    assert_eq!(body["files"][2]["success"], true);

    let datasets: Vec<Value> = server.get("/api/v1/datasets").await.json();
    assert_eq!(datasets.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_upload_conflicts() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;

    upload_dataset(&server, "CSL_1_U", None).await;

    let form = MultipartForm::new()
        .add_part("files", csv_part(&worksheet_csv(&default_rows()), "CSL_1_U.csv"));
    let response = server.post("/api/v1/upload").multipart(form).await;

    assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json();
    assert!(body["files"][0]["message"]
        .as_str()
        .unwrap()
        .contains("already exists"));

    Ok(())
}

#[tokio::test]
async fn test_upload_is_locked_while_another_writer_holds_the_token() -> Result<()> {
    let (server, config, _dir) = setup_test_server().await?;

    let other_writer = FileLock::new(&config.lock);
    let guard = other_writer.acquire().await?;

    let form = MultipartForm::new()
        .add_part("files", csv_part(&worksheet_csv(&default_rows()), "CSL_1_U.csv"));
    let response = server.post("/api/v1/upload").multipart(form).await;
    assert_eq!(response.status_code(), StatusCode::LOCKED);

    guard.release();

    upload_dataset(&server, "CSL_1_U", None).await;

    Ok(())
}

#[tokio::test]
async fn test_resolve_and_plot_flow() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;
    upload_dataset(&server, "CSL_1_U", None).await;

    let response = server
        .post("/api/v1/datasets/resolve")
        .json(&json!({ "datasets": ["CSL_1_U"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["datasets"], json!(["CSL_1_U"]));
    assert_eq!(body["dataset_ids"].as_array().unwrap().len(), 1);

    let response = server
        .post("/api/v1/plot")
        .json(&json!({
            "datasets": ["CSL_1_U"],
            "x_axis": "p",
            "y_axis": ["q"],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let chart: Value = response.json();
    assert_eq!(chart["chart_type"], "scatter");
    assert_eq!(chart["series"][0]["dataset"], "CSL_1_U");
    assert_eq!(chart["series"][0]["x"].as_array().unwrap().len(), 2);

    // Preset overrides the axis selection.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "datasets": ["CSL_1_U"], "preset": "stress_path" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    // Resolved identifiers work in place of names.
    let dataset_ids = body["dataset_ids"].clone();
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "dataset_ids": dataset_ids, "x_axis": "p", "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn test_plot_validation_and_not_found() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;
    upload_dataset(&server, "CSL_1_U", None).await;

    // Missing x_axis.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "datasets": ["CSL_1_U"], "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    // Unknown dataset.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "datasets": ["nope"], "x_axis": "p", "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // Empty selection.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "x_axis": "p", "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}

#[tokio::test]
async fn test_encrypted_dataset_requires_password_via_api() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;
    upload_dataset(&server, "CSL_1_U", Some("secret123")).await;

    // No password.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "datasets": ["CSL_1_U"], "x_axis": "p", "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

    // Wrong password.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({
            "datasets": ["CSL_1_U"],
            "x_axis": "p",
            "y_axis": ["q"],
            "passwords": { "CSL_1_U": "wrong" },
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("incorrect password"));

    // Correct password decrypts to the original values.
    let response = server
        .post("/api/v1/plot")
        .json(&json!({
            "datasets": ["CSL_1_U"],
            "x_axis": "p",
            "y_axis": ["q"],
            "passwords": { "CSL_1_U": "secret123" },
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let chart: Value = response.json();
    let xs = chart["series"][0]["x"].as_array().unwrap();
    assert!((xs[0].as_f64().unwrap() - 120.5).abs() < 1e-9);

    Ok(())
}

#[tokio::test]
async fn test_plot_reports_busy_while_upload_in_progress() -> Result<()> {
    let (server, config, _dir) = setup_test_server().await?;
    upload_dataset(&server, "CSL_1_U", None).await;

    let writer = FileLock::new(&config.lock);
    let guard = writer.acquire().await?;

    let response = server
        .post("/api/v1/plot")
        .json(&json!({ "datasets": ["CSL_1_U"], "x_axis": "p", "y_axis": ["q"] }))
        .await;
    assert_eq!(response.status_code(), StatusCode::LOCKED);

    guard.release();
    Ok(())
}

#[tokio::test]
async fn test_add_column_endpoint() -> Result<()> {
    let (server, _config, _dir) = setup_test_server().await?;
    upload_dataset(&server, "CSL_1_U", None).await;

    // Length mismatch: dataset has 2 rows, one value supplied.
    let form = MultipartForm::new()
        .add_text("column_name", "density_index")
        .add_text("values", "0.1");
    let response = server
        .post("/api/v1/datasets/CSL_1_U/columns")
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("mismatch"));

    // Matching count succeeds and the column shows up for axis selection.
    let form = MultipartForm::new()
        .add_text("column_name", "density_index")
        .add_text("values", "0.1\n0.2\n");
    let response = server
        .post("/api/v1/datasets/CSL_1_U/columns")
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["rows_updated"], 2);

    let columns: Value = server
        .get("/api/v1/columns")
        .add_query_param("datasets", "CSL_1_U")
        .await
        .json();
    assert!(columns["columns"]
        .as_array()
        .unwrap()
        .iter()
        .any(|c| c == "density_index"));

    // Unknown dataset.
    let form = MultipartForm::new()
        .add_text("column_name", "density_index")
        .add_text("values", "0.1\n0.2\n");
    let response = server
        .post("/api/v1/datasets/nope/columns")
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // A numeric column rejects non-numeric values.
    let form = MultipartForm::new()
        .add_text("column_name", "depth")
        .add_text("column_type", "number")
        .add_text("values", "1.0\nnot-a-number");
    let response = server
        .post("/api/v1/datasets/CSL_1_U/columns")
        .multipart(form)
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    Ok(())
}
