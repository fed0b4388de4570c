//! Upload ingestion: turns a batch of worksheet exports into persisted
//! datasets.
//!
//! The whole batch runs inside one lock critical section so concurrent
//! uploads cannot race on duplicate-name checks or instance deduplication.
//! Each file gets its own transaction; a failure rolls back that file only
//! and the batch moves on to the next one.

use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::cipher::{self, Key};
use crate::database::entities::{dataset_instances, dataset_rows, datasets, instances};
use crate::errors::ServiceError;
use crate::extract::{self, instances::find_instances, worksheet, ExtractError};
use crate::lock::FileLock;

/// Worksheet exports we accept. Anything else is rejected before the lock
/// is taken.
const ALLOWED_EXTENSIONS: [&str; 3] = ["csv", "tsv", "txt"];

/// Bounded retry for transient store errors during a single file's insert.
const INSERT_RETRY_ATTEMPTS: u32 = 3;
const INSERT_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FileReport {
    pub filename: String,
    pub dataset: Option<String>,
    pub success: bool,
    pub message: String,
    pub rows_inserted: usize,
}

impl FileReport {
    fn success(filename: &str, dataset: String, rows_inserted: usize) -> Self {
        Self {
            filename: filename.to_string(),
            dataset: Some(dataset),
            success: true,
            message: "Data inserted successfully.".to_string(),
            rows_inserted,
        }
    }

    fn failure(filename: &str, message: String) -> Self {
        Self {
            filename: filename.to_string(),
            dataset: None,
            success: false,
            message,
            rows_inserted: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.files.iter().filter(|f| f.success).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.succeeded()
    }

    pub fn all_failed(&self) -> bool {
        !self.files.is_empty() && self.succeeded() == 0
    }
}

/// Per-dataset encryption material. The password is shared across a batch,
/// but salt, IV and derived key are fresh for every dataset.
struct DatasetEncryption {
    key_salt: Vec<u8>,
    iv: Vec<u8>,
    password_salt: Vec<u8>,
    password_hash: Vec<u8>,
    key: Key,
}

impl DatasetEncryption {
    fn for_password(password: &str) -> Self {
        let key_salt = cipher::generate_salt();
        let key = cipher::derive_key(password, &key_salt);
        let (password_salt, password_hash) = cipher::hash_password(password);
        Self {
            key_salt,
            iv: cipher::generate_iv(),
            password_salt,
            password_hash,
            key,
        }
    }
}

pub struct IngestService {
    db: DatabaseConnection,
    lock: Arc<FileLock>,
}

impl IngestService {
    pub fn new(db: DatabaseConnection, lock: Arc<FileLock>) -> Self {
        Self { db, lock }
    }

    /// Ingest a batch of uploaded files. Per-file failures are captured in
    /// the report and never abort the remaining files; only failing to take
    /// the lock surfaces as an error for the batch as a whole.
    pub async fn ingest_batch(
        &self,
        files: &[UploadedFile],
        password: Option<&str>,
    ) -> Result<BatchReport, ServiceError> {
        if files.is_empty() {
            return Err(ServiceError::Validation("no files supplied".to_string()));
        }

        let guard = self.lock.acquire().await?;
        info!(files = files.len(), "starting upload batch");

        let mut reports = Vec::with_capacity(files.len());
        for file in files {
            let report = match self.ingest_file(file, password).await {
                Ok(report) => report,
                Err(err) => {
                    warn!(file = %file.filename, "file ingest failed: {err}");
                    FileReport::failure(&file.filename, err.to_string())
                }
            };
            reports.push(report);
        }

        guard.release();

        let batch = BatchReport { files: reports };
        info!(
            succeeded = batch.succeeded(),
            failed = batch.failed(),
            "upload batch finished"
        );
        Ok(batch)
    }

    /// Run one file through the ingest state machine. Anything that goes
    /// wrong after the dataset row is tentatively added rolls back this
    /// file's transaction.
    async fn ingest_file(
        &self,
        file: &UploadedFile,
        password: Option<&str>,
    ) -> Result<FileReport, ServiceError> {
        validate_extension(&file.filename)?;
        let dataset_name = dataset_name_from(&file.filename)?;

        let delimiter = extract::delimiter_for(&file.filename);
        let rows = worksheet::extract_rows(file.data.as_slice(), delimiter).map_err(
            |err: ExtractError| ServiceError::Validation(format!("{}: {err}", file.filename)),
        )?;

        // Metadata extraction is best effort and never sinks the file.
        let metadata = find_instances(file.data.as_slice(), delimiter);
        if metadata.is_empty() {
            debug!(file = %file.filename, "no instance metadata extracted");
        }

        let existing = datasets::Entity::find()
            .filter(datasets::Column::Name.eq(dataset_name.as_str()))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "dataset '{dataset_name}' already exists"
            )));
        }

        let encryption = password.map(DatasetEncryption::for_password);

        let txn = self.db.begin().await?;
        match self
            .ingest_file_in_txn(&txn, &dataset_name, &rows, &metadata, encryption.as_ref())
            .await
        {
            Ok(rows_inserted) => {
                txn.commit().await?;
                info!(dataset = %dataset_name, rows = rows_inserted, "dataset ingested");
                Ok(FileReport::success(
                    &file.filename,
                    dataset_name,
                    rows_inserted,
                ))
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    warn!(dataset = %dataset_name, "rollback failed: {rollback_err}");
                }
                Err(err)
            }
        }
    }

    async fn ingest_file_in_txn(
        &self,
        txn: &DatabaseTransaction,
        dataset_name: &str,
        rows: &[worksheet::WorksheetRow],
        metadata: &IndexMap<String, String>,
        encryption: Option<&DatasetEncryption>,
    ) -> Result<usize, ServiceError> {
        // Confidential availability hides the dataset from public listings.
        let public = metadata
            .get("availability")
            .map(|value| !value.eq_ignore_ascii_case("confidential"))
            .unwrap_or(true);

        let dataset = datasets::ActiveModel {
            name: Set(dataset_name.to_string()),
            public: Set(public),
            encrypted: Set(encryption.is_some()),
            key_salt: Set(encryption.map(|e| e.key_salt.clone())),
            iv: Set(encryption.map(|e| e.iv.clone())),
            password_salt: Set(encryption.map(|e| e.password_salt.clone())),
            password_hash: Set(encryption.map(|e| e.password_hash.clone())),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        let row_models: Vec<dataset_rows::ActiveModel> = rows
            .iter()
            .map(|row| row_to_model(dataset.id, row, encryption))
            .collect::<Result<_, ServiceError>>()?;

        let rows_inserted = row_models.len();
        insert_rows_with_retry(txn, row_models).await?;

        link_instances(txn, dataset.id, metadata).await?;

        Ok(rows_inserted)
    }
}

fn validate_extension(filename: &str) -> Result<(), ServiceError> {
    let extension = filename
        .rsplit('.')
        .next()
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if filename.contains('.') && ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "'{filename}': unsupported file type; expected one of {}",
            ALLOWED_EXTENSIONS.join(", ")
        )))
    }
}

/// Dataset name is the uploaded file's stem, path components stripped.
fn dataset_name_from(filename: &str) -> Result<String, ServiceError> {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);
    let stem = base.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(base);
    let stem = stem.trim();
    if stem.is_empty() {
        return Err(ServiceError::Validation(format!(
            "'{filename}': cannot derive a dataset name"
        )));
    }
    Ok(stem.to_string())
}

fn row_to_model(
    dataset_id: i32,
    row: &worksheet::WorksheetRow,
    encryption: Option<&DatasetEncryption>,
) -> Result<dataset_rows::ActiveModel, ServiceError> {
    let store = |value: &str| -> Result<String, ServiceError> {
        match encryption {
            Some(enc) => Ok(cipher::encrypt_value(value, &enc.key, &enc.iv)?),
            None => Ok(value.to_string()),
        }
    };

    Ok(dataset_rows::ActiveModel {
        dataset_id: Set(dataset_id),
        time_start_of_stage: Set(store(&row.time_start_of_stage)?),
        shear_induced_pwp: Set(store(&row.shear_induced_pwp)?),
        axial_strain: Set(store(&row.axial_strain)?),
        vol_strain: Set(store(&row.vol_strain)?),
        induced_pwp: Set(store(&row.induced_pwp)?),
        p: Set(store(&row.p)?),
        q: Set(store(&row.q)?),
        e: Set(store(&row.e)?),
        extra: Set(None),
        ..Default::default()
    })
}

/// Bulk-insert rows, retrying a transient store hiccup a fixed number of
/// times before giving up on the file.
async fn insert_rows_with_retry(
    txn: &DatabaseTransaction,
    models: Vec<dataset_rows::ActiveModel>,
) -> Result<(), ServiceError> {
    if models.is_empty() {
        return Ok(());
    }

    let mut attempt = 1;
    loop {
        match dataset_rows::Entity::insert_many(models.clone()).exec(txn).await {
            Ok(_) => return Ok(()),
            Err(err) if attempt < INSERT_RETRY_ATTEMPTS && is_transient(&err) => {
                warn!(attempt, "transient store error during row insert: {err}");
                tokio::time::sleep(INSERT_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
}

fn is_transient(err: &DbErr) -> bool {
    if matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_)) {
        return true;
    }
    let message = err.to_string().to_lowercase();
    message.contains("database is locked") || message.contains("disk i/o")
}

/// Deduplicate instances globally and link each to the dataset; the link is
/// unique per (dataset, instance) pair.
async fn link_instances(
    txn: &DatabaseTransaction,
    dataset_id: i32,
    metadata: &IndexMap<String, String>,
) -> Result<(), ServiceError> {
    for (name, value) in metadata {
        let instance = match instances::Entity::find()
            .filter(instances::Column::Name.eq(name.as_str()))
            .filter(instances::Column::Value.eq(value.as_str()))
            .one(txn)
            .await?
        {
            Some(instance) => instance,
            None => {
                instances::ActiveModel {
                    name: Set(name.clone()),
                    value: Set(value.clone()),
                    ..Default::default()
                }
                .insert(txn)
                .await?
            }
        };

        let linked = dataset_instances::Entity::find()
            .filter(dataset_instances::Column::DatasetId.eq(dataset_id))
            .filter(dataset_instances::Column::InstanceId.eq(instance.id))
            .one(txn)
            .await?;
        if linked.is_none() {
            dataset_instances::ActiveModel {
                dataset_id: Set(dataset_id),
                instance_id: Set(instance.id),
                ..Default::default()
            }
            .insert(txn)
            .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_validation() {
        assert!(validate_extension("CSL_1_U.csv").is_ok());
        assert!(validate_extension("CSL_1_U.TSV").is_ok());
        assert!(validate_extension("notes.docx").is_err());
        assert!(validate_extension("no_extension").is_err());
    }

    #[test]
    fn dataset_name_strips_path_and_extension() {
        assert_eq!(dataset_name_from("CSL_1_U.csv").unwrap(), "CSL_1_U");
        assert_eq!(
            dataset_name_from("C:\\uploads\\CSL_2_U.csv").unwrap(),
            "CSL_2_U"
        );
        assert_eq!(dataset_name_from("dir/CSL_3_U.tsv").unwrap(), "CSL_3_U");
        assert!(dataset_name_from(".csv").is_err());
    }

    #[test]
    fn transient_classification() {
        let locked = DbErr::Custom("database is locked".to_string());
        assert!(is_transient(&locked));
        let other = DbErr::Custom("UNIQUE constraint failed".to_string());
        assert!(!is_transient(&other));
    }
}
