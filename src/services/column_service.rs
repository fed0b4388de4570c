//! Derived-column persistence: attach a new named column to an existing
//! dataset, one value per row, stored in each row's open-ended `extra` map.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use tracing::info;

use crate::cipher;
use crate::database::entities::{dataset_rows, datasets};
use crate::errors::ServiceError;
use crate::extract::worksheet::MEASUREMENT_COLUMNS;
use crate::lock::FileLock;
use crate::services::query_service::QueryService;

/// Declared type of an added column. Values are stored as text either way;
/// a numeric column additionally requires every non-empty value to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnType {
    #[default]
    Text,
    Number,
}

impl ColumnType {
    pub fn parse(name: &str) -> Result<Self, ServiceError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "" | "text" => Ok(ColumnType::Text),
            "number" | "numeric" => Ok(ColumnType::Number),
            other => Err(ServiceError::Validation(format!(
                "unknown column type '{other}'; expected 'text' or 'number'"
            ))),
        }
    }

    fn validate(self, values: &[String]) -> Result<(), ServiceError> {
        if self != ColumnType::Number {
            return Ok(());
        }
        for (index, value) in values.iter().enumerate() {
            if !value.is_empty() && value.parse::<f64>().is_err() {
                return Err(ServiceError::Validation(format!(
                    "value '{value}' at position {} is not numeric",
                    index + 1
                )));
            }
        }
        Ok(())
    }
}

pub struct ColumnService {
    db: DatabaseConnection,
    lock: Arc<FileLock>,
}

impl ColumnService {
    pub fn new(db: DatabaseConnection, lock: Arc<FileLock>) -> Self {
        Self { db, lock }
    }

    /// Add a column of values to a dataset. The value count must exactly
    /// match the dataset's row count; on any failure the dataset's rows are
    /// left untouched. Runs inside the writer lock.
    pub async fn add_column(
        &self,
        dataset_name: &str,
        column_name: &str,
        column_type: ColumnType,
        values: &[String],
        password: Option<&str>,
    ) -> Result<usize, ServiceError> {
        validate_column_name(column_name)?;
        column_type.validate(values)?;

        let guard = self.lock.acquire().await?;
        let result = self
            .add_column_locked(dataset_name, column_name, values, password)
            .await;
        guard.release();
        result
    }

    async fn add_column_locked(
        &self,
        dataset_name: &str,
        column_name: &str,
        values: &[String],
        password: Option<&str>,
    ) -> Result<usize, ServiceError> {
        let dataset = datasets::Entity::find()
            .filter(datasets::Column::Name.eq(dataset_name))
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("dataset '{dataset_name}' not found")))?;

        // Password check first; no row is touched on a failed verification.
        let passwords = match password {
            Some(password) => {
                HashMap::from([(dataset.name.clone(), password.to_string())])
            }
            None => HashMap::new(),
        };
        let key = QueryService::unlock_key(&dataset, &passwords)?;
        let iv = dataset.iv.clone();

        let rows = dataset_rows::Entity::find()
            .filter(dataset_rows::Column::DatasetId.eq(dataset.id))
            .order_by_asc(dataset_rows::Column::Id)
            .all(&self.db)
            .await?;

        if rows.len() != values.len() {
            return Err(ServiceError::Validation(format!(
                "value count mismatch: dataset '{dataset_name}' has {} rows, got {} values",
                rows.len(),
                values.len()
            )));
        }

        let txn = self.db.begin().await?;
        let outcome: Result<(), ServiceError> = async {
            for (row, value) in rows.iter().zip(values) {
                let stored = match (&key, iv.as_deref()) {
                    (Some(key), Some(iv)) => cipher::encrypt_value(value, key, iv)?,
                    _ => value.clone(),
                };

                let mut extra: IndexMap<String, String> = row
                    .extra
                    .as_deref()
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or_default();
                extra.insert(column_name.to_string(), stored);
                let serialized = serde_json::to_string(&extra)
                    .map_err(|e| ServiceError::Validation(e.to_string()))?;

                let mut active: dataset_rows::ActiveModel = row.clone().into();
                active.extra = Set(Some(serialized));
                active.update(&txn).await?;
            }
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                txn.commit().await?;
                info!(
                    dataset = %dataset_name,
                    column = %column_name,
                    rows = rows.len(),
                    "added column"
                );
                Ok(rows.len())
            }
            Err(err) => {
                let _ = txn.rollback().await;
                Err(err)
            }
        }
    }
}

/// Split inline delimited text into column values: one value per line, or
/// comma-separated on a single line. Surrounding whitespace is dropped, as
/// are trailing empty entries from a final newline.
pub fn parse_values(text: &str) -> Vec<String> {
    let separator = if text.contains('\n') { '\n' } else { ',' };
    let mut values: Vec<String> = text
        .split(separator)
        .map(|v| v.trim().trim_matches('\r').to_string())
        .collect();
    while values.last().is_some_and(|v| v.is_empty()) {
        values.pop();
    }
    values
}

fn validate_column_name(column_name: &str) -> Result<(), ServiceError> {
    let trimmed = column_name.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::Validation(
            "column name must not be empty".to_string(),
        ));
    }
    if MEASUREMENT_COLUMNS.contains(&trimmed) {
        return Err(ServiceError::Validation(format!(
            "column '{trimmed}' clashes with a measurement column"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_values_handles_lines_and_commas() {
        assert_eq!(parse_values("1\n2\n3\n"), vec!["1", "2", "3"]);
        assert_eq!(parse_values("1,2,3"), vec!["1", "2", "3"]);
        assert_eq!(parse_values("a\r\nb\r\n"), vec!["a", "b"]);
        // Interior empties survive; only trailing ones are trimmed.
        assert_eq!(parse_values("1,,3,"), vec!["1", "", "3"]);
    }

    #[test]
    fn column_name_validation() {
        assert!(validate_column_name("density_index").is_ok());
        assert!(validate_column_name("").is_err());
        assert!(validate_column_name("axial_strain").is_err());
    }

    #[test]
    fn column_type_parsing_and_validation() {
        assert_eq!(ColumnType::parse("").unwrap(), ColumnType::Text);
        assert_eq!(ColumnType::parse("Number").unwrap(), ColumnType::Number);
        assert!(ColumnType::parse("blob").is_err());

        let numeric = vec!["1.5".to_string(), "".to_string(), "-2e3".to_string()];
        assert!(ColumnType::Number.validate(&numeric).is_ok());

        let bad = vec!["1.5".to_string(), "abc".to_string()];
        let err = ColumnType::Number.validate(&bad).unwrap_err();
        assert!(err.to_string().contains("position 2"));

        assert!(ColumnType::Text.validate(&bad).is_ok());
    }
}
