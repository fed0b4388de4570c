//! Read-side resolution: dataset selection, instance filtering, column
//! inventory and per-field decryption.
//!
//! Readers do not take the writer lock; a query racing an in-flight upload
//! may see a dataset appear mid-batch, and callers are expected to tolerate
//! that rather than fail.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexMap;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::cipher::{self, Key};
use crate::database::entities::{dataset_instances, dataset_rows, datasets, instances};
use crate::errors::ServiceError;
use crate::extract::worksheet::MEASUREMENT_COLUMNS;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DatasetSummary {
    pub name: String,
    pub encrypted: bool,
}

/// One filter clause: values are ORed within the clause; clauses are ANDed
/// across distinct instance names.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct InstanceFilter {
    pub name: String,
    pub values: Vec<String>,
}

/// A decrypted (or plain) row as field-name → value, fixed measurement
/// fields first, added columns after.
pub type RowValues = IndexMap<String, String>;

pub struct QueryService {
    db: DatabaseConnection,
}

impl QueryService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// All dataset names with their encryption status, public ones only.
    pub async fn list_datasets(&self) -> Result<Vec<DatasetSummary>, ServiceError> {
        let models = datasets::Entity::find()
            .filter(datasets::Column::Public.eq(true))
            .order_by_asc(datasets::Column::Name)
            .all(&self.db)
            .await?;

        Ok(models
            .into_iter()
            .map(|m| DatasetSummary {
                name: m.name,
                encrypted: m.encrypted,
            })
            .collect())
    }

    /// Instance inventory grouped by name, for building filter controls.
    pub async fn list_instances(&self) -> Result<IndexMap<String, Vec<String>>, ServiceError> {
        let models = instances::Entity::find()
            .order_by_asc(instances::Column::Name)
            .order_by_asc(instances::Column::Value)
            .all(&self.db)
            .await?;

        let mut inventory: IndexMap<String, Vec<String>> = IndexMap::new();
        for instance in models {
            inventory.entry(instance.name).or_default().push(instance.value);
        }
        Ok(inventory)
    }

    /// Columns available for axis selection: the fixed measurement fields
    /// plus every added-column key present on the selected datasets (or on
    /// any dataset when no selection is given).
    pub async fn list_columns(&self, dataset_ids: Option<&[i32]>) -> Result<Vec<String>, ServiceError> {
        let mut query = dataset_rows::Entity::find()
            .select_only()
            .column(dataset_rows::Column::Extra)
            .filter(dataset_rows::Column::Extra.is_not_null());
        if let Some(ids) = dataset_ids {
            query = query.filter(dataset_rows::Column::DatasetId.is_in(ids.iter().copied()));
        }
        let extras: Vec<Option<String>> = query.into_tuple().all(&self.db).await?;

        let mut added: BTreeSet<String> = BTreeSet::new();
        for extra in extras.into_iter().flatten() {
            if let Ok(map) = serde_json::from_str::<IndexMap<String, String>>(&extra) {
                added.extend(map.into_keys());
            }
        }

        let mut columns: Vec<String> = MEASUREMENT_COLUMNS.iter().map(|c| c.to_string()).collect();
        columns.extend(added);
        Ok(columns)
    }

    /// Resolve dataset names and/or instance filters into concrete dataset
    /// records. Both present → the two selections intersect.
    pub async fn resolve_datasets(
        &self,
        names: &[String],
        filters: &[InstanceFilter],
    ) -> Result<Vec<datasets::Model>, ServiceError> {
        if names.is_empty() && filters.is_empty() {
            return Err(ServiceError::Validation(
                "select at least one dataset or filter".to_string(),
            ));
        }

        let mut selected: Option<BTreeSet<i32>> = None;

        if !names.is_empty() {
            let mut by_name = BTreeSet::new();
            for name in names {
                let model = datasets::Entity::find()
                    .filter(datasets::Column::Name.eq(name.as_str()))
                    .one(&self.db)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!("dataset '{name}' not found"))
                    })?;
                by_name.insert(model.id);
            }
            selected = Some(by_name);
        }

        for filter in filters {
            if filter.values.is_empty() {
                continue;
            }
            let matching = self.datasets_with_instance(filter).await?;
            selected = Some(match selected {
                Some(current) => current.intersection(&matching).copied().collect(),
                None => matching,
            });
        }

        let ids = selected.unwrap_or_default();
        if ids.is_empty() {
            return Err(ServiceError::NotFound(
                "no datasets match the selection".to_string(),
            ));
        }

        let models = datasets::Entity::find()
            .filter(datasets::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(datasets::Column::Id)
            .all(&self.db)
            .await?;
        Ok(models)
    }

    /// Dataset ids linked to any of the clause's (name, value) instances.
    async fn datasets_with_instance(
        &self,
        filter: &InstanceFilter,
    ) -> Result<BTreeSet<i32>, ServiceError> {
        let instance_ids: Vec<i32> = instances::Entity::find()
            .filter(instances::Column::Name.eq(filter.name.as_str()))
            .filter(instances::Column::Value.is_in(filter.values.iter().map(String::as_str)))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        if instance_ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let links = dataset_instances::Entity::find()
            .filter(dataset_instances::Column::InstanceId.is_in(instance_ids))
            .all(&self.db)
            .await?;
        Ok(links.into_iter().map(|l| l.dataset_id).collect())
    }

    /// Verify the supplied password for an encrypted dataset and derive its
    /// data key. Verification happens before any decryption is attempted.
    /// Plain datasets need no key and yield `None`.
    pub fn unlock_key(
        dataset: &datasets::Model,
        passwords: &HashMap<String, String>,
    ) -> Result<Option<Key>, ServiceError> {
        if !dataset.encrypted {
            return Ok(None);
        }

        let password = passwords.get(&dataset.name).ok_or_else(|| {
            ServiceError::Unauthorized(format!(
                "dataset '{}' is encrypted; password required",
                dataset.name
            ))
        })?;

        let (salt, hash, key_salt) = match (
            dataset.password_salt.as_deref(),
            dataset.password_hash.as_deref(),
            dataset.key_salt.as_deref(),
        ) {
            (Some(salt), Some(hash), Some(key_salt)) => (salt, hash, key_salt),
            _ => {
                // Encrypted flag without key material is corrupt metadata.
                return Err(ServiceError::Decrypt);
            }
        };

        if !cipher::verify_password(salt, hash, password) {
            return Err(ServiceError::Unauthorized(format!(
                "incorrect password for dataset '{}'",
                dataset.name
            )));
        }

        Ok(Some(cipher::derive_key(password, key_salt)))
    }

    /// Load a dataset's rows, decrypting each field independently when a
    /// key is given. Added columns decrypt the same way.
    pub async fn load_rows(
        &self,
        dataset: &datasets::Model,
        key: Option<&Key>,
    ) -> Result<Vec<RowValues>, ServiceError> {
        let iv = dataset.iv.as_deref();
        let models = dataset_rows::Entity::find()
            .filter(dataset_rows::Column::DatasetId.eq(dataset.id))
            .order_by_asc(dataset_rows::Column::Id)
            .all(&self.db)
            .await?;

        let read = |stored: &str| -> Result<String, ServiceError> {
            match (key, iv) {
                (Some(key), Some(iv)) => Ok(cipher::decrypt_value(stored, key, iv)?),
                _ => Ok(stored.to_string()),
            }
        };

        let mut rows = Vec::with_capacity(models.len());
        for model in models {
            let mut values = RowValues::new();
            values.insert("time_start_of_stage".into(), read(&model.time_start_of_stage)?);
            values.insert("shear_induced_pwp".into(), read(&model.shear_induced_pwp)?);
            values.insert("axial_strain".into(), read(&model.axial_strain)?);
            values.insert("vol_strain".into(), read(&model.vol_strain)?);
            values.insert("induced_pwp".into(), read(&model.induced_pwp)?);
            values.insert("p".into(), read(&model.p)?);
            values.insert("q".into(), read(&model.q)?);
            values.insert("e".into(), read(&model.e)?);

            if let Some(extra) = model.extra.as_deref() {
                if let Ok(map) = serde_json::from_str::<IndexMap<String, String>>(extra) {
                    for (column, stored) in map {
                        values.insert(column, read(&stored)?);
                    }
                }
            }

            rows.push(values);
        }
        Ok(rows)
    }

    /// Fetch datasets by id, failing on any id that does not exist.
    pub async fn datasets_by_ids(&self, ids: &[i32]) -> Result<Vec<datasets::Model>, ServiceError> {
        let models = datasets::Entity::find()
            .filter(datasets::Column::Id.is_in(ids.iter().copied()))
            .order_by_asc(datasets::Column::Id)
            .all(&self.db)
            .await?;

        if let Some(missing) = ids.iter().find(|id| !models.iter().any(|m| m.id == **id)) {
            return Err(ServiceError::NotFound(format!(
                "dataset id {missing} not found"
            )));
        }
        Ok(models)
    }

    /// Find one dataset by name.
    pub async fn dataset_by_name(&self, name: &str) -> Result<datasets::Model, ServiceError> {
        datasets::Entity::find()
            .filter(datasets::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("dataset '{name}' not found")))
    }
}

/// Parse a cell for plotting. Unparseable and empty cells become the
/// missing marker (`None`); the affected row drops out of that series only.
pub fn numeric(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok()
}
