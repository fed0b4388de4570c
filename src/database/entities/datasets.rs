use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One uploaded spreadsheet. When `encrypted` is set, the four key/verifier
/// fields are all present; otherwise they are all absent.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "datasets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    #[sea_orm(unique)]
    pub name: String,
    pub public: bool,
    pub encrypted: bool,
    #[serde(skip_serializing)]
    pub key_salt: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub iv: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub password_salt: Option<Vec<u8>>,
    #[serde(skip_serializing)]
    pub password_hash: Option<Vec<u8>>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::dataset_rows::Entity")]
    DatasetRows,
    #[sea_orm(has_many = "super::dataset_instances::Entity")]
    DatasetInstances,
}

impl Related<super::dataset_rows::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DatasetRows.def()
    }
}

impl Related<super::dataset_instances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DatasetInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
