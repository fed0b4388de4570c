use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One measurement row. Field values are plain text, or base64 ciphertext
/// when the owning dataset is encrypted. `extra` holds the open-ended
/// added-column map as a JSON object.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dataset_rows")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub dataset_id: i32,
    pub time_start_of_stage: String,
    pub shear_induced_pwp: String,
    pub axial_strain: String,
    pub vol_strain: String,
    pub induced_pwp: String,
    pub p: String,
    pub q: String,
    pub e: String,
    pub extra: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::datasets::Entity",
        from = "Column::DatasetId",
        to = "super::datasets::Column::Id"
    )]
    Datasets,
}

impl Related<super::datasets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Datasets.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
