use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A categorical attribute value, e.g. drainage=drained. Each (name, value)
/// pair exists once and is shared by every dataset exhibiting it.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::dataset_instances::Entity")]
    DatasetInstances,
}

impl Related<super::dataset_instances::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DatasetInstances.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
