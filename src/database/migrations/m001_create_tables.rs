use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create datasets table
        manager
            .create_table(
                Table::create()
                    .table(Datasets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Datasets::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Datasets::Name).text().not_null())
                    .col(
                        ColumnDef::new(Datasets::Public)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Datasets::Encrypted)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Datasets::KeySalt).binary())
                    .col(ColumnDef::new(Datasets::Iv).binary())
                    .col(ColumnDef::new(Datasets::PasswordSalt).binary())
                    .col(ColumnDef::new(Datasets::PasswordHash).binary())
                    .col(ColumnDef::new(Datasets::CreatedAt).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_datasets_name")
                    .table(Datasets::Table)
                    .col(Datasets::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create dataset_rows table
        manager
            .create_table(
                Table::create()
                    .table(DatasetRows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DatasetRows::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DatasetRows::DatasetId).integer().not_null())
                    .col(
                        ColumnDef::new(DatasetRows::TimeStartOfStage)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(DatasetRows::ShearInducedPwp)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(DatasetRows::AxialStrain)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(DatasetRows::VolStrain)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(DatasetRows::InducedPwp)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(DatasetRows::P).text().not_null().default(""))
                    .col(ColumnDef::new(DatasetRows::Q).text().not_null().default(""))
                    .col(ColumnDef::new(DatasetRows::E).text().not_null().default(""))
                    .col(ColumnDef::new(DatasetRows::Extra).text())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_dataset_rows_dataset_id")
                            .from(DatasetRows::Table, DatasetRows::DatasetId)
                            .to(Datasets::Table, Datasets::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dataset_rows_dataset_id")
                    .table(DatasetRows::Table)
                    .col(DatasetRows::DatasetId)
                    .to_owned(),
            )
            .await?;

        // Create instances table
        manager
            .create_table(
                Table::create()
                    .table(Instances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Instances::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Instances::Name).text().not_null())
                    .col(ColumnDef::new(Instances::Value).text().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_instances_name_value")
                    .table(Instances::Table)
                    .col(Instances::Name)
                    .col(Instances::Value)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Create dataset_instances association table
        manager
            .create_table(
                Table::create()
                    .table(DatasetInstances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DatasetInstances::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(DatasetInstances::DatasetId)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DatasetInstances::InstanceId)
                            .integer()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_dataset_instances_dataset_id")
                            .from(DatasetInstances::Table, DatasetInstances::DatasetId)
                            .to(Datasets::Table, Datasets::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_dataset_instances_instance_id")
                            .from(DatasetInstances::Table, DatasetInstances::InstanceId)
                            .to(Instances::Table, Instances::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dataset_instances_pair")
                    .table(DatasetInstances::Table)
                    .col(DatasetInstances::DatasetId)
                    .col(DatasetInstances::InstanceId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DatasetInstances::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Instances::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(DatasetRows::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Datasets::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(Iden)]
enum Datasets {
    Table,
    Id,
    Name,
    Public,
    Encrypted,
    KeySalt,
    Iv,
    PasswordSalt,
    PasswordHash,
    CreatedAt,
}

#[derive(Iden)]
enum DatasetRows {
    Table,
    Id,
    DatasetId,
    TimeStartOfStage,
    ShearInducedPwp,
    AxialStrain,
    VolStrain,
    InducedPwp,
    P,
    Q,
    E,
    Extra,
}

#[derive(Iden)]
enum Instances {
    Table,
    Id,
    Name,
    Value,
}

#[derive(Iden)]
enum DatasetInstances {
    Table,
    Id,
    DatasetId,
    InstanceId,
}
