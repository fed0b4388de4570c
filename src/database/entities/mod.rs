pub mod dataset_instances;
pub mod dataset_rows;
pub mod datasets;
pub mod instances;
