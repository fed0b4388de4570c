pub mod column_service;
pub mod ingest_service;
pub mod plot_service;
pub mod query_service;

pub use column_service::ColumnService;
pub use ingest_service::IngestService;
pub use plot_service::PlotService;
pub use query_service::QueryService;
