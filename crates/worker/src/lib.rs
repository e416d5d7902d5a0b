//! Worker执行层：任务消费循环与流式CSV聚合

pub mod aggregate;
pub mod service;

pub use aggregate::{aggregate_file, SalesTotals, DEPARTMENT_COLUMN, OUTPUT_HEADERS, SALES_COLUMN};
pub use service::WorkerService;
