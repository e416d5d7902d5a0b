//! 聚合服务核心：领域模型、错误类型、任务存储抽象与状态解析器

pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod traits;

pub use config::{
    AppConfig, InvalidRowPolicy, RateLimitConfig, ServerConfig, StorageConfig, StoreBackend,
    WorkerConfig,
};
pub use errors::{AggregatorError, AggregatorResult};
pub use models::{Job, JobMetrics, JobOutput, JobState};
pub use services::{ResolvedStatus, StatusResolver};
pub use traits::JobStore;
