use thiserror::Error;

use crate::models::JobState;

/// 聚合服务错误类型定义
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("任务未找到: {id}")]
    JobNotFound { id: String },

    #[error("非法状态转换: 任务 {id} 不能从 {from:?} 转换到 {to:?}")]
    InvalidTransition {
        id: String,
        from: JobState,
        to: JobState,
    },

    #[error("无效的输入文件: {0}")]
    InvalidInput(String),

    #[error("聚合执行错误: {0}")]
    Aggregation(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type AggregatorResult<T> = std::result::Result<T, AggregatorError>;

impl From<serde_json::Error> for AggregatorError {
    fn from(err: serde_json::Error) -> Self {
        AggregatorError::Serialization(err.to_string())
    }
}
