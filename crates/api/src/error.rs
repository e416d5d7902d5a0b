use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use aggregator_core::errors::AggregatorError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("聚合服务错误: {0}")]
    Aggregator(#[from] AggregatorError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,

    #[error("请求过于频繁")]
    TooManyRequests,

    #[error("内部服务器错误: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Aggregator(AggregatorError::JobNotFound { id }) => (
                StatusCode::NOT_FOUND,
                "JOB_NOT_FOUND",
                format!("任务 {id} 不存在"),
            ),
            ApiError::Aggregator(AggregatorError::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone())
            }
            ApiError::Aggregator(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                e.to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", "未找到资源".to_string()),
            ApiError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "请求过于频繁，请稍后再试".to_string(),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        let body = json!({
            "success": false,
            "error": {
                "type": error_type,
                "message": message,
            },
            "timestamp": chrono::Utc::now(),
        });

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
