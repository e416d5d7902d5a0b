//! HTTP接入层：上传提交、状态轮询、结果下载

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_routes, AppState};
