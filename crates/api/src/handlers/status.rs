use axum::extract::{Path, State};
use axum::Json;

use aggregator_core::services::ResolvedStatus;

use crate::error::ApiResult;
use crate::response::StatusResponse;
use crate::routes::AppState;

/// 轮询任务状态。未知id返回404；存储已完成但输出文件尚不可见时
/// 报告processing（状态解析器的对账语义）。
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    let resolved = state.resolver.resolve(&job_id).await?;

    let response = match resolved {
        ResolvedStatus::Processing => StatusResponse::Processing,
        ResolvedStatus::Completed { metrics, .. } => StatusResponse::Completed {
            download_link: format!("/api/download/{job_id}"),
            metrics: metrics.into(),
        },
        ResolvedStatus::Failed { error } => StatusResponse::Failed { error },
    };
    Ok(Json(response))
}
