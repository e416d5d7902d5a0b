use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use aggregator_core::models::JobState;

use crate::error::{ApiError, ApiResult};
use crate::routes::AppState;

/// 下载聚合结果文件。任务不存在、未完成或产物缺失一律404。
///
/// 结果以流式响应体返回，不在内存中缓冲整个文件。
pub async fn download_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job = state
        .store
        .get_job(&job_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    if job.state != JobState::Completed {
        return Err(ApiError::NotFound);
    }
    let output = job.output.ok_or(ApiError::NotFound)?;

    let file = tokio::fs::File::open(&output.output_path)
        .await
        .map_err(|_| ApiError::NotFound)?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{job_id}_output.csv\""),
            ),
        ],
        body,
    )
        .into_response())
}
