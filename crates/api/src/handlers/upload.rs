use std::path::Path;

use axum::extract::{Multipart, State};
use axum::Json;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::response::SubmitResponse;
use crate::routes::AppState;

/// 接收multipart上传（file字段），落盘后提交聚合任务。
///
/// 提交校验失败时已落盘的文件会被删除，任务不会被创建。
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<SubmitResponse>> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("无法解析multipart请求: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field
            .file_name()
            .map(sanitize_file_name)
            .unwrap_or_else(|| "upload.csv".to_string());
        let stored_path = state
            .upload_dir
            .join(format!("{}_{original_name}", Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&stored_path)
            .await
            .map_err(|e| ApiError::Internal(format!("无法创建上传文件: {e}")))?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::BadRequest(format!("读取上传内容失败: {e}")))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| ApiError::Internal(format!("写入上传文件失败: {e}")))?;
        }
        file.flush()
            .await
            .map_err(|e| ApiError::Internal(format!("写入上传文件失败: {e}")))?;
        drop(file);

        match state.store.enqueue(&stored_path).await {
            Ok(job) => {
                info!(job_id = %job.id, file = %stored_path.display(), "upload accepted");
                return Ok(Json(SubmitResponse { job_id: job.id }));
            }
            Err(e) => {
                // 提交失败的上传不保留
                if let Err(rm) = tokio::fs::remove_file(&stored_path).await {
                    warn!(file = %stored_path.display(), "failed to remove rejected upload: {rm}");
                }
                return Err(e.into());
            }
        }
    }

    Err(ApiError::BadRequest("未提供文件".to_string()))
}

/// 只保留文件名部分，去掉任何路径成分
fn sanitize_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload.csv".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("sales.csv"), "sales.csv");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("dir/sales.csv"), "sales.csv");
        assert_eq!(sanitize_file_name(""), "upload.csv");
    }
}
