use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::ApiResult;
use crate::routes::AppState;

/// 健康检查：存活状态与当前队列深度
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let queue_depth = state.store.queue_depth().await?;
    Ok(Json(json!({
        "status": "ok",
        "queueDepth": queue_depth,
    })))
}
