use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use aggregator_core::config::RateLimitConfig;
use aggregator_core::services::StatusResolver;
use aggregator_core::traits::JobStore;

use crate::handlers::{
    download::download_result, health::health_check, status::get_status, upload::upload_file,
};
use crate::middleware::{rate_limit, RateLimiter};

/// 上传大小上限：64MB
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub resolver: Arc<StatusResolver>,
    pub upload_dir: PathBuf,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, upload_dir: PathBuf) -> Self {
        Self::with_rate_limit(store, upload_dir, &RateLimitConfig::default())
    }

    pub fn with_rate_limit(
        store: Arc<dyn JobStore>,
        upload_dir: PathBuf,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        let resolver = Arc::new(StatusResolver::new(Arc::clone(&store)));
        let rate_limiter = rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(rate_limit)));
        Self {
            store,
            resolver,
            upload_dir,
            rate_limiter,
        }
    }
}

/// 创建API路由。限流只覆盖/api前缀，健康检查始终放行。
pub fn create_routes(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/upload", post(upload_file))
        .route("/api/status/{job_id}", get(get_status))
        .route("/api/download/{job_id}", get(download_result))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
