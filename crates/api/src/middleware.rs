use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tokio::sync::Mutex;
use tracing::debug;

use aggregator_core::config::RateLimitConfig;

use crate::error::ApiError;
use crate::routes::AppState;

/// 固定窗口限流器，按客户端地址分别计数。
///
/// 窗口从客户端的首个请求开始计时，窗口内请求数达到上限后一律429，
/// 窗口过期即重新计数。过期窗口在每次检查时顺带回收，计数表的大小
/// 与窗口内活跃客户端数量同阶。
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, ClientWindow>>,
}

struct ClientWindow {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests,
            window: Duration::from_secs(config.window_secs),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// 为一次请求计数，超出窗口上限时返回false
    pub async fn try_acquire(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock().await;
        clients.retain(|_, window| now.duration_since(window.started) < self.window);

        let window = clients.entry(client.to_string()).or_insert(ClientWindow {
            started: now,
            count: 0,
        });
        if window.count >= self.max_requests {
            return false;
        }
        window.count += 1;
        true
    }
}

/// /api路由的限流中间件，未配置限流器时直接放行
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limiter) = &state.rate_limiter {
        let client = client_key(request.headers());
        if !limiter.try_acquire(&client).await {
            debug!(client, "request rejected by rate limiter");
            return ApiError::TooManyRequests.into_response();
        }
    }

    next.run(request).await
}

/// 取客户端标识：优先X-Forwarded-For首个地址，其次X-Real-IP；
/// 两者皆无（例如不经反向代理直连）时退化为单一全局计数
fn client_key(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty());

    forwarded
        .or(real_ip)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig {
            enabled: true,
            max_requests,
            window_secs,
        })
    }

    #[tokio::test]
    async fn test_limit_is_per_client() {
        let limiter = limiter(1, 60);
        assert!(limiter.try_acquire("10.0.0.1").await);
        assert!(!limiter.try_acquire("10.0.0.1").await);
        // 另一个客户端不受影响
        assert!(limiter.try_acquire("10.0.0.2").await);
    }

    #[tokio::test]
    async fn test_expired_window_resets_count() {
        let limiter = limiter(1, 0);
        // window_secs=0时每个窗口立即过期，等效于不限流
        assert!(limiter.try_acquire("10.0.0.1").await);
        assert!(limiter.try_acquire("10.0.0.1").await);
    }

    #[test]
    fn test_client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 172.16.0.1".parse().unwrap());
        headers.insert("x-real-ip", "10.0.0.9".parse().unwrap());
        assert_eq!(client_key(&headers), "10.0.0.1");

        headers.remove("x-forwarded-for");
        assert_eq!(client_key(&headers), "10.0.0.9");

        headers.remove("x-real-ip");
        assert_eq!(client_key(&headers), "unknown");
    }
}
