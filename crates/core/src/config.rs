use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{AggregatorError, AggregatorResult};

/// 应用配置：默认值 ← TOML配置文件 ← AGGREGATOR__前缀环境变量
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP监听地址
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// /api路由的请求频率限制
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// 固定窗口限流：每个客户端在window_secs内最多max_requests次请求，
/// 超出返回429。只作用于/api路由，/health不受限制。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub window_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 上传文件存放目录
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// 聚合结果输出目录
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    /// 任务存储后端
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite后端的数据库地址
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// 进程内存储，仅支持api+worker同进程运行
    #[default]
    Memory,
    /// SQLite持久化存储，允许api与worker分进程共享
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker实例数量
    #[serde(default = "default_worker_count")]
    pub count: u32,
    /// 队列为空时的轮询间隔（仅SQLite后端使用）
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// 无效行处理策略
    #[serde(default)]
    pub invalid_rows: InvalidRowPolicy,
}

/// 无效行（部门名为空或销量无法解析为整数）的处理策略。
///
/// 默认skip：静默丢弃该行，不影响后续行——这是有意的、可测试的
/// 容错契约。fail则将同样的行视为流级致命错误。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvalidRowPolicy {
    #[default]
    Skip,
    Fail,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_rate_limit_max_requests() -> u32 {
    100
}

fn default_rate_limit_window_secs() -> u64 {
    // 15分钟
    900
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_database_url() -> String {
    "sqlite://aggregator.db?mode=rwc".to_string()
}

fn default_worker_count() -> u32 {
    1
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            max_requests: default_rate_limit_max_requests(),
            window_secs: default_rate_limit_window_secs(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            results_dir: default_results_dir(),
            backend: StoreBackend::default(),
            database_url: default_database_url(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval_ms(),
            invalid_rows: InvalidRowPolicy::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    /// 加载配置：配置文件可选，环境变量形如 AGGREGATOR__WORKER__COUNT=4
    pub fn load(config_path: Option<&str>) -> AggregatorResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AGGREGATOR")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| AggregatorError::Configuration(e.to_string()))?
            .try_deserialize()
            .map_err(|e| AggregatorError::Configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AggregatorResult<()> {
        if self.server.bind_address.is_empty() {
            return Err(AggregatorError::Configuration(
                "server.bind_address 不能为空".to_string(),
            ));
        }
        if self.server.rate_limit.enabled {
            if self.server.rate_limit.max_requests == 0 {
                return Err(AggregatorError::Configuration(
                    "server.rate_limit.max_requests 必须大于0".to_string(),
                ));
            }
            if self.server.rate_limit.window_secs == 0 {
                return Err(AggregatorError::Configuration(
                    "server.rate_limit.window_secs 必须大于0".to_string(),
                ));
            }
        }
        if self.worker.count == 0 {
            return Err(AggregatorError::Configuration(
                "worker.count 必须大于0".to_string(),
            ));
        }
        if self.worker.poll_interval_ms == 0 {
            return Err(AggregatorError::Configuration(
                "worker.poll_interval_ms 必须大于0".to_string(),
            ));
        }
        if self.storage.backend == StoreBackend::Sqlite && self.storage.database_url.is_empty() {
            return Err(AggregatorError::Configuration(
                "sqlite后端需要配置 storage.database_url".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StoreBackend::Memory);
        assert_eq!(config.worker.invalid_rows, InvalidRowPolicy::Skip);
        assert_eq!(config.worker.count, 1);
    }

    #[test]
    fn test_default_rate_limit_matches_service_policy() {
        let config = AppConfig::default();
        assert!(config.server.rate_limit.enabled);
        assert_eq!(config.server.rate_limit.max_requests, 100);
        assert_eq!(config.server.rate_limit.window_secs, 900);
    }

    #[test]
    fn test_enabled_rate_limit_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.server.rate_limit.max_requests = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.rate_limit.window_secs = 0;
        assert!(config.validate().is_err());

        // 关闭限流后数值不再校验
        let mut config = AppConfig::default();
        config.server.rate_limit.enabled = false;
        config.server.rate_limit.max_requests = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.worker.count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sqlite_backend_requires_database_url() {
        let mut config = AppConfig::default();
        config.storage.backend = StoreBackend::Sqlite;
        config.storage.database_url = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aggregator.toml");
        std::fs::write(
            &path,
            r#"
[server]
bind_address = "0.0.0.0:9000"

[storage]
backend = "sqlite"
database_url = "sqlite://test.db?mode=rwc"

[worker]
count = 3
invalid_rows = "fail"
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.storage.backend, StoreBackend::Sqlite);
        assert_eq!(config.worker.count, 3);
        assert_eq!(config.worker.invalid_rows, InvalidRowPolicy::Fail);
        // 未指定的段落保持默认
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load(Some("/nonexistent/aggregator.toml")).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:8080");
    }
}
