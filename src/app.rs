use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use aggregator_api::{create_routes, AppState};
use aggregator_core::{AppConfig, JobStore, StoreBackend};
use aggregator_infrastructure::{MemoryJobStore, SqliteJobStore};
use aggregator_worker::WorkerService;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行API服务器
    Api,
    /// 仅运行Worker
    Worker,
    /// 同进程运行API与Worker
    All,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn JobStore>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        // 内存后端的队列无法跨进程共享，只允许api+worker同进程运行
        if config.storage.backend == StoreBackend::Memory && mode != AppMode::All {
            anyhow::bail!("内存后端仅支持all模式，api/worker分进程部署请使用sqlite后端");
        }

        tokio::fs::create_dir_all(&config.storage.upload_dir)
            .await
            .with_context(|| {
                format!(
                    "创建上传目录失败: {}",
                    config.storage.upload_dir.display()
                )
            })?;
        tokio::fs::create_dir_all(&config.storage.results_dir)
            .await
            .with_context(|| {
                format!(
                    "创建结果目录失败: {}",
                    config.storage.results_dir.display()
                )
            })?;

        let store = create_job_store(&config).await?;

        Ok(Self {
            config,
            mode,
            store,
        })
    }

    /// 运行应用程序，直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::Worker => {
                let handles = self.spawn_workers(&shutdown_rx);
                drop(shutdown_rx);
                join_workers(handles).await;
                self.recover_leases().await;
                Ok(())
            }
            AppMode::All => {
                let handles = self.spawn_workers(&shutdown_rx);
                let result = self.run_api(shutdown_rx).await;
                join_workers(handles).await;
                self.recover_leases().await;
                result
            }
        }
    }

    /// Worker全部停止后回收未交付的任务租约。关闭信号可能正好打断
    /// 一次在途的出队，留下已出租却无人执行的任务；在这里清掉租约，
    /// 重启后它们会重新出队。
    async fn recover_leases(&self) {
        match self.store.recover_undelivered().await {
            Ok(0) => {}
            Ok(recovered) => info!("回收了{recovered}个未交付的任务租约"),
            Err(e) => error!("回收任务租约失败: {e}"),
        }
    }

    /// 启动HTTP服务，随关闭信号优雅退出
    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let state = AppState::with_rate_limit(
            Arc::clone(&self.store),
            self.config.storage.upload_dir.clone(),
            &self.config.server.rate_limit,
        );
        let app = create_routes(state);

        let listener = TcpListener::bind(&self.config.server.bind_address)
            .await
            .with_context(|| format!("绑定监听地址失败: {}", self.config.server.bind_address))?;
        info!("API服务器监听于 {}", self.config.server.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    /// 按配置数量启动Worker实例，各实例独立消费队列
    fn spawn_workers(&self, shutdown_rx: &broadcast::Receiver<()>) -> Vec<JoinHandle<()>> {
        (0..self.config.worker.count)
            .map(|i| {
                let worker = WorkerService::new(
                    format!("worker-{}", i + 1),
                    Arc::clone(&self.store),
                    self.config.storage.results_dir.clone(),
                    self.config.worker.invalid_rows,
                );
                let rx = shutdown_rx.resubscribe();
                tokio::spawn(async move { worker.run(rx).await })
            })
            .collect()
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker任务异常退出: {e}");
        }
    }
}

/// 按配置创建任务存储后端
async fn create_job_store(config: &AppConfig) -> Result<Arc<dyn JobStore>> {
    match config.storage.backend {
        StoreBackend::Memory => {
            info!("使用内存任务存储");
            Ok(Arc::new(MemoryJobStore::new()))
        }
        StoreBackend::Sqlite => {
            info!("使用SQLite任务存储: {}", config.storage.database_url);
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect(&config.storage.database_url)
                .await
                .with_context(|| {
                    format!("连接数据库失败: {}", config.storage.database_url)
                })?;
            let store = SqliteJobStore::new(
                pool,
                Duration::from_millis(config.worker.poll_interval_ms),
            )
            .await
            .context("初始化SQLite任务存储失败")?;
            Ok(Arc::new(store))
        }
    }
}
