use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

use aggregator_core::config::InvalidRowPolicy;
use aggregator_core::errors::{AggregatorError, AggregatorResult};
use aggregator_core::models::{Job, JobOutput};
use aggregator_core::traits::JobStore;

use crate::aggregate::aggregate_file;

/// Worker服务：单消费者循环，出队→执行聚合→回写结果。
///
/// 单个任务的失败被记入任务记录后循环继续处理下一个任务；多个实例
/// 并行运行时互不协调，独占性完全由存储的出队契约保证。
pub struct WorkerService {
    worker_id: String,
    store: Arc<dyn JobStore>,
    results_dir: PathBuf,
    invalid_rows: InvalidRowPolicy,
}

impl WorkerService {
    pub fn new(
        worker_id: String,
        store: Arc<dyn JobStore>,
        results_dir: PathBuf,
        invalid_rows: InvalidRowPolicy,
    ) -> Self {
        Self {
            worker_id,
            store,
            results_dir,
            invalid_rows,
        }
    }

    /// 运行消费循环，直到收到关闭信号。只在出队等待点响应关闭，
    /// 已经开始的任务会执行完毕。关闭可能取消一次在途的出队；
    /// 持久化后端因此留下的未交付租约由应用在全部Worker停止后
    /// 通过JobStore::recover_undelivered统一回收。
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.worker_id, "worker started");

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker_id = %self.worker_id, "worker shutting down");
                    break;
                }
                dequeued = self.store.dequeue() => {
                    match dequeued {
                        Ok(job) => self.process_job(job).await,
                        Err(e) => {
                            error!(worker_id = %self.worker_id, "dequeue failed: {e}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }
    }

    /// 处理单个任务。此方法不向外传播错误——任何失败要么记入任务
    /// 记录，要么记日志后放弃该任务，循环照常继续。
    async fn process_job(&self, job: Job) {
        let job_id = job.id.clone();
        info!(worker_id = %self.worker_id, job_id, "processing job");

        if let Err(e) = self.store.mark_active(&job_id).await {
            // 通常意味着任务已被置为终态，跳过而不是中断循环
            warn!(job_id, "cannot mark job active, skipping: {e}");
            return;
        }

        match self.run_aggregation(&job).await {
            Ok(output) => {
                let metrics = output.metrics;
                if let Err(e) = self.store.mark_completed(&job_id, output).await {
                    error!(job_id, "failed to record job completion: {e}");
                    return;
                }
                info!(
                    job_id,
                    processing_time_ms = metrics.processing_time_ms,
                    department_count = metrics.department_count,
                    "job completed"
                );
            }
            Err(e) => {
                let description = e.to_string();
                warn!(job_id, "job failed: {description}");
                if let Err(e) = self.store.mark_failed(&job_id, description).await {
                    error!(job_id, "failed to record job failure: {e}");
                }
            }
        }
    }

    /// 在阻塞线程池上执行CSV聚合，输出文件名由任务id派生，
    /// 并发任务之间不会冲突。
    async fn run_aggregation(&self, job: &Job) -> AggregatorResult<JobOutput> {
        let input_path = job.input_path.clone();
        let output_path = self.results_dir.join(format!("{}_output.csv", job.id));
        let policy = self.invalid_rows;

        let metrics = {
            let output_path = output_path.clone();
            tokio::task::spawn_blocking(move || {
                aggregate_file(&input_path, &output_path, policy)
            })
            .await
            .map_err(|e| AggregatorError::Internal(format!("aggregation task panicked: {e}")))??
        };

        Ok(JobOutput {
            output_path,
            metrics,
        })
    }
}
