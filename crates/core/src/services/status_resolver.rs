use std::sync::Arc;

use tracing::{debug, warn};

use crate::errors::{AggregatorError, AggregatorResult};
use crate::models::{JobMetrics, JobState};
use crate::traits::JobStore;

/// 对外呈现的任务状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedStatus {
    /// 排队中或执行中，也包括存储已完成但输出文件尚未落盘可见的窗口期
    Processing,
    Completed {
        output_path: std::path::PathBuf,
        metrics: JobMetrics,
    },
    Failed {
        error: String,
    },
}

/// 状态解析器：把存储中的任务状态与文件系统证据对账后再上报。
///
/// 存储说完成不算完成——只有输出文件真实可读才报告completed，
/// 避免存储更新与文件落盘未严格定序时出现的竞态窗口。
pub struct StatusResolver {
    store: Arc<dyn JobStore>,
}

impl StatusResolver {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// 解析任务状态。未知id返回JobNotFound错误（客户端错误，不是处理状态）。
    pub async fn resolve(&self, job_id: &str) -> AggregatorResult<ResolvedStatus> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| AggregatorError::JobNotFound {
                id: job_id.to_string(),
            })?;

        match job.state {
            JobState::Queued | JobState::Active => Ok(ResolvedStatus::Processing),
            JobState::Failed => Ok(ResolvedStatus::Failed {
                error: job
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string()),
            }),
            JobState::Completed => {
                let output = job.output.ok_or_else(|| {
                    AggregatorError::Internal(format!(
                        "completed job {job_id} has no recorded output"
                    ))
                })?;

                // 必须确认输出文件物理存在且可读，否则按仍在处理上报
                match tokio::fs::metadata(&output.output_path).await {
                    Ok(meta) if meta.is_file() => {}
                    _ => {
                        debug!(
                            job_id,
                            output_path = %output.output_path.display(),
                            "store says completed but output file not yet visible"
                        );
                        return Ok(ResolvedStatus::Processing);
                    }
                }

                self.cleanup_input(job_id, &job.input_path).await;

                Ok(ResolvedStatus::Completed {
                    output_path: output.output_path,
                    metrics: output.metrics,
                })
            }
        }
    }

    /// 首次确认完成时删除原始输入文件，恰好一次；删除失败只记日志，
    /// 绝不改变上报的状态。
    async fn cleanup_input(&self, job_id: &str, input_path: &std::path::Path) {
        match self.store.claim_input_cleanup(job_id).await {
            Ok(true) => {
                if let Err(e) = tokio::fs::remove_file(input_path).await {
                    warn!(
                        job_id,
                        input_path = %input_path.display(),
                        "Failed to delete input file after completion: {e}"
                    );
                }
            }
            Ok(false) => {}
            Err(e) => {
                warn!(job_id, "Failed to claim input cleanup: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;
    use crate::models::{Job, JobOutput};

    /// 测试用的最小JobStore实现
    struct FakeJobStore {
        jobs: Mutex<HashMap<String, Job>>,
    }

    impl FakeJobStore {
        fn new() -> Self {
            Self {
                jobs: Mutex::new(HashMap::new()),
            }
        }

        async fn insert(&self, job: Job) {
            self.jobs.lock().await.insert(job.id.clone(), job);
        }
    }

    #[async_trait]
    impl JobStore for FakeJobStore {
        async fn enqueue(&self, input_path: &Path) -> AggregatorResult<Job> {
            let job = Job::new(input_path.to_path_buf());
            self.insert(job.clone()).await;
            Ok(job)
        }

        async fn dequeue(&self) -> AggregatorResult<Job> {
            unimplemented!("not used by resolver tests")
        }

        async fn get_job(&self, job_id: &str) -> AggregatorResult<Option<Job>> {
            Ok(self.jobs.lock().await.get(job_id).cloned())
        }

        async fn mark_active(&self, _job_id: &str) -> AggregatorResult<()> {
            Ok(())
        }

        async fn mark_completed(&self, _job_id: &str, _output: JobOutput) -> AggregatorResult<()> {
            Ok(())
        }

        async fn mark_failed(&self, _job_id: &str, _error: String) -> AggregatorResult<()> {
            Ok(())
        }

        async fn claim_input_cleanup(&self, job_id: &str) -> AggregatorResult<bool> {
            let mut jobs = self.jobs.lock().await;
            match jobs.get_mut(job_id) {
                Some(job) if !job.input_cleaned => {
                    job.input_cleaned = true;
                    Ok(true)
                }
                Some(_) => Ok(false),
                None => Err(AggregatorError::JobNotFound {
                    id: job_id.to_string(),
                }),
            }
        }

        async fn recover_undelivered(&self) -> AggregatorResult<u32> {
            Ok(0)
        }

        async fn queue_depth(&self) -> AggregatorResult<u32> {
            Ok(0)
        }
    }

    fn completed_job(input: PathBuf, output: PathBuf) -> Job {
        let mut job = Job::new(input);
        job.state = JobState::Completed;
        job.output = Some(JobOutput {
            output_path: output,
            metrics: JobMetrics {
                processing_time_ms: 12,
                department_count: 2,
            },
        });
        job
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store);

        let err = resolver.resolve("no-such-job").await.unwrap_err();
        assert!(matches!(err, AggregatorError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn test_queued_and_active_report_processing() {
        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store.clone());

        let queued = Job::new(PathBuf::from("/tmp/in.csv"));
        let queued_id = queued.id.clone();
        store.insert(queued).await;

        let mut active = Job::new(PathBuf::from("/tmp/in.csv"));
        active.state = JobState::Active;
        let active_id = active.id.clone();
        store.insert(active).await;

        assert_eq!(
            resolver.resolve(&queued_id).await.unwrap(),
            ResolvedStatus::Processing
        );
        assert_eq!(
            resolver.resolve(&active_id).await.unwrap(),
            ResolvedStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_failed_reports_recorded_error() {
        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store.clone());

        let mut job = Job::new(PathBuf::from("/tmp/in.csv"));
        job.state = JobState::Failed;
        job.error_message = Some("could not open input".to_string());
        let id = job.id.clone();
        store.insert(job).await;

        match resolver.resolve(&id).await.unwrap() {
            ResolvedStatus::Failed { error } => assert_eq!(error, "could not open input"),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_completed_without_artifact_reports_processing() {
        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store.clone());

        let job = completed_job(
            PathBuf::from("/tmp/in.csv"),
            PathBuf::from("/nonexistent/results/out.csv"),
        );
        let id = job.id.clone();
        store.insert(job).await;

        assert_eq!(
            resolver.resolve(&id).await.unwrap(),
            ResolvedStatus::Processing
        );
        // 未确认完成，不得清理输入
        assert!(!store.jobs.lock().await.get(&id).unwrap().input_cleaned);
    }

    #[tokio::test]
    async fn test_confirmed_completion_cleans_input_once() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.csv");
        let output = dir.path().join("output.csv");
        std::fs::write(&input, "Department Name,Date,Number of Sales\n").unwrap();
        std::fs::write(&output, "Department Name,Total Number of Sales\n").unwrap();

        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store.clone());

        let job = completed_job(input.clone(), output.clone());
        let id = job.id.clone();
        store.insert(job).await;

        match resolver.resolve(&id).await.unwrap() {
            ResolvedStatus::Completed {
                output_path,
                metrics,
            } => {
                assert_eq!(output_path, output);
                assert_eq!(metrics.department_count, 2);
            }
            other => panic!("unexpected status: {other:?}"),
        }

        // 首次确认完成后输入文件被删除
        assert!(!input.exists());

        // 再次轮询仍然是completed，且不会因输入已删除而降级
        assert!(matches!(
            resolver.resolve(&id).await.unwrap(),
            ResolvedStatus::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_downgrade_status() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("output.csv");
        std::fs::write(&output, "Department Name,Total Number of Sales\n").unwrap();

        let store = Arc::new(FakeJobStore::new());
        let resolver = StatusResolver::new(store.clone());

        // 输入文件根本不存在，删除必然失败
        let job = completed_job(PathBuf::from("/nonexistent/in.csv"), output);
        let id = job.id.clone();
        store.insert(job).await;

        assert!(matches!(
            resolver.resolve(&id).await.unwrap(),
            ResolvedStatus::Completed { .. }
        ));
    }
}
