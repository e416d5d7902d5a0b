use std::collections::{HashMap, VecDeque};
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::debug;

use aggregator_core::errors::{AggregatorError, AggregatorResult};
use aggregator_core::models::{Job, JobOutput, JobState};
use aggregator_core::traits::JobStore;

/// 进程内任务存储。
///
/// jobs持有权威任务记录；queue保存排队中任务在入队时刻的快照，
/// QUEUED任务在被交付前不会发生状态转换，快照即现状。出队在单个
/// 临界区内完成弹出与交付，中间没有暂停点，出队future被取消
/// （例如Worker关闭时的select分支）也不会弄丢任务。仅适用于api
/// 与worker同进程部署。
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// 校验转换合法性并应用修改
    async fn transition(
        &self,
        job_id: &str,
        to: JobState,
        apply: impl FnOnce(&mut Job),
    ) -> AggregatorResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AggregatorError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if !job.state.can_transition_to(to) {
            return Err(AggregatorError::InvalidTransition {
                id: job_id.to_string(),
                from: job.state,
                to,
            });
        }

        job.state = to;
        apply(job);
        Ok(())
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, input_path: &Path) -> AggregatorResult<Job> {
        // 提交时fail-fast：输入不可读则任务不创建
        tokio::fs::File::open(input_path).await.map_err(|e| {
            AggregatorError::InvalidInput(format!(
                "cannot open input file {}: {e}",
                input_path.display()
            ))
        })?;

        let job = Job::new(input_path.to_path_buf());

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job.id.clone(), job.clone());
        }
        {
            let mut queue = self.queue.lock().await;
            queue.push_back(job.clone());
        }
        self.notify.notify_one();

        debug!(job_id = %job.id, "job enqueued");
        Ok(job)
    }

    async fn dequeue(&self) -> AggregatorResult<Job> {
        loop {
            // 先注册唤醒再检查队列，避免丢失入队通知
            let notified = self.notify.notified();

            // 弹出即返回，弹出之后没有暂停点，取消不会吞掉任务
            if let Some(job) = self.queue.lock().await.pop_front() {
                return Ok(job);
            }

            notified.await;
        }
    }

    async fn get_job(&self, job_id: &str) -> AggregatorResult<Option<Job>> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn mark_active(&self, job_id: &str) -> AggregatorResult<()> {
        self.transition(job_id, JobState::Active, |job| {
            job.started_at = Some(Utc::now());
        })
        .await
    }

    async fn mark_completed(&self, job_id: &str, output: JobOutput) -> AggregatorResult<()> {
        self.transition(job_id, JobState::Completed, |job| {
            job.completed_at = Some(Utc::now());
            job.output = Some(output);
        })
        .await
    }

    async fn mark_failed(&self, job_id: &str, error: String) -> AggregatorResult<()> {
        self.transition(job_id, JobState::Failed, |job| {
            job.completed_at = Some(Utc::now());
            job.error_message = Some(error);
        })
        .await
    }

    async fn claim_input_cleanup(&self, job_id: &str) -> AggregatorResult<bool> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| AggregatorError::JobNotFound {
                id: job_id.to_string(),
            })?;

        if job.state != JobState::Completed || job.input_cleaned {
            return Ok(false);
        }
        job.input_cleaned = true;
        Ok(true)
    }

    async fn recover_undelivered(&self) -> AggregatorResult<u32> {
        // 出队的弹出与交付在同一个临界区内完成，不存在未交付的租约
        Ok(0)
    }

    async fn queue_depth(&self) -> AggregatorResult<u32> {
        Ok(self.queue.lock().await.len() as u32)
    }
}
