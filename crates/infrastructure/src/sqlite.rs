use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use aggregator_core::errors::{AggregatorError, AggregatorResult};
use aggregator_core::models::{Job, JobMetrics, JobOutput, JobState};
use aggregator_core::traits::JobStore;

const JOB_COLUMNS: &str = "id, input_path, state, created_at, started_at, completed_at, \
                           output_path, processing_time_ms, department_count, error_message, \
                           input_cleaned";

/// SQLite持久化任务存储。
///
/// seq自增列即FIFO提交顺序；出队是单条原子的UPDATE … RETURNING租约，
/// 多个Worker进程共享同一个数据库文件时也不会重复交付。队列为空时
/// 按poll_interval轮询。
///
/// 出队future在UPDATE在途时被取消（Worker关闭）会留下leased=1但
/// 从未交付的行；关闭流程在消费者全部停止后调用recover_undelivered
/// 清除这些租约，重启后任务照常出队。
pub struct SqliteJobStore {
    pool: SqlitePool,
    poll_interval: Duration,
}

impl SqliteJobStore {
    pub async fn new(pool: SqlitePool, poll_interval: Duration) -> AggregatorResult<Self> {
        let store = Self {
            pool,
            poll_interval,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> AggregatorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                input_path TEXT NOT NULL,
                state TEXT NOT NULL,
                created_at TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                output_path TEXT,
                processing_time_ms INTEGER,
                department_count INTEGER,
                error_message TEXT,
                input_cleaned INTEGER NOT NULL DEFAULT 0,
                leased INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_dequeue ON jobs (state, leased, seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> AggregatorResult<Job> {
        let input_path: String = row.try_get("input_path")?;
        let output_path: Option<String> = row.try_get("output_path")?;
        let processing_time_ms: Option<i64> = row.try_get("processing_time_ms")?;
        let department_count: Option<i64> = row.try_get("department_count")?;

        let output = match (output_path, processing_time_ms, department_count) {
            (Some(path), Some(processing_time_ms), Some(department_count)) => Some(JobOutput {
                output_path: PathBuf::from(path),
                metrics: JobMetrics {
                    processing_time_ms,
                    department_count,
                },
            }),
            _ => None,
        };

        Ok(Job {
            id: row.try_get("id")?,
            input_path: PathBuf::from(input_path),
            state: row.try_get("state")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            output,
            error_message: row.try_get("error_message")?,
            input_cleaned: row.try_get::<i64, _>("input_cleaned")? != 0,
        })
    }

    /// 条件转换：仅当任务处于expected状态时应用update子句。
    /// 0行命中时区分"任务不存在"与"非法转换"。
    async fn guarded_transition<'a>(
        &self,
        job_id: &str,
        expected: JobState,
        to: JobState,
        query: sqlx::query::Query<'a, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'a>>,
    ) -> AggregatorResult<()> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 1 {
            return Ok(());
        }

        let job = self
            .get_job(job_id)
            .await?
            .ok_or_else(|| AggregatorError::JobNotFound {
                id: job_id.to_string(),
            })?;
        debug_assert_ne!(job.state, expected);
        Err(AggregatorError::InvalidTransition {
            id: job_id.to_string(),
            from: job.state,
            to,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, input_path: &Path) -> AggregatorResult<Job> {
        // 提交时fail-fast：输入不可读则任务不创建
        tokio::fs::File::open(input_path).await.map_err(|e| {
            AggregatorError::InvalidInput(format!(
                "cannot open input file {}: {e}",
                input_path.display()
            ))
        })?;

        let job = Job::new(input_path.to_path_buf());

        sqlx::query(
            "INSERT INTO jobs (id, input_path, state, created_at, input_cleaned, leased) \
             VALUES ($1, $2, $3, $4, 0, 0)",
        )
        .bind(&job.id)
        .bind(job.input_path.to_string_lossy().into_owned())
        .bind(job.state)
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, "job enqueued");
        Ok(job)
    }

    async fn dequeue(&self) -> AggregatorResult<Job> {
        loop {
            let row = sqlx::query(&format!(
                "UPDATE jobs SET leased = 1 \
                 WHERE seq = (SELECT seq FROM jobs WHERE state = 'QUEUED' AND leased = 0 \
                              ORDER BY seq LIMIT 1) \
                 RETURNING {JOB_COLUMNS}"
            ))
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = row {
                return Self::row_to_job(&row);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn get_job(&self, job_id: &str) -> AggregatorResult<Option<Job>> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_active(&self, job_id: &str) -> AggregatorResult<()> {
        let query =
            sqlx::query("UPDATE jobs SET state = 'ACTIVE', started_at = $2 WHERE id = $1 AND state = 'QUEUED'")
                .bind(job_id.to_string())
                .bind(Utc::now());
        self.guarded_transition(job_id, JobState::Queued, JobState::Active, query)
            .await
    }

    async fn mark_completed(&self, job_id: &str, output: JobOutput) -> AggregatorResult<()> {
        let query = sqlx::query(
            "UPDATE jobs SET state = 'COMPLETED', completed_at = $2, output_path = $3, \
             processing_time_ms = $4, department_count = $5 \
             WHERE id = $1 AND state = 'ACTIVE'",
        )
        .bind(job_id.to_string())
        .bind(Utc::now())
        .bind(output.output_path.to_string_lossy().into_owned())
        .bind(output.metrics.processing_time_ms)
        .bind(output.metrics.department_count);
        self.guarded_transition(job_id, JobState::Active, JobState::Completed, query)
            .await
    }

    async fn mark_failed(&self, job_id: &str, error: String) -> AggregatorResult<()> {
        let query = sqlx::query(
            "UPDATE jobs SET state = 'FAILED', completed_at = $2, error_message = $3 \
             WHERE id = $1 AND state = 'ACTIVE'",
        )
        .bind(job_id.to_string())
        .bind(Utc::now())
        .bind(error);
        self.guarded_transition(job_id, JobState::Active, JobState::Failed, query)
            .await
    }

    async fn claim_input_cleanup(&self, job_id: &str) -> AggregatorResult<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET input_cleaned = 1 \
             WHERE id = $1 AND state = 'COMPLETED' AND input_cleaned = 0",
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // 区分"已清理/未完成"与"任务不存在"
        if self.get_job(job_id).await?.is_none() {
            return Err(AggregatorError::JobNotFound {
                id: job_id.to_string(),
            });
        }
        Ok(false)
    }

    async fn recover_undelivered(&self) -> AggregatorResult<u32> {
        // 仍处于QUEUED的租约必然未开始执行，清除后重新可出队
        let result = sqlx::query("UPDATE jobs SET leased = 0 WHERE state = 'QUEUED' AND leased = 1")
            .execute(&self.pool)
            .await?;

        let recovered = result.rows_affected() as u32;
        if recovered > 0 {
            debug!(recovered, "released undelivered job leases");
        }
        Ok(recovered)
    }

    async fn queue_depth(&self) -> AggregatorResult<u32> {
        let row =
            sqlx::query("SELECT COUNT(*) AS depth FROM jobs WHERE state = 'QUEUED' AND leased = 0")
                .fetch_one(&self.pool)
                .await?;
        let depth: i64 = row.try_get("depth")?;
        Ok(depth as u32)
    }
}
