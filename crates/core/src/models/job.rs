use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 一次提交的聚合任务及其生命周期状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub input_path: PathBuf,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<JobOutput>,
    pub error_message: Option<String>,
    /// 输入文件是否已被清理（完成后由状态解析器删除，恰好一次）
    pub input_cleaned: bool,
}

/// 任务完成后的产物：输出文件位置与聚合指标
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub output_path: PathBuf,
    pub metrics: JobMetrics,
}

/// 聚合指标
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobMetrics {
    /// 聚合耗时（毫秒，从打开输入流到输出写完）
    pub processing_time_ms: i64,
    /// 至少有一条有效记录的部门数量
    pub department_count: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobState {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobState {
    /// 状态转换是单向单调的：QUEUED → ACTIVE → {COMPLETED | FAILED}
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }

    /// 终态任务不再接受任何转换
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Active => "ACTIVE",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(JobState::Queued),
            "ACTIVE" => Ok(JobState::Active),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<JobState>().map_err(Into::into)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

impl Job {
    /// 创建一个新的QUEUED任务，id由系统生成（UUID v4），不接受调用方自带id
    pub fn new(input_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            input_path,
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            error_message: None,
            input_cleaned: false,
        }
    }
}
