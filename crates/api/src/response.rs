use serde::{Deserialize, Serialize};

use aggregator_core::models::JobMetrics;

/// 提交响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(rename = "jobId")]
    pub job_id: String,
}

/// 轮询响应，字段名与原有接口保持一致（camelCase）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusResponse {
    Processing,
    Completed {
        #[serde(rename = "downloadLink")]
        download_link: String,
        metrics: MetricsPayload,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsPayload {
    #[serde(rename = "processingTime")]
    pub processing_time: i64,
    #[serde(rename = "departmentCount")]
    pub department_count: i64,
}

impl From<JobMetrics> for MetricsPayload {
    fn from(metrics: JobMetrics) -> Self {
        Self {
            processing_time: metrics.processing_time_ms,
            department_count: metrics.department_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let processing = serde_json::to_value(StatusResponse::Processing).unwrap();
        assert_eq!(processing, serde_json::json!({ "status": "processing" }));

        let completed = serde_json::to_value(StatusResponse::Completed {
            download_link: "/api/download/abc".to_string(),
            metrics: MetricsPayload {
                processing_time: 42,
                department_count: 3,
            },
        })
        .unwrap();
        assert_eq!(
            completed,
            serde_json::json!({
                "status": "completed",
                "downloadLink": "/api/download/abc",
                "metrics": { "processingTime": 42, "departmentCount": 3 },
            })
        );

        let failed = serde_json::to_value(StatusResponse::Failed {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(
            failed,
            serde_json::json!({ "status": "failed", "error": "boom" })
        );
    }
}
