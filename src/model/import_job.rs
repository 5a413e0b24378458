use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 导入任务状态。`pending → processing → 终态`，终态不可再迁移。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ImportJobStatus {
    Pending,
    Processing,
    Completed,
    PartiallyCompleted,
    Failed(String),
}

impl ImportJobStatus {
    pub const PENDING: &'static str = "pending";
    pub const PROCESSING: &'static str = "processing";
    pub const COMPLETED: &'static str = "completed";
    pub const PARTIALLY_COMPLETED: &'static str = "partially_completed";
    pub const FAILED: &'static str = "failed";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => Self::PENDING,
            Self::Processing => Self::PROCESSING,
            Self::Completed => Self::COMPLETED,
            Self::PartiallyCompleted => Self::PARTIALLY_COMPLETED,
            Self::Failed(_) => Self::FAILED,
        }
    }

    pub fn from_parts(status: &str, error_message: Option<&str>) -> Option<Self> {
        match status {
            Self::PENDING => Some(Self::Pending),
            Self::PROCESSING => Some(Self::Processing),
            Self::COMPLETED => Some(Self::Completed),
            Self::PARTIALLY_COMPLETED => Some(Self::PartiallyCompleted),
            Self::FAILED => Some(Self::Failed(error_message.unwrap_or_default().to_string())),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartiallyCompleted | Self::Failed(_)
        )
    }

    /// 允许迁移到 `self` 的前驱状态
    pub fn allowed_predecessors(&self) -> &'static [&'static str] {
        match self {
            Self::Pending => &[],
            Self::Processing => &[Self::PENDING, Self::PROCESSING],
            _ => &[Self::PENDING, Self::PROCESSING],
        }
    }

    pub fn can_transition_from(&self, current: &ImportJobStatus) -> bool {
        self.allowed_predecessors().contains(&current.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: Uuid,
    pub city_code: String,
    pub status: ImportJobStatus,
    pub total_records: Option<i64>,
    pub processed_records: i64,
    pub failed_records: i64,
    pub last_processed_batch: i64,
    pub object_key: Option<String>,
    pub workflow_execution_ref: Option<String>,
    pub failed_record_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn error_message(&self) -> Option<&str> {
        match &self.status {
            ImportJobStatus::Failed(msg) => Some(msg.as_str()),
            _ => None,
        }
    }

    /// `(processed + failed) / total × 100`，总数未知或为 0 时为 None。
    pub fn progress_percent(&self) -> Option<f64> {
        match self.total_records {
            Some(total) if total > 0 => {
                Some((self.processed_records + self.failed_records) as f64 / total as f64 * 100.0)
            }
            _ => None,
        }
    }
}

/// 单批次写入后的进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportProgress {
    pub processed: i64,
    pub failed: i64,
    pub batch: i64,
}
