use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "message", rename_all = "snake_case")]
pub enum ClusterJobStatus {
    Pending,
    Processing,
    Completed,
    Failed(String),
}

impl ClusterJobStatus {
    pub const PENDING: &'static str = "pending";
    pub const PROCESSING: &'static str = "processing";
    pub const COMPLETED: &'static str = "completed";
    pub const FAILED: &'static str = "failed";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => Self::PENDING,
            Self::Processing => Self::PROCESSING,
            Self::Completed => Self::COMPLETED,
            Self::Failed(_) => Self::FAILED,
        }
    }

    /// 从存储列还原；未知状态返回 None。
    pub fn from_parts(status: &str, error_message: Option<&str>) -> Option<Self> {
        match status {
            Self::PENDING => Some(Self::Pending),
            Self::PROCESSING => Some(Self::Processing),
            Self::COMPLETED => Some(Self::Completed),
            Self::FAILED => Some(Self::Failed(error_message.unwrap_or_default().to_string())),
            _ => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterJob {
    pub id: Uuid,
    pub status: ClusterJobStatus,
    pub priority: i32,
    /// 为空表示全量重算
    pub affected_h3_cells: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClusterJob {
    pub fn is_full_recompute(&self) -> bool {
        self.affected_h3_cells.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueOutcome {
    pub enqueued: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
}

impl EnqueueOutcome {
    pub fn skipped() -> Self {
        Self {
            enqueued: false,
            job_id: None,
        }
    }

    pub fn created(job_id: Uuid) -> Self {
        Self {
            enqueued: true,
            job_id: Some(job_id),
        }
    }
}
