use crate::cluster::ClusterError;
use crate::geo;
use crate::model::EnqueueOutcome;
use crate::storage::repository::ClusterJobRepository;
use crate::storage::StorageError;
use log::{debug, info};
use std::sync::Arc;

/// 手动触发（`POST /clusters/recalculate`）
pub const MANUAL_PRIORITY: i32 = 10;
/// 导入完成后自动触发
pub const IMPORT_PRIORITY: i32 = 0;

/// 聚合任务的入队端。服务端点与导入流水线共用。
#[derive(Clone)]
pub struct ClusterJobQueue {
    jobs: Arc<dyn ClusterJobRepository>,
}

impl ClusterJobQueue {
    pub fn new(jobs: Arc<dyn ClusterJobRepository>) -> Self {
        Self { jobs }
    }

    /// 全量重算。已有 pending/processing 任务时不入队。
    ///
    /// 检查与插入不在同一事务里，并发调用可能各插入一条；
    /// worker 的批内合并会吸收这种重复。
    pub async fn enqueue(&self, priority: i32) -> Result<EnqueueOutcome, StorageError> {
        if self.jobs.has_pending_or_processing_job().await? {
            debug!("已有进行中的聚合任务，跳过入队 (priority={})", priority);
            return Ok(EnqueueOutcome::skipped());
        }
        let job = self.jobs.create(priority).await?;
        info!("➕ 聚合任务已入队 [{}] priority={}", job.id, priority);
        Ok(EnqueueOutcome::created(job.id))
    }

    /// 差量重算指定单元。单元集合各不相同，所以不做去重；空集合退化为全量入队。
    pub async fn enqueue_cells(
        &self,
        priority: i32,
        cells: Vec<String>,
    ) -> Result<EnqueueOutcome, ClusterError> {
        if cells.is_empty() {
            return Ok(self.enqueue(priority).await?);
        }
        if let Some(bad) = cells.iter().find(|c| !geo::is_valid_cell(c)) {
            return Err(ClusterError::InvalidCell(bad.clone()));
        }
        let mut cells = cells;
        cells.sort();
        cells.dedup();
        let count = cells.len();
        let job = self.jobs.create_with_affected_cells(priority, cells).await?;
        info!(
            "➕ 差量聚合任务已入队 [{}] cells={} priority={}",
            job.id, count, priority
        );
        Ok(EnqueueOutcome::created(job.id))
    }
}
