//! 仓储契约。核心逻辑只依赖这些 trait；`SeaOrm*` 为关系库实现，
//! `crate::testing` 中有对应的内存实现。

pub mod cluster_job_repo;
pub mod cluster_repo;
pub mod field_repo;
pub mod import_job_repo;

pub use cluster_job_repo::{SeaOrmClusterJobRepository, SeaOrmClusterJobTransaction};
pub use cluster_repo::SeaOrmClusterRepository;
pub use field_repo::SeaOrmFieldRepository;
pub use import_job_repo::SeaOrmImportJobRepository;

use crate::geo::ClusterResolution;
use crate::model::{
    Cluster, ClusterJob, Field, FieldFilter, FieldInput, FieldPage, H3Count, ImportJob,
    ImportJobStatus, ImportProgress,
};
use crate::storage::StorageError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait FieldRepository: Send + Sync {
    /// 单事务写入整批：土壤主数据 → 地块行 → 地籍子记录。任一步失败整批回滚。
    async fn upsert_batch(&self, inputs: &[FieldInput]) -> Result<usize, StorageError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Field>, StorageError>;
    async fn list(&self, filter: &FieldFilter) -> Result<FieldPage, StorageError>;
}

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn get_clusters(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<Cluster>, StorageError>;
    /// 按 `(resolution, h3_index)` 幂等写入
    async fn save_clusters(&self, clusters: &[Cluster]) -> Result<(), StorageError>;
    /// 写入 `clusters` 并删除该分辨率下本次未出现的行，同一事务内完成。
    async fn replace_clusters(
        &self,
        resolution: ClusterResolution,
        clusters: &[Cluster],
    ) -> Result<(), StorageError>;
    async fn delete_clusters_by_resolution(
        &self,
        resolution: ClusterResolution,
    ) -> Result<u64, StorageError>;
    async fn delete_all_clusters(&self) -> Result<u64, StorageError>;
    async fn aggregate_by_h3(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<H3Count>, StorageError>;
    async fn aggregate_by_h3_for_cells(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<H3Count>, StorageError>;
    /// `source` 分辨率索引落在 `cells` 内的地块在 `resolution` 上的索引，去重。
    /// 各分辨率索引都由质心直接算出，不能假设粗单元就是细单元的祖先。
    async fn cells_for_fields(
        &self,
        resolution: ClusterResolution,
        source: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<String>, StorageError>;
    async fn delete_clusters_by_h3_indexes(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<u64, StorageError>;
}

/// 出队事务。`find_pending_jobs` 持有的行锁直到 `commit`/`rollback` 才释放，
/// 因此调用方必须在同一事务里完成 `update_to_processing`。
#[async_trait]
pub trait ClusterJobTransaction: Send {
    /// `status = 'pending'`，按 `(priority DESC, created_at ASC)`，
    /// `FOR UPDATE SKIP LOCKED`。返回的任务带有各自的 affected cells（可能为空）。
    async fn find_pending_jobs(&mut self, limit: u64) -> Result<Vec<ClusterJob>, StorageError>;
    async fn update_to_processing(&mut self, id: Uuid) -> Result<(), StorageError>;
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

#[async_trait]
pub trait ClusterJobRepository: Send + Sync {
    async fn create(&self, priority: i32) -> Result<ClusterJob, StorageError>;
    async fn create_with_affected_cells(
        &self,
        priority: i32,
        cells: Vec<String>,
    ) -> Result<ClusterJob, StorageError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClusterJob>, StorageError>;
    async fn begin(&self) -> Result<Box<dyn ClusterJobTransaction>, StorageError>;
    async fn update_to_completed(&self, id: Uuid) -> Result<(), StorageError>;
    async fn update_to_failed(&self, id: Uuid, message: &str) -> Result<(), StorageError>;
    async fn has_pending_or_processing_job(&self) -> Result<bool, StorageError>;
    async fn delete_old_completed_jobs(&self) -> Result<u64, StorageError>;
    async fn delete_old_failed_jobs(&self) -> Result<u64, StorageError>;
    /// 刷新 processing 任务的心跳（`updated_at`），返回实际刷新的条数
    async fn heartbeat(&self, ids: &[Uuid]) -> Result<u64, StorageError>;
    /// 把心跳停止超过 `older_than` 的 processing 任务放回 `pending`（崩溃恢复）。
    /// 仍在执行的任务会持续刷新心跳，不会被其他 worker 的启动重置。
    async fn reset_stale_processing(&self, older_than: Duration) -> Result<u64, StorageError>;
}

#[async_trait]
pub trait ImportJobRepository: Send + Sync {
    async fn create(&self, city_code: &str) -> Result<ImportJob, StorageError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImportJob>, StorageError>;
    /// 进入 processing 时写 `started_at`，进入终态时写 `completed_at`。
    /// 终态不可迁移，违反时返回 `InvalidTransition`。
    async fn update_status(&self, id: Uuid, status: ImportJobStatus) -> Result<(), StorageError>;
    async fn update_progress(&self, id: Uuid, progress: ImportProgress)
        -> Result<(), StorageError>;
    async fn update_object_key(&self, id: Uuid, object_key: &str) -> Result<(), StorageError>;
    async fn update_workflow_ref(&self, id: Uuid, reference: &str) -> Result<(), StorageError>;
    async fn update_total_records(&self, id: Uuid, total: i64) -> Result<(), StorageError>;
    /// 记录错误并把任务置为 failed
    async fn update_error(
        &self,
        id: Uuid,
        message: &str,
        failed_ids: &[String],
    ) -> Result<(), StorageError>;
    async fn update_failed_ids(&self, id: Uuid, failed_ids: &[String])
        -> Result<(), StorageError>;
}
