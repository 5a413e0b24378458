use crate::model::{self, ClusterJob, ClusterJobStatus};
use crate::storage::entity::cluster_job::{
    self, ActiveModel as ClusterJobActiveModel, Entity as ClusterJobEntity,
};
use crate::storage::repository::{ClusterJobRepository, ClusterJobTransaction};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Select, Set, TransactionTrait,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// 已完成任务保留 1 小时，失败任务保留 24 小时
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(60 * 60);
pub const FAILED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

pub struct SeaOrmClusterJobRepository {
    db: Arc<DatabaseConnection>,
    completed_retention: Duration,
    failed_retention: Duration,
}

impl SeaOrmClusterJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            db,
            completed_retention: COMPLETED_RETENTION,
            failed_retention: FAILED_RETENTION,
        }
    }

    pub fn with_retention(mut self, completed: Duration, failed: Duration) -> Self {
        self.completed_retention = completed;
        self.failed_retention = failed;
        self
    }

    async fn insert(&self, priority: i32, cells: Vec<String>) -> Result<ClusterJob, StorageError> {
        let now = Utc::now().timestamp_millis();
        let affected = if cells.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&cells)?)
        };
        let am = ClusterJobActiveModel {
            id: Set(Uuid::new_v4()),
            status: Set(ClusterJobStatus::PENDING.to_string()),
            priority: Set(priority),
            affected_h3_cells: Set(affected),
            error_message: Set(None),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };
        let model = am.insert(self.db.as_ref()).await?;
        to_domain(model)
    }

    async fn finish(
        &self,
        id: Uuid,
        status: ClusterJobStatus,
    ) -> Result<(), StorageError> {
        let now = Utc::now().timestamp_millis();
        let message = match &status {
            ClusterJobStatus::Failed(msg) => Some(msg.clone()),
            _ => None,
        };
        let res = ClusterJobEntity::update_many()
            .col_expr(cluster_job::Column::Status, Expr::value(status.as_str()))
            .col_expr(cluster_job::Column::ErrorMessage, Expr::value(message))
            .col_expr(cluster_job::Column::CompletedAt, Expr::value(now))
            .col_expr(cluster_job::Column::UpdatedAt, Expr::value(now))
            .filter(cluster_job::Column::Id.eq(id))
            .filter(cluster_job::Column::Status.eq(ClusterJobStatus::PROCESSING))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            return Err(self.transition_error(id, status.as_str()).await);
        }
        Ok(())
    }

    async fn transition_error(&self, id: Uuid, to: &str) -> StorageError {
        match ClusterJobEntity::find_by_id(id).one(self.db.as_ref()).await {
            Ok(Some(job)) => StorageError::InvalidTransition {
                entity: "cluster_job",
                id: id.to_string(),
                from: job.status,
                to: to.to_string(),
            },
            Ok(None) => StorageError::not_found("cluster_job", id),
            Err(e) => e.into(),
        }
    }

    async fn delete_finished_before(
        &self,
        status: &str,
        retention: Duration,
    ) -> Result<u64, StorageError> {
        let cutoff = Utc::now().timestamp_millis() - retention.as_millis() as i64;
        let res = ClusterJobEntity::delete_many()
            .filter(cluster_job::Column::Status.eq(status))
            .filter(cluster_job::Column::CompletedAt.lt(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }
}

fn to_domain(m: cluster_job::Model) -> Result<ClusterJob, StorageError> {
    let status = ClusterJobStatus::from_parts(&m.status, m.error_message.as_deref())
        .ok_or_else(|| StorageError::Corrupt(format!("cluster_job {} status {}", m.id, m.status)))?;
    let affected_h3_cells = match m.affected_h3_cells.as_deref() {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(raw)?,
        _ => Vec::new(),
    };
    Ok(ClusterJob {
        id: m.id,
        status,
        priority: m.priority,
        affected_h3_cells,
        created_at: model::from_millis(m.created_at),
        started_at: m.started_at.map(model::from_millis),
        completed_at: m.completed_at.map(model::from_millis),
    })
}

/// 出队查询：`priority DESC, created_at ASC`，`FOR UPDATE SKIP LOCKED`。
/// SQLite 不支持行锁，sea-orm 在该后端上会省略锁子句。
pub fn pending_jobs_query(limit: u64) -> Select<ClusterJobEntity> {
    ClusterJobEntity::find()
        .filter(cluster_job::Column::Status.eq(ClusterJobStatus::PENDING))
        .order_by_desc(cluster_job::Column::Priority)
        .order_by_asc(cluster_job::Column::CreatedAt)
        .limit(limit)
        .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
}

pub struct SeaOrmClusterJobTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl ClusterJobTransaction for SeaOrmClusterJobTransaction {
    async fn find_pending_jobs(&mut self, limit: u64) -> Result<Vec<ClusterJob>, StorageError> {
        pending_jobs_query(limit)
            .all(&self.txn)
            .await?
            .into_iter()
            .map(to_domain)
            .collect()
    }

    async fn update_to_processing(&mut self, id: Uuid) -> Result<(), StorageError> {
        // savepoint：单条失败不污染外层事务（Postgres 出错后整个事务不可用）
        let sp = self.txn.begin().await?;
        let now = Utc::now().timestamp_millis();
        let res = ClusterJobEntity::update_many()
            .col_expr(
                cluster_job::Column::Status,
                Expr::value(ClusterJobStatus::PROCESSING),
            )
            .col_expr(cluster_job::Column::StartedAt, Expr::value(now))
            .col_expr(cluster_job::Column::UpdatedAt, Expr::value(now))
            .filter(cluster_job::Column::Id.eq(id))
            .filter(cluster_job::Column::Status.eq(ClusterJobStatus::PENDING))
            .exec(&sp)
            .await?;
        sp.commit().await?;
        if res.rows_affected == 0 {
            return Err(StorageError::InvalidTransition {
                entity: "cluster_job",
                id: id.to_string(),
                from: "non-pending".to_string(),
                to: ClusterJobStatus::PROCESSING.to_string(),
            });
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        self.txn.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterJobRepository for SeaOrmClusterJobRepository {
    async fn create(&self, priority: i32) -> Result<ClusterJob, StorageError> {
        self.insert(priority, Vec::new()).await
    }

    async fn create_with_affected_cells(
        &self,
        priority: i32,
        cells: Vec<String>,
    ) -> Result<ClusterJob, StorageError> {
        self.insert(priority, cells).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClusterJob>, StorageError> {
        ClusterJobEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(to_domain)
            .transpose()
    }

    async fn begin(&self) -> Result<Box<dyn ClusterJobTransaction>, StorageError> {
        let txn = self.db.begin().await?;
        Ok(Box::new(SeaOrmClusterJobTransaction { txn }))
    }

    async fn update_to_completed(&self, id: Uuid) -> Result<(), StorageError> {
        self.finish(id, ClusterJobStatus::Completed).await
    }

    async fn update_to_failed(&self, id: Uuid, message: &str) -> Result<(), StorageError> {
        self.finish(id, ClusterJobStatus::Failed(message.to_string()))
            .await
    }

    async fn has_pending_or_processing_job(&self) -> Result<bool, StorageError> {
        let n = ClusterJobEntity::find()
            .filter(cluster_job::Column::Status.is_in([
                ClusterJobStatus::PENDING,
                ClusterJobStatus::PROCESSING,
            ]))
            .count(self.db.as_ref())
            .await?;
        Ok(n > 0)
    }

    async fn delete_old_completed_jobs(&self) -> Result<u64, StorageError> {
        self.delete_finished_before(ClusterJobStatus::COMPLETED, self.completed_retention)
            .await
    }

    async fn delete_old_failed_jobs(&self) -> Result<u64, StorageError> {
        self.delete_finished_before(ClusterJobStatus::FAILED, self.failed_retention)
            .await
    }

    async fn heartbeat(&self, ids: &[Uuid]) -> Result<u64, StorageError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let res = ClusterJobEntity::update_many()
            .col_expr(
                cluster_job::Column::UpdatedAt,
                Expr::value(Utc::now().timestamp_millis()),
            )
            .filter(cluster_job::Column::Id.is_in(ids.iter().copied()))
            .filter(cluster_job::Column::Status.eq(ClusterJobStatus::PROCESSING))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }

    async fn reset_stale_processing(&self, older_than: Duration) -> Result<u64, StorageError> {
        let now = Utc::now().timestamp_millis();
        let cutoff = now - older_than.as_millis() as i64;
        let res = ClusterJobEntity::update_many()
            .col_expr(
                cluster_job::Column::Status,
                Expr::value(ClusterJobStatus::PENDING),
            )
            .col_expr(cluster_job::Column::StartedAt, Expr::value(Option::<i64>::None))
            .col_expr(cluster_job::Column::UpdatedAt, Expr::value(now))
            .filter(cluster_job::Column::Status.eq(ClusterJobStatus::PROCESSING))
            .filter(cluster_job::Column::UpdatedAt.lte(cutoff))
            .exec(self.db.as_ref())
            .await?;
        Ok(res.rows_affected)
    }
}
