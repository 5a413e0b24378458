use crate::model::{self, ImportJob, ImportJobStatus, ImportProgress};
use crate::storage::entity::import_job::{
    self, ActiveModel as ImportJobActiveModel, Entity as ImportJobEntity,
};
use crate::storage::repository::ImportJobRepository;
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct SeaOrmImportJobRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmImportJobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load(&self, id: Uuid) -> Result<import_job::Model, StorageError> {
        ImportJobEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| StorageError::not_found("import_job", id))
    }

    /// 单列原子更新，行不存在时返回 NotFound
    async fn set_columns(
        &self,
        id: Uuid,
        cols: Vec<(import_job::Column, SimpleExpr)>,
    ) -> Result<(), StorageError> {
        let now = Utc::now().timestamp_millis();
        let mut update = ImportJobEntity::update_many();
        for (col, expr) in cols {
            update = update.col_expr(col, expr);
        }
        let res = update
            .col_expr(import_job::Column::UpdatedAt, Expr::value(now))
            .filter(import_job::Column::Id.eq(id))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            return Err(StorageError::not_found("import_job", id));
        }
        Ok(())
    }

    /// 状态迁移：先读当前状态校验，再以当前状态为条件更新（乐观并发）
    async fn transition(
        &self,
        id: Uuid,
        status: ImportJobStatus,
        extra: Vec<(import_job::Column, SimpleExpr)>,
    ) -> Result<(), StorageError> {
        let current = self.load(id).await?;
        let current_status = ImportJobStatus::from_parts(&current.status, None).ok_or_else(|| {
            StorageError::Corrupt(format!("import_job {} status {}", id, current.status))
        })?;
        if !status.can_transition_from(&current_status) {
            return Err(StorageError::InvalidTransition {
                entity: "import_job",
                id: id.to_string(),
                from: current.status,
                to: status.as_str().to_string(),
            });
        }

        let now = Utc::now().timestamp_millis();
        let mut update = ImportJobEntity::update_many()
            .col_expr(import_job::Column::Status, Expr::value(status.as_str()))
            .col_expr(import_job::Column::UpdatedAt, Expr::value(now));
        match &status {
            ImportJobStatus::Processing => {
                if current.started_at.is_none() {
                    update = update.col_expr(import_job::Column::StartedAt, Expr::value(now));
                }
            }
            ImportJobStatus::Failed(message) => {
                update = update
                    .col_expr(import_job::Column::CompletedAt, Expr::value(now))
                    .col_expr(
                        import_job::Column::ErrorMessage,
                        Expr::value(message.clone()),
                    );
            }
            ImportJobStatus::Completed | ImportJobStatus::PartiallyCompleted => {
                update = update.col_expr(import_job::Column::CompletedAt, Expr::value(now));
            }
            ImportJobStatus::Pending => {}
        }
        for (col, expr) in extra {
            update = update.col_expr(col, expr);
        }
        let res = update
            .filter(import_job::Column::Id.eq(id))
            .filter(import_job::Column::Status.eq(current.status.clone()))
            .exec(self.db.as_ref())
            .await?;
        if res.rows_affected == 0 {
            // 期间被其他进程改过
            return Err(StorageError::InvalidTransition {
                entity: "import_job",
                id: id.to_string(),
                from: current.status,
                to: status.as_str().to_string(),
            });
        }
        Ok(())
    }
}

fn to_domain(m: import_job::Model) -> Result<ImportJob, StorageError> {
    let status = ImportJobStatus::from_parts(&m.status, m.error_message.as_deref())
        .ok_or_else(|| StorageError::Corrupt(format!("import_job {} status {}", m.id, m.status)))?;
    let failed_record_ids = if m.failed_record_ids.trim().is_empty() {
        Vec::new()
    } else {
        serde_json::from_str(&m.failed_record_ids)?
    };
    Ok(ImportJob {
        id: m.id,
        city_code: m.city_code,
        status,
        total_records: m.total_records,
        processed_records: m.processed_records,
        failed_records: m.failed_records,
        last_processed_batch: m.last_processed_batch,
        object_key: m.object_key,
        workflow_execution_ref: m.workflow_execution_ref,
        failed_record_ids,
        created_at: model::from_millis(m.created_at),
        started_at: m.started_at.map(model::from_millis),
        completed_at: m.completed_at.map(model::from_millis),
    })
}

#[async_trait]
impl ImportJobRepository for SeaOrmImportJobRepository {
    async fn create(&self, city_code: &str) -> Result<ImportJob, StorageError> {
        let now = Utc::now().timestamp_millis();
        let am = ImportJobActiveModel {
            id: Set(Uuid::new_v4()),
            city_code: Set(city_code.to_string()),
            status: Set(ImportJobStatus::PENDING.to_string()),
            total_records: Set(None),
            processed_records: Set(0),
            failed_records: Set(0),
            last_processed_batch: Set(0),
            object_key: Set(None),
            workflow_execution_ref: Set(None),
            error_message: Set(None),
            failed_record_ids: Set("[]".to_string()),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };
        let model = am.insert(self.db.as_ref()).await?;
        to_domain(model)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImportJob>, StorageError> {
        ImportJobEntity::find_by_id(id)
            .one(self.db.as_ref())
            .await?
            .map(to_domain)
            .transpose()
    }

    async fn update_status(&self, id: Uuid, status: ImportJobStatus) -> Result<(), StorageError> {
        self.transition(id, status, Vec::new()).await
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: ImportProgress,
    ) -> Result<(), StorageError> {
        self.set_columns(
            id,
            vec![
                (
                    import_job::Column::ProcessedRecords,
                    Expr::value(progress.processed),
                ),
                (import_job::Column::FailedRecords, Expr::value(progress.failed)),
                (
                    import_job::Column::LastProcessedBatch,
                    Expr::value(progress.batch),
                ),
            ],
        )
        .await
    }

    async fn update_object_key(&self, id: Uuid, object_key: &str) -> Result<(), StorageError> {
        self.set_columns(
            id,
            vec![(
                import_job::Column::ObjectKey,
                Expr::value(object_key.to_string()),
            )],
        )
        .await
    }

    async fn update_workflow_ref(&self, id: Uuid, reference: &str) -> Result<(), StorageError> {
        self.set_columns(
            id,
            vec![(
                import_job::Column::WorkflowExecutionRef,
                Expr::value(reference.to_string()),
            )],
        )
        .await
    }

    async fn update_total_records(&self, id: Uuid, total: i64) -> Result<(), StorageError> {
        self.set_columns(
            id,
            vec![(import_job::Column::TotalRecords, Expr::value(total))],
        )
        .await
    }

    async fn update_error(
        &self,
        id: Uuid,
        message: &str,
        failed_ids: &[String],
    ) -> Result<(), StorageError> {
        let ids = serde_json::to_string(failed_ids)?;
        self.transition(
            id,
            ImportJobStatus::Failed(message.to_string()),
            vec![(import_job::Column::FailedRecordIds, Expr::value(ids))],
        )
        .await
    }

    async fn update_failed_ids(
        &self,
        id: Uuid,
        failed_ids: &[String],
    ) -> Result<(), StorageError> {
        let ids = serde_json::to_string(failed_ids)?;
        self.set_columns(
            id,
            vec![(import_job::Column::FailedRecordIds, Expr::value(ids))],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::establish_connection;

    async fn setup() -> (tempfile::TempDir, SeaOrmImportJobRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("imports.db").display());
        let db = establish_connection(&url, 2).await.unwrap();
        (dir, SeaOrmImportJobRepository::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn lifecycle_stamps_timestamps() {
        let (_dir, repo) = setup().await;
        let job = repo.create("13101").await.unwrap();
        assert_eq!(job.status, ImportJobStatus::Pending);
        assert!(job.started_at.is_none());

        repo.update_status(job.id, ImportJobStatus::Processing)
            .await
            .unwrap();
        repo.update_object_key(job.id, "imports/13101/a.json")
            .await
            .unwrap();
        repo.update_progress(
            job.id,
            ImportProgress {
                processed: 2,
                failed: 1,
                batch: 1,
            },
        )
        .await
        .unwrap();
        repo.update_total_records(job.id, 3).await.unwrap();
        repo.update_failed_ids(job.id, &["b".to_string()]).await.unwrap();
        repo.update_status(job.id, ImportJobStatus::PartiallyCompleted)
            .await
            .unwrap();

        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ImportJobStatus::PartiallyCompleted);
        assert!(stored.started_at.is_some());
        assert!(stored.completed_at.is_some());
        assert_eq!(stored.processed_records, 2);
        assert_eq!(stored.failed_records, 1);
        assert_eq!(stored.total_records, Some(3));
        assert_eq!(stored.failed_record_ids, vec!["b".to_string()]);
        assert_eq!(stored.object_key.as_deref(), Some("imports/13101/a.json"));
    }

    #[tokio::test]
    async fn terminal_states_are_absorbing() {
        let (_dir, repo) = setup().await;
        let job = repo.create("13101").await.unwrap();
        repo.update_status(job.id, ImportJobStatus::Processing)
            .await
            .unwrap();
        repo.update_status(job.id, ImportJobStatus::Completed)
            .await
            .unwrap();

        let err = repo
            .update_status(job.id, ImportJobStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidTransition { .. }));
        assert!(repo.update_error(job.id, "late", &[]).await.is_err());
    }

    #[tokio::test]
    async fn update_error_fails_the_job() {
        let (_dir, repo) = setup().await;
        let job = repo.create("13101").await.unwrap();
        repo.update_error(job.id, "no records processed", &["x".into(), "y".into()])
            .await
            .unwrap();
        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(
            stored.status,
            ImportJobStatus::Failed("no records processed".into())
        );
        assert_eq!(stored.error_message(), Some("no records processed"));
        assert_eq!(stored.failed_record_ids.len(), 2);
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let (_dir, repo) = setup().await;
        let err = repo
            .update_object_key(Uuid::new_v4(), "k")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }
}
