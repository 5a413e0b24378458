use crate::ingest::workflow::{WorkflowRequest, WorkflowTrigger};
use crate::ingest::{IngestError, DEFAULT_BATCH_SIZE};
use crate::model::ImportJob;
use crate::object_store::{import_object_key, ObjectStore};
use crate::storage::repository::ImportJobRepository;
use crate::upstream::FeatureSource;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// `POST /imports` 的编排：建任务 → 拉取上游 → 写对象存储 → 触发工作流
pub struct ImportService {
    jobs: Arc<dyn ImportJobRepository>,
    source: Arc<dyn FeatureSource>,
    store: Arc<dyn ObjectStore>,
    workflow: Arc<dyn WorkflowTrigger>,
    batch_size: i64,
}

impl ImportService {
    pub fn new(
        jobs: Arc<dyn ImportJobRepository>,
        source: Arc<dyn FeatureSource>,
        store: Arc<dyn ObjectStore>,
        workflow: Arc<dyn WorkflowTrigger>,
    ) -> Self {
        Self {
            jobs,
            source,
            store,
            workflow,
            batch_size: DEFAULT_BATCH_SIZE as i64,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<ImportJob>, IngestError> {
        Ok(self.jobs.find_by_id(id).await?)
    }

    /// 失败时任务被置为 failed，错误原样返回给调用方
    pub async fn start_import(
        &self,
        city_code: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportJob, IngestError> {
        let job = self.jobs.create(city_code).await?;
        let key = import_object_key(city_code, job.id);
        info!("▶ 导入任务已创建 [{}] city={}", job.id, city_code);

        if let Err(e) = self.stage(job.id, city_code, &key, cancel).await {
            if let Err(mark) = self.jobs.update_error(job.id, &e.to_string(), &[]).await {
                error!("无法标记导入任务失败 [{}]: {}", job.id, mark);
            }
            return Err(e);
        }

        let reference = self
            .workflow
            .trigger(WorkflowRequest {
                job_id: job.id,
                object_key: key.clone(),
                batch_size: self.batch_size,
            })
            .await;
        let reference = match reference {
            Ok(r) => r,
            Err(e) => {
                if let Err(mark) = self.jobs.update_error(job.id, &e.to_string(), &[]).await {
                    error!("无法标记导入任务失败 [{}]: {}", job.id, mark);
                }
                return Err(e.into());
            }
        };
        self.jobs.update_workflow_ref(job.id, &reference).await?;
        info!("✓ 导入已提交 [{}] workflow={}", job.id, reference);

        self.jobs
            .find_by_id(job.id)
            .await?
            .ok_or(IngestError::JobNotFound(job.id))
    }

    async fn stage(
        &self,
        job_id: Uuid,
        city_code: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), IngestError> {
        let body = self.source.fetch_features(city_code, cancel).await?;
        let written = self.store.put_stream(key, body).await?;
        self.jobs.update_object_key(job_id, key).await?;
        info!("导入文件已暂存 [{}] {} ({} bytes)", job_id, key, written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImportJobStatus;
    use crate::testing::{
        InMemoryImportJobRepository, InMemoryObjectStore, RecordingWorkflow, StaticFeatureSource,
    };

    const DOC: &[u8] = br#"{"targetFeatures": []}"#;

    #[tokio::test]
    async fn stages_document_and_triggers_workflow() {
        let jobs = Arc::new(InMemoryImportJobRepository::new());
        let store = Arc::new(InMemoryObjectStore::new());
        let workflow = Arc::new(RecordingWorkflow::new());
        let service = ImportService::new(
            jobs.clone(),
            Arc::new(StaticFeatureSource::new(DOC)),
            store.clone(),
            workflow.clone(),
        )
        .with_batch_size(250);

        let job = service
            .start_import("13101", &CancellationToken::new())
            .await
            .unwrap();
        let key = format!("imports/13101/{}.json", job.id);
        assert_eq!(job.status, ImportJobStatus::Pending);
        assert_eq!(job.object_key.as_deref(), Some(key.as_str()));
        assert_eq!(
            job.workflow_execution_ref,
            Some(format!("recorded-{}", job.id))
        );
        assert_eq!(store.get(&key).as_deref(), Some(DOC));

        let requests = workflow.requests();
        assert_eq!(
            requests,
            vec![WorkflowRequest {
                job_id: job.id,
                object_key: key,
                batch_size: 250,
            }]
        );
    }

    #[tokio::test]
    async fn upstream_failure_fails_the_job() {
        let jobs = Arc::new(InMemoryImportJobRepository::new());
        let workflow = Arc::new(RecordingWorkflow::new());
        let service = ImportService::new(
            jobs.clone(),
            Arc::new(StaticFeatureSource::failing()),
            Arc::new(InMemoryObjectStore::new()),
            workflow.clone(),
        );

        let err = service
            .start_import("13101", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Upstream(_)));
        assert!(workflow.requests().is_empty());
        let stored = jobs.all();
        assert_eq!(stored.len(), 1);
        assert!(matches!(stored[0].status, ImportJobStatus::Failed(ref m) if m.contains("502")));
    }

    #[tokio::test]
    async fn trigger_failure_fails_the_job() {
        let jobs = Arc::new(InMemoryImportJobRepository::new());
        let workflow = Arc::new(RecordingWorkflow::new());
        workflow.set_failing(true);
        let service = ImportService::new(
            jobs.clone(),
            Arc::new(StaticFeatureSource::new(DOC)),
            Arc::new(InMemoryObjectStore::new()),
            workflow,
        );
        let err = service
            .start_import("13101", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Workflow(_)));
        assert!(matches!(jobs.all()[0].status, ImportJobStatus::Failed(_)));
    }
}
