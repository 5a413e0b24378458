use crate::ingest::ImportProcessor;
use async_trait::async_trait;
use log::{error, info};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 交给工作流系统的导入请求，与 `import-processor` 的参数一一对应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRequest {
    pub job_id: Uuid,
    pub object_key: String,
    pub batch_size: i64,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
    #[error("workflow trigger failed: {0}")]
    Trigger(String),
}

/// 启动一次导入执行，返回执行引用
#[async_trait]
pub trait WorkflowTrigger: Send + Sync {
    async fn trigger(&self, request: WorkflowRequest) -> Result<String, WorkflowError>;
}

/// 在当前 tokio 运行时内直接执行导入
pub struct InProcessWorkflow {
    processor: Arc<ImportProcessor>,
    shutdown: CancellationToken,
}

impl InProcessWorkflow {
    pub fn new(processor: Arc<ImportProcessor>, shutdown: CancellationToken) -> Self {
        Self {
            processor,
            shutdown,
        }
    }
}

#[async_trait]
impl WorkflowTrigger for InProcessWorkflow {
    async fn trigger(&self, request: WorkflowRequest) -> Result<String, WorkflowError> {
        if self.shutdown.is_cancelled() {
            return Err(WorkflowError::Trigger("server is shutting down".to_string()));
        }
        let reference = format!("inproc-{}", Uuid::new_v4());
        let processor = self.processor.clone();
        let cancel = self.shutdown.child_token();
        let exec_ref = reference.clone();
        tokio::spawn(async move {
            info!("▶ 导入执行开始 [{}] job={}", exec_ref, request.job_id);
            match processor
                .process(
                    request.job_id,
                    &request.object_key,
                    request.batch_size,
                    &cancel,
                )
                .await
            {
                Ok(summary) => info!(
                    "✓ 导入执行结束 [{}]: {} (成功 {} / 失败 {})",
                    exec_ref,
                    summary.status.as_str(),
                    summary.processed,
                    summary.failed
                ),
                Err(e) => error!("✗ 导入执行失败 [{}]: {}", exec_ref, e),
            }
        });
        Ok(reference)
    }
}
