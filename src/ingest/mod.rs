//! 导入：上游拉取 → 对象存储暂存 → 流式解析 → 分批 upsert → 任务进度与终态。

pub mod feature;
pub mod pipeline;
pub mod reader;
pub mod staging;
pub mod workflow;

pub use pipeline::{ImportProcessor, ImportSummary, DEFAULT_BATCH_SIZE};
pub use staging::ImportService;
pub use workflow::{InProcessWorkflow, WorkflowRequest, WorkflowTrigger};

use crate::object_store::ObjectStoreError;
use crate::storage::StorageError;
use crate::upstream::UpstreamError;
use reader::DocumentError;
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("import job {0} not found")]
    JobNotFound(Uuid),
    #[error("import job {id} already finished as {status}")]
    AlreadyFinished { id: Uuid, status: &'static str },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Workflow(#[from] workflow::WorkflowError),
    #[error("import cancelled")]
    Cancelled,
}
