use crate::cluster::{ClusterJobQueue, ClusterQueryService};
use crate::ingest::ImportService;
use crate::storage::repository::{FieldRepository, ImportJobRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct AppState {
    pub clusters: Arc<ClusterQueryService>,
    pub queue: ClusterJobQueue,
    pub fields: Arc<dyn FieldRepository>,
    pub import_jobs: Arc<dyn ImportJobRepository>,
    /// 未配置上游时为 None，`POST /imports` 不可用
    pub imports: Option<Arc<ImportService>>,
    /// 读请求的截止时间
    pub request_timeout: Duration,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        clusters: Arc<ClusterQueryService>,
        queue: ClusterJobQueue,
        fields: Arc<dyn FieldRepository>,
        import_jobs: Arc<dyn ImportJobRepository>,
    ) -> Self {
        Self {
            clusters,
            queue,
            fields,
            import_jobs,
            imports: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_imports(mut self, imports: Arc<ImportService>) -> Self {
        self.imports = Some(imports);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
