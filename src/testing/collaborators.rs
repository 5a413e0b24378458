use super::lock;
use crate::cache::{CacheError, KeyValueStore, MemoryStore};
use crate::ingest::workflow::{WorkflowError, WorkflowRequest, WorkflowTrigger};
use crate::object_store::{ByteStream, ObjectReader, ObjectStore, ObjectStoreError};
use crate::upstream::{FeatureSource, UpstreamError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 可切换为不可用状态的 [`MemoryStore`]
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check()?;
        self.inner.set_ex(key, value, ttl).await
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        self.check()?;
        self.inner.del(keys).await
    }
}

#[derive(Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Bytes>>,
    unavailable: AtomicBool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: &str, body: impl Into<Bytes>) {
        lock(&self.objects).insert(key.to_string(), body.into());
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).cloned()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ObjectStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Backend("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn open(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        self.check()?;
        let body = self
            .get(key)
            .ok_or_else(|| ObjectStoreError::NotFound(key.to_string()))?;
        Ok(Box::pin(std::io::Cursor::new(body)))
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream) -> Result<u64, ObjectStoreError> {
        self.check()?;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let len = buf.len() as u64;
        self.insert(key, buf.freeze());
        Ok(len)
    }
}

/// 固定返回同一份文档，或固定失败
pub struct StaticFeatureSource {
    body: Option<Bytes>,
    chunk_size: usize,
}

impl StaticFeatureSource {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: Some(body.into()),
            chunk_size: 1024,
        }
    }

    /// 每次请求都返回 502
    pub fn failing() -> Self {
        Self {
            body: None,
            chunk_size: 1024,
        }
    }
}

#[async_trait]
impl FeatureSource for StaticFeatureSource {
    async fn fetch_features(
        &self,
        _city_code: &str,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, UpstreamError> {
        if cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }
        let body = self.body.clone().ok_or_else(|| UpstreamError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        })?;
        // 分块返回，贴近真实的流式响应
        let chunks: Vec<Result<Bytes, std::io::Error>> = body
            .chunks(self.chunk_size.max(1))
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// 只记录触发请求，不执行导入
#[derive(Default)]
pub struct RecordingWorkflow {
    requests: Mutex<Vec<WorkflowRequest>>,
    failing: AtomicBool,
}

impl RecordingWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<WorkflowRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl WorkflowTrigger for RecordingWorkflow {
    async fn trigger(&self, request: WorkflowRequest) -> Result<String, WorkflowError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(WorkflowError::Trigger("injected failure".to_string()));
        }
        let reference = format!("recorded-{}", request.job_id);
        lock(&self.requests).push(request);
        Ok(reference)
    }
}
