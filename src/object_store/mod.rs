//! 导入文件的对象存储。`LocalObjectStore` 用于本地与测试，
//! `S3ObjectStore`（feature `s3`）用于生产。

pub mod local;
#[cfg(feature = "s3")]
pub mod s3;

pub use local::LocalObjectStore;
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use std::pin::Pin;
use tokio::io::AsyncRead;

pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

#[derive(thiserror::Error, Debug)]
pub enum ObjectStoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 打开对象的流式读取器，调用方负责读完或丢弃
    async fn open(&self, key: &str) -> Result<ObjectReader, ObjectStoreError>;
    /// 流式写入，返回写入字节数
    async fn put_stream(&self, key: &str, body: ByteStream) -> Result<u64, ObjectStoreError>;

    async fn put_bytes(&self, key: &str, body: Bytes) -> Result<u64, ObjectStoreError> {
        let once: ByteStream = Box::pin(stream::once(async move { Ok(body) }));
        self.put_stream(key, once).await
    }
}

/// 导入文件的标准路径：`imports/<cityCode>/<jobId>.json`
pub fn import_object_key(city_code: &str, job_id: uuid::Uuid) -> String {
    format!("imports/{}/{}.json", city_code, job_id)
}
