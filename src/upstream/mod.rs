//! 上游要素 API。

pub mod client;

pub use client::{UpstreamClient, UpstreamConfig};

use crate::object_store::ByteStream;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream request cancelled")]
    Cancelled,
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout => true,
            Self::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

/// 按城市拉取要素文档（流式）
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn fetch_features(
        &self,
        city_code: &str,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, UpstreamError>;
}
