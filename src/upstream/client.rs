use crate::object_store::ByteStream;
use crate::upstream::{FeatureSource, UpstreamError};
use async_trait::async_trait;
use futures::TryStreamExt;
use log::{info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub max_tries: usize,
    pub delay_unexpected: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            timeout: DEFAULT_TIMEOUT,
            max_tries: 3,
            delay_unexpected: Duration::from_secs(2),
        }
    }
}

/// 上游 REST 客户端：429/5xx 时按固定间隔重试，响应体以流的形式交出。
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("fieldgrid/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    fn features_url(&self, city_code: &str) -> String {
        format!(
            "{}/features?cityCode={}",
            self.config.base_url.trim_end_matches('/'),
            city_code
        )
    }

    fn retryable(status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    async fn request_with_retry<F>(
        &self,
        builder: F,
        cancel: &CancellationToken,
    ) -> Result<Response, UpstreamError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_tries = self.config.max_tries.max(1);
        let mut try_num = 0;
        loop {
            try_num += 1;
            let mut request = builder(&self.client);
            if let Some(key) = &self.config.api_key {
                request = request.header("X-API-Key", key);
            }

            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                r = request.send() => r,
            };

            match sent {
                Ok(resp) if resp.status().is_success() => {
                    info!("上游请求成功 [{} tries]", try_num);
                    return Ok(resp);
                }
                Ok(resp) if Self::retryable(resp.status()) && try_num < max_tries => {
                    warn!(
                        "⚠ 上游返回 {}，{:?} 后重试 ({}/{})",
                        resp.status(),
                        self.config.delay_unexpected,
                        try_num,
                        max_tries
                    );
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(UpstreamError::Status { status, body });
                }
                Err(e) if e.is_timeout() => return Err(UpstreamError::Timeout),
                Err(e) if (e.is_connect() || e.is_request()) && try_num < max_tries => {
                    warn!("⚠ 上游连接失败: {}，稍后重试 ({}/{})", e, try_num, max_tries);
                }
                Err(e) => return Err(e.into()),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(UpstreamError::Cancelled),
                _ = tokio::time::sleep(self.config.delay_unexpected) => {}
            }
        }
    }
}

#[async_trait]
impl FeatureSource for UpstreamClient {
    async fn fetch_features(
        &self,
        city_code: &str,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, UpstreamError> {
        let url = self.features_url(city_code);
        let resp = self
            .request_with_retry(|c| c.get(&url).header("Accept", "application/json"), cancel)
            .await?;
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::routing::get;
    use axum::Router;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn config(base: String) -> UpstreamConfig {
        UpstreamConfig {
            delay_unexpected: Duration::from_millis(10),
            ..UpstreamConfig::new(base)
        }
    }

    async fn collect(mut s: ByteStream) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = s.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        out
    }

    #[tokio::test]
    async fn retries_on_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/features",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (AxumStatus::SERVICE_UNAVAILABLE, "busy".to_string())
                    } else {
                        (AxumStatus::OK, r#"{"targetFeatures":[]}"#.to_string())
                    }
                }
            }),
        );
        let client = UpstreamClient::new(config(serve(router).await)).unwrap();
        let body = client
            .fetch_features("13101", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(collect(body).await, br#"{"targetFeatures":[]}"#.to_vec());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/features",
            get(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { (AxumStatus::NOT_FOUND, "unknown city") }
            }),
        );
        let client = UpstreamClient::new(config(serve(router).await)).unwrap();
        let err = client
            .fetch_features("00000", &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, UpstreamError::Status { status: 404, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_call() {
        let router = Router::new().route(
            "/features",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let client = UpstreamClient::new(config(serve(router).await)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.fetch_features("13101", &cancel).await.err().unwrap();
        assert!(matches!(err, UpstreamError::Cancelled));
    }
}
