use crate::object_store::{ByteStream, ObjectReader, ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::primitives::ByteStream as S3Body;
use aws_sdk_s3::Client as S3Client;
use futures::StreamExt;
use log::{debug, info};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: Option<String>,
    /// MinIO 等兼容存储
    pub endpoint_url: Option<String>,
}

pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// 凭证按 aws-config 默认链加载（环境变量 → 凭证文件 → IAM 角色）
    pub async fn new(cfg: S3Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &cfg.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = &cfg.endpoint_url {
            s3_config = s3_config.endpoint_url(endpoint).force_path_style(true);
        }
        info!("S3 对象存储: bucket={}", cfg.bucket);
        Self {
            client: S3Client::from_conf(s3_config.build()),
            bucket: cfg.bucket,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn open(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let svc = e.into_service_error();
                if svc.is_no_such_key() {
                    ObjectStoreError::NotFound(key.to_string())
                } else {
                    ObjectStoreError::Backend(format!("s3://{}/{}: {}", self.bucket, key, svc))
                }
            })?;
        Ok(Box::pin(resp.body.into_async_read()))
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream) -> Result<u64, ObjectStoreError> {
        // 先落到本地临时文件，再按文件上传，避免把整个响应体放进内存
        let spool = std::env::temp_dir().join(format!("fieldgrid-{}.part", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&spool).await?;
        let mut written = 0u64;
        let spooled: Result<(), ObjectStoreError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        drop(file);

        let uploaded = match spooled {
            Ok(()) => match S3Body::from_path(&spool).await {
                Ok(stream) => self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .content_type("application/json")
                    .body(stream)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        ObjectStoreError::Backend(format!("s3://{}/{}: {}", self.bucket, key, e))
                    }),
                Err(e) => Err(ObjectStoreError::Backend(e.to_string())),
            },
            Err(e) => Err(e),
        };
        let _ = tokio::fs::remove_file(&spool).await;
        uploaded?;
        debug!("已上传 s3://{}/{} ({} bytes)", self.bucket, key, written);
        Ok(written)
    }
}
