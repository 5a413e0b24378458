use crate::object_store::{ByteStream, ObjectReader, ObjectStore, ObjectStoreError};
use async_trait::async_trait;
use futures::StreamExt;
use log::debug;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// 以本地目录为根的对象存储。key 中的 `/` 映射为子目录。
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 拒绝绝对路径、`..` 等逃逸根目录的 key
    fn resolve(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        let rel = Path::new(key);
        if key.is_empty() || rel.has_root() {
            return Err(ObjectStoreError::InvalidKey(key.to_string()));
        }
        for c in rel.components() {
            if !matches!(c, Component::Normal(_)) {
                return Err(ObjectStoreError::InvalidKey(key.to_string()));
            }
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn open(&self, key: &str) -> Result<ObjectReader, ObjectStoreError> {
        let path = self.resolve(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream) -> Result<u64, ObjectStoreError> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // 先写临时文件再 rename，读者不会看到半个文件
        let tmp = path.with_extension(format!("part-{}", uuid::Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        let mut written = 0u64;
        let result: Result<(), ObjectStoreError> = async {
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;
        drop(file);
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        tokio::fs::rename(&tmp, &path).await?;
        debug!("对象已写入 {} ({} bytes)", path.display(), written);
        Ok(written)
    }
}
