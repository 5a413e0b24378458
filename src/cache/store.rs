use crate::cache::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// 带 TTL 的键值存储。进程内实现见 [`MemoryStore`]，远程实现只需实现这三个方法。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, keys: &[String]) -> Result<u64, CacheError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Ok(Some(value.clone())),
            Some(_) => {
                // 过期即删除
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self.entries.lock().await;
        guard.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut guard = self.entries.lock().await;
        let removed = keys.iter().filter(|k| guard.remove(k.as_str()).is_some()).count();
        Ok(removed as u64)
    }
}
