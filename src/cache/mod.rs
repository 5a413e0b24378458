//! 聚合结果缓存（cache-aside）。

pub mod store;

pub use store::{KeyValueStore, MemoryStore};

use crate::geo::ClusterResolution;
use crate::model::Cluster;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const CLUSTER_CACHE_TTL: Duration = Duration::from_secs(30 * 60);
const KEY_PREFIX: &str = "cluster:results:";

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// `Ok(None)` 表示未命中；损坏的条目同样视为未命中。
    async fn get_clusters(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Option<Vec<Cluster>>, CacheError>;
    async fn set_clusters(
        &self,
        resolution: ClusterResolution,
        clusters: &[Cluster],
    ) -> Result<(), CacheError>;
    /// 清除所有分辨率的条目
    async fn delete_clusters(&self) -> Result<(), CacheError>;
}

pub fn cluster_cache_key(resolution: ClusterResolution) -> String {
    format!("{KEY_PREFIX}{}", resolution.name())
}

/// 缓存中的单条记录，不含 id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedCluster {
    resolution: u8,
    h3_index: String,
    field_count: i32,
    center_lat: f64,
    center_lng: f64,
    calculated_at: DateTime<Utc>,
}

pub struct ClusterCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ClusterCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            ttl: CLUSTER_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn decode(resolution: ClusterResolution, raw: &str) -> Option<Vec<Cluster>> {
        let rows: Vec<CachedCluster> = serde_json::from_str(raw).ok()?;
        rows.into_iter()
            .map(|r| {
                // 分辨率不一致也按损坏处理
                if r.resolution != resolution.value() {
                    return None;
                }
                Some(Cluster {
                    id: None,
                    resolution,
                    h3_index: r.h3_index,
                    field_count: r.field_count,
                    center_lat: r.center_lat,
                    center_lng: r.center_lng,
                    calculated_at: r.calculated_at,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CacheRepository for ClusterCache {
    async fn get_clusters(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Option<Vec<Cluster>>, CacheError> {
        let key = cluster_cache_key(resolution);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match Self::decode(resolution, &raw) {
            Some(clusters) => Ok(Some(clusters)),
            None => {
                warn!("⚠ 缓存条目损坏，按未命中处理: {}", key);
                Ok(None)
            }
        }
    }

    async fn set_clusters(
        &self,
        resolution: ClusterResolution,
        clusters: &[Cluster],
    ) -> Result<(), CacheError> {
        let rows: Vec<CachedCluster> = clusters
            .iter()
            .map(|c| CachedCluster {
                resolution: resolution.value(),
                h3_index: c.h3_index.clone(),
                field_count: c.field_count,
                center_lat: c.center_lat,
                center_lng: c.center_lng,
                calculated_at: c.calculated_at,
            })
            .collect();
        let raw = serde_json::to_string(&rows)?;
        self.store
            .set_ex(&cluster_cache_key(resolution), raw, self.ttl)
            .await
    }

    async fn delete_clusters(&self) -> Result<(), CacheError> {
        let keys: Vec<String> = ClusterResolution::ALL
            .iter()
            .map(|r| cluster_cache_key(*r))
            .collect();
        self.store.del(&keys).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo;

    fn cluster(lat: f64, lng: f64, count: i32) -> Cluster {
        let h3 = geo::lat_lng_to_cell(lat, lng, ClusterResolution::Res7).unwrap();
        let center = geo::cell_to_lat_lng(&h3).unwrap();
        Cluster {
            id: Some(42),
            resolution: ClusterResolution::Res7,
            h3_index: h3,
            field_count: count,
            center_lat: center.lat,
            center_lng: center.lng,
            calculated_at: Utc::now(),
        }
    }

    #[test]
    fn key_format() {
        assert_eq!(cluster_cache_key(ClusterResolution::Res3), "cluster:results:res3");
        assert_eq!(cluster_cache_key(ClusterResolution::Res9), "cluster:results:res9");
    }

    #[tokio::test]
    async fn stored_tuples_come_back_without_ids() {
        let cache = ClusterCache::new(Arc::new(MemoryStore::new()));
        let input = vec![cluster(35.5, 139.5, 10), cluster(35.7, 139.7, 5)];
        cache
            .set_clusters(ClusterResolution::Res7, &input)
            .await
            .unwrap();

        let out = cache
            .get_clusters(ClusterResolution::Res7)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), 2);
        for (a, b) in input.iter().zip(out.iter()) {
            assert_eq!(b.id, None);
            assert_eq!(
                (&a.h3_index, a.field_count, a.center_lat, a.center_lng),
                (&b.h3_index, b.field_count, b.center_lat, b.center_lng)
            );
        }
        assert!(cache
            .get_clusters(ClusterResolution::Res5)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex(
                &cluster_cache_key(ClusterResolution::Res3),
                "{not json".into(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        let cache = ClusterCache::new(store);
        assert!(cache
            .get_clusters(ClusterResolution::Res3)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delete_clears_every_resolution() {
        let store = Arc::new(MemoryStore::new());
        let cache = ClusterCache::new(store.clone());
        for res in ClusterResolution::ALL {
            cache.set_clusters(res, &[]).await.unwrap();
        }
        cache.delete_clusters().await.unwrap();
        for res in ClusterResolution::ALL {
            assert!(store.get(&cluster_cache_key(res)).await.unwrap().is_none());
        }
    }
}
