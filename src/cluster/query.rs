use crate::cache::CacheRepository;
use crate::cluster::ClusterError;
use crate::geo::{self, BoundingBox, Coordinate};
use crate::model::Cluster;
use crate::storage::repository::{ClusterJobRepository, ClusterRepository};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterQuery {
    pub zoom: f64,
    pub south_west: Coordinate,
    pub north_east: Coordinate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterPoint {
    pub h3: String,
    pub lat: f64,
    pub lng: f64,
    pub count: i32,
}

impl From<Cluster> for ClusterPoint {
    fn from(c: Cluster) -> Self {
        Self {
            h3: c.h3_index,
            lat: c.center_lat,
            lng: c.center_lng,
            count: c.field_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub clusters: Vec<ClusterPoint>,
    /// 有 pending/processing 的聚合任务时为 true，结果可能滞后
    pub is_stale: bool,
}

/// 读路径：缓存优先，未命中回源并回填。
pub struct ClusterQueryService {
    clusters: Arc<dyn ClusterRepository>,
    jobs: Arc<dyn ClusterJobRepository>,
    cache: Arc<dyn CacheRepository>,
}

impl ClusterQueryService {
    pub fn new(
        clusters: Arc<dyn ClusterRepository>,
        jobs: Arc<dyn ClusterJobRepository>,
        cache: Arc<dyn CacheRepository>,
    ) -> Self {
        Self {
            clusters,
            jobs,
            cache,
        }
    }

    pub async fn get_clusters(&self, query: &ClusterQuery) -> Result<ClusterView, ClusterError> {
        let resolution = geo::zoom_to_resolution(query.zoom);
        let bbox = BoundingBox::new(query.south_west, query.north_east);

        let cached = match self.cache.get_clusters(resolution).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("⚠ 读取聚合缓存失败，回源: {}", e);
                None
            }
        };
        let clusters = match cached {
            Some(clusters) => {
                debug!("聚合缓存命中: {}", resolution);
                clusters
            }
            None => {
                let clusters = self.clusters.get_clusters(resolution).await?;
                if !clusters.is_empty() {
                    if let Err(e) = self.cache.set_clusters(resolution, &clusters).await {
                        warn!("⚠ 回填聚合缓存失败: {}", e);
                    }
                }
                clusters
            }
        };

        let visible: Vec<ClusterPoint> = if bbox.is_valid() {
            clusters
                .into_iter()
                .filter(|c| bbox.contains(c.center_lat, c.center_lng))
                .map(ClusterPoint::from)
                .collect()
        } else {
            clusters.into_iter().map(ClusterPoint::from).collect()
        };

        let is_stale = match self.jobs.has_pending_or_processing_job().await {
            Ok(stale) => stale,
            Err(e) => {
                // 无法确认新鲜度时按过期返回
                warn!("⚠ 查询聚合任务状态失败: {}", e);
                true
            }
        };

        Ok(ClusterView {
            clusters: visible,
            is_stale,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ClusterCache, MemoryStore};
    use crate::geo::ClusterResolution;
    use crate::model::H3Count;
    use crate::testing::{
        FlakyStore, InMemoryClusterJobRepository, InMemoryClusterRepository,
        InMemoryFieldRepository,
    };

    fn tokyo_query(zoom: f64) -> ClusterQuery {
        ClusterQuery {
            zoom,
            south_west: Coordinate::new(35.0, 139.0),
            north_east: Coordinate::new(36.0, 140.0),
        }
    }

    fn cluster_near(lat: f64, lng: f64, count: i64) -> Cluster {
        let cell = geo::lat_lng_to_cell(lat, lng, ClusterResolution::Res7).unwrap();
        geo::aggregate_to_clusters(ClusterResolution::Res7, &[H3Count { h3: cell, count }])
            .remove(0)
    }

    struct Fixture {
        clusters: Arc<InMemoryClusterRepository>,
        jobs: Arc<InMemoryClusterJobRepository>,
        store: Arc<FlakyStore>,
        cache: Arc<ClusterCache>,
        service: ClusterQueryService,
    }

    fn fixture() -> Fixture {
        let clusters = Arc::new(InMemoryClusterRepository::new(Arc::new(
            InMemoryFieldRepository::new(),
        )));
        let jobs = Arc::new(InMemoryClusterJobRepository::new());
        let store = Arc::new(FlakyStore::new());
        let cache = Arc::new(ClusterCache::new(store.clone()));
        let service = ClusterQueryService::new(clusters.clone(), jobs.clone(), cache.clone());
        Fixture {
            clusters,
            jobs,
            store,
            cache,
            service,
        }
    }

    #[tokio::test]
    async fn miss_reads_store_and_fills_cache() {
        let fx = fixture();
        fx.clusters
            .save_clusters(&[cluster_near(35.5, 139.5, 10), cluster_near(35.7, 139.8, 5)])
            .await
            .unwrap();

        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert_eq!(view.clusters.len(), 2);
        assert!(!view.is_stale);
        let cached = fx.cache.get_clusters(ClusterResolution::Res7).await.unwrap();
        assert_eq!(cached.map(|c| c.len()), Some(2));
    }

    #[tokio::test]
    async fn viewport_drops_outside_clusters() {
        let fx = fixture();
        fx.clusters
            .save_clusters(&[cluster_near(35.5, 139.5, 1), cluster_near(40.0, 139.5, 1)])
            .await
            .unwrap();
        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert_eq!(view.clusters.len(), 1);
        assert!((view.clusters[0].lat - 35.5).abs() < 0.05);
    }

    #[tokio::test]
    async fn invalid_box_returns_everything() {
        let fx = fixture();
        fx.clusters
            .save_clusters(&[cluster_near(35.5, 139.5, 1), cluster_near(40.0, 139.5, 1)])
            .await
            .unwrap();
        let mut query = tokyo_query(12.0);
        query.south_west.lat = 50.0;
        let view = fx.service.get_clusters(&query).await.unwrap();
        assert_eq!(view.clusters.len(), 2);
    }

    #[tokio::test]
    async fn in_flight_job_marks_stale() {
        let fx = fixture();
        fx.jobs.create(10).await.unwrap();
        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert!(view.is_stale);
    }

    #[tokio::test]
    async fn unknown_freshness_is_stale() {
        let fx = fixture();
        fx.jobs.fail_lookups(true);
        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert!(view.is_stale);
    }

    #[tokio::test]
    async fn cache_outage_falls_back_to_store() {
        let fx = fixture();
        fx.clusters
            .save_clusters(&[cluster_near(35.5, 139.5, 3)])
            .await
            .unwrap();
        fx.store.set_failing(true);
        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert_eq!(view.clusters.len(), 1);
        assert_eq!(view.clusters[0].count, 3);
    }

    #[tokio::test]
    async fn store_error_is_fatal() {
        let fx = fixture();
        fx.clusters.fail_reads(true);
        assert!(fx.service.get_clusters(&tokyo_query(12.0)).await.is_err());
    }

    #[tokio::test]
    async fn cached_entry_wins_over_store() {
        let fx = fixture();
        fx.cache
            .set_clusters(ClusterResolution::Res7, &[cluster_near(35.5, 139.5, 42)])
            .await
            .unwrap();
        let view = fx.service.get_clusters(&tokyo_query(12.0)).await.unwrap();
        assert_eq!(view.clusters.len(), 1);
        assert_eq!(view.clusters[0].count, 42);
    }
}
