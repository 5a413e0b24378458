//! 集成测试共用的装配：路由挂在内存仓储上。
#![allow(dead_code)]

use axum_test::TestServer;
use chrono::Utc;
use fieldgrid::api::{create_router, AppState};
use fieldgrid::cache::{CacheRepository, ClusterCache, MemoryStore};
use fieldgrid::cluster::{ClusterJobQueue, ClusterQueryService, ClusterService};
use fieldgrid::geo::{self, ClusterResolution};
use fieldgrid::ingest::{ImportProcessor, ImportService};
use fieldgrid::model::Cluster;
use fieldgrid::storage::ClusterRepository;
use fieldgrid::testing::{
    InMemoryClusterJobRepository, InMemoryClusterRepository, InMemoryFieldRepository,
    InMemoryImportJobRepository, InMemoryObjectStore, RecordingWorkflow, StaticFeatureSource,
};
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub server: TestServer,
    pub fields: Arc<InMemoryFieldRepository>,
    pub clusters: Arc<InMemoryClusterRepository>,
    pub cluster_jobs: Arc<InMemoryClusterJobRepository>,
    pub import_jobs: Arc<InMemoryImportJobRepository>,
    pub store: Arc<InMemoryObjectStore>,
    pub workflow: Arc<RecordingWorkflow>,
    pub cache: Arc<ClusterCache>,
    pub queue: ClusterJobQueue,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// 打开 `POST /imports`，上游返回固定文档
    pub fn with_upstream(document: Vec<u8>) -> Self {
        Self::build(Some(StaticFeatureSource::new(document)))
    }

    pub fn with_source(source: StaticFeatureSource) -> Self {
        Self::build(Some(source))
    }

    fn build(source: Option<StaticFeatureSource>) -> Self {
        let fields = Arc::new(InMemoryFieldRepository::new());
        let clusters = Arc::new(InMemoryClusterRepository::new(fields.clone()));
        let cluster_jobs = Arc::new(InMemoryClusterJobRepository::new());
        let import_jobs = Arc::new(InMemoryImportJobRepository::new());
        let store = Arc::new(InMemoryObjectStore::new());
        let workflow = Arc::new(RecordingWorkflow::new());
        let cache = Arc::new(ClusterCache::new(Arc::new(MemoryStore::new())));
        let queue = ClusterJobQueue::new(cluster_jobs.clone());

        let query = Arc::new(ClusterQueryService::new(
            clusters.clone(),
            cluster_jobs.clone(),
            cache.clone(),
        ));
        let mut state = AppState::new(query, queue.clone(), fields.clone(), import_jobs.clone());
        if let Some(source) = source {
            let imports = ImportService::new(
                import_jobs.clone(),
                Arc::new(source),
                store.clone(),
                workflow.clone(),
            );
            state = state.with_imports(Arc::new(imports));
        }

        Self {
            server: TestServer::new(create_router(state)).unwrap(),
            fields,
            clusters,
            cluster_jobs,
            import_jobs,
            store,
            workflow,
            cache,
            queue,
        }
    }

    pub fn processor(&self) -> ImportProcessor {
        ImportProcessor::new(
            self.import_jobs.clone(),
            self.fields.clone(),
            self.store.clone(),
        )
        .with_cluster_queue(self.queue.clone())
    }

    pub fn cluster_service(&self) -> ClusterService {
        ClusterService::new(
            self.cluster_jobs.clone(),
            self.clusters.clone(),
            self.cache.clone(),
        )
    }

    /// 直接写入一行聚合，中心取单元中心
    pub async fn seed_cluster(&self, lat: f64, lng: f64, count: i32) -> String {
        let h3 = geo::lat_lng_to_cell(lat, lng, ClusterResolution::Res7).unwrap();
        let center = geo::cell_to_lat_lng(&h3).unwrap();
        self.clusters
            .save_clusters(&[Cluster {
                id: None,
                resolution: ClusterResolution::Res7,
                h3_index: h3.clone(),
                field_count: count,
                center_lat: center.lat,
                center_lng: center.lng,
                calculated_at: Utc::now(),
            }])
            .await
            .unwrap();
        h3
    }

    pub async fn cached_res7(&self) -> Option<Vec<Cluster>> {
        self.cache
            .get_clusters(ClusterResolution::Res7)
            .await
            .unwrap()
    }
}

pub const TOKYO_VIEWPORT: &str = "/clusters?zoom=12&sw_lat=35&sw_lng=139&ne_lat=36&ne_lng=140";

pub fn feature(id: Uuid, lat: f64, lng: f64) -> Value {
    let d = 0.001;
    json!({
        "geometry": {
            "type": "Polygon",
            "coordinates": [[
                [lng - d, lat - d], [lng + d, lat - d], [lng + d, lat + d], [lng - d, lat + d]
            ]]
        },
        "properties": {
            "ID": id.to_string(),
            "CityCode": "13101",
            "PinInfo": [{ "LandCategoryCode": "01", "LandCategory": "田", "Area": "1200.5" }]
        }
    })
}

pub fn document(features: Vec<Value>) -> Vec<u8> {
    serde_json::to_vec(&json!({ "count": features.len(), "targetFeatures": features })).unwrap()
}
