//! 导入 → 入队 → 重算 → 读取，全程走 SQLite 与本地对象存储。

use fieldgrid::bootstrap::Repositories;
use fieldgrid::cache::{CacheRepository, ClusterCache, MemoryStore};
use fieldgrid::cluster::{
    ClusterJobQueue, ClusterQuery, ClusterQueryService, ClusterService, ClusterWorker,
    WorkerConfig, MANUAL_PRIORITY,
};
use fieldgrid::geo::{self, ClusterResolution, Coordinate};
use fieldgrid::ingest::ImportProcessor;
use fieldgrid::model::{ClusterJobStatus, ImportJobStatus};
use fieldgrid::object_store::{LocalObjectStore, ObjectStore};
use fieldgrid::storage::{
    establish_connection, ClusterJobRepository, ClusterJobTransaction, ClusterRepository,
    FieldRepository, ImportJobRepository,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Stack {
    _dir: TempDir,
    repos: Repositories,
    store: Arc<LocalObjectStore>,
    cache: Arc<ClusterCache>,
    queue: ClusterJobQueue,
}

async fn stack() -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("grid.db").display());
    let db = establish_connection(&url, 4).await.unwrap();
    let repos = Repositories::sea_orm(Arc::new(db));
    let store = Arc::new(LocalObjectStore::new(dir.path().join("objects")));
    let cache = Arc::new(ClusterCache::new(Arc::new(MemoryStore::new())));
    let queue = ClusterJobQueue::new(repos.cluster_jobs.clone());
    Stack {
        _dir: dir,
        repos,
        store,
        cache,
        queue,
    }
}

impl Stack {
    fn processor(&self) -> ImportProcessor {
        ImportProcessor::new(
            self.repos.import_jobs.clone(),
            self.repos.fields.clone(),
            self.store.clone(),
        )
        .with_cluster_queue(self.queue.clone())
    }

    fn service(&self) -> ClusterService {
        ClusterService::new(
            self.repos.cluster_jobs.clone(),
            self.repos.clusters.clone(),
            self.cache.clone(),
        )
    }

    fn query(&self) -> ClusterQueryService {
        ClusterQueryService::new(
            self.repos.clusters.clone(),
            self.repos.cluster_jobs.clone(),
            self.cache.clone(),
        )
    }

    /// 把队列里的任务直接标记完成，不执行
    async fn discard_pending(&self) {
        let mut tx = self.repos.cluster_jobs.begin().await.unwrap();
        let pending = tx.find_pending_jobs(10).await.unwrap();
        for job in &pending {
            tx.update_to_processing(job.id).await.unwrap();
        }
        tx.commit().await.unwrap();
        for job in &pending {
            self.repos.cluster_jobs.update_to_completed(job.id).await.unwrap();
        }
    }

    /// 写入导入文件并执行导入
    async fn import(&self, points: &[(f64, f64)]) -> Vec<Uuid> {
        let ids: Vec<Uuid> = points.iter().map(|_| Uuid::new_v4()).collect();
        let features: Vec<_> = ids
            .iter()
            .zip(points)
            .map(|(id, (lat, lng))| {
                let d = 0.0005;
                json!({
                    "geometry": {
                        "type": "LinearPolygon",
                        "coordinates": [[[lng - d, lat - d], [lng + d, lat - d], [lng + d, lat + d], [lng - d, lat + d]]]
                    },
                    "properties": {
                        "ID": id.to_string(),
                        "CityCode": 13101,
                        "SoilSmallCode": "A1",
                        "SoilSmallName": "褐色低地土",
                        "PinInfo": [{
                            "LandCategoryCode": "01",
                            "LandCategory": "田",
                            "Area": 812.0,
                            "DescriptiveStudyData": "2023-04-01"
                        }]
                    }
                })
            })
            .collect();
        let job = self.repos.import_jobs.create("13101").await.unwrap();
        let key = format!("imports/13101/{}.json", job.id);
        let body = serde_json::to_vec(&json!({ "targetFeatures": features })).unwrap();
        self.store.put_bytes(&key, body.into()).await.unwrap();

        let summary = self
            .processor()
            .process(job.id, &key, 2, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.status, ImportJobStatus::Completed);
        ids
    }
}

fn tokyo(zoom: f64) -> ClusterQuery {
    ClusterQuery {
        zoom,
        south_west: Coordinate::new(35.0, 139.0),
        north_east: Coordinate::new(36.0, 140.0),
    }
}

#[tokio::test]
async fn import_then_recompute_then_read() {
    let s = stack().await;
    let mut points = vec![(35.5, 139.5); 10];
    points.extend(vec![(35.7, 139.7); 5]);
    s.import(&points).await;

    // 导入后自动入队，读路径先看到 stale
    let before = s.query().get_clusters(&tokyo(12.0)).await.unwrap();
    assert!(before.is_stale);
    assert!(before.clusters.is_empty());

    let report = s.service().process_jobs(10).await.unwrap();
    assert_eq!((report.claimed, report.completed, report.failed), (1, 1, 0));

    let view = s.query().get_clusters(&tokyo(12.0)).await.unwrap();
    assert!(!view.is_stale);
    let mut counts: Vec<i32> = view.clusters.iter().map(|c| c.count).collect();
    counts.sort();
    assert_eq!(counts, vec![5, 10]);

    let a = geo::lat_lng_to_cell(35.5, 139.5, ClusterResolution::Res7).unwrap();
    let point = view.clusters.iter().find(|c| c.h3 == a).unwrap();
    let center = geo::cell_to_lat_lng(&a).unwrap();
    assert_eq!((point.lat, point.lng), (center.lat, center.lng));

    let cached = s
        .cache
        .get_clusters(ClusterResolution::Res7)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.len(), 2);

    // 每个分辨率都有结果
    for resolution in ClusterResolution::ALL {
        let rows = s.repos.clusters.get_clusters(resolution).await.unwrap();
        let total: i32 = rows.iter().map(|c| c.field_count).sum();
        assert_eq!(total, 15, "{}", resolution);
    }
    let fine = s.query().get_clusters(&tokyo(16.0)).await.unwrap();
    assert_eq!(fine.clusters.len(), 2);
}

#[tokio::test]
async fn differential_job_touches_only_named_cells() {
    let s = stack().await;
    s.import(&[(35.5, 139.5), (35.7, 139.7)]).await;
    s.service().process_jobs(10).await.unwrap();

    s.import(&[(35.5, 139.5), (35.5, 139.5)]).await;
    // 导入自带的全量任务先丢掉，只验证差量
    s.discard_pending().await;

    let a = geo::lat_lng_to_cell(35.5, 139.5, ClusterResolution::Res7).unwrap();
    let b = geo::lat_lng_to_cell(35.7, 139.7, ClusterResolution::Res7).unwrap();
    let outcome = s
        .queue
        .enqueue_cells(MANUAL_PRIORITY, vec![a.clone()])
        .await
        .unwrap();
    let job_id = outcome.job_id.unwrap();
    let report = s.service().process_jobs(10).await.unwrap();
    assert_eq!(report.completed, 1);

    let job = s.repos.cluster_jobs.find_by_id(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, ClusterJobStatus::Completed);
    assert_eq!(job.affected_h3_cells, vec![a.clone()]);

    let rows = s.repos.clusters.get_clusters(ClusterResolution::Res7).await.unwrap();
    let count = |cell: &str| rows.iter().find(|c| c.h3_index == cell).map(|c| c.field_count);
    assert_eq!(count(&a), Some(3));
    assert_eq!(count(&b), Some(1));
}

#[tokio::test]
async fn differential_fine_cell_updates_stored_coarse_cells() {
    let s = stack().await;
    let ids = s.import(&[(35.6812, 139.7671)]).await;
    s.discard_pending().await;

    let field = s.repos.fields.find_by_id(ids[0]).await.unwrap().unwrap();
    s.queue
        .enqueue_cells(MANUAL_PRIORITY, vec![field.h3.res9.clone()])
        .await
        .unwrap();
    let report = s.service().process_jobs(10).await.unwrap();
    assert_eq!(report.completed, 1);

    for (resolution, cell) in [
        (ClusterResolution::Res3, &field.h3.res3),
        (ClusterResolution::Res5, &field.h3.res5),
        (ClusterResolution::Res7, &field.h3.res7),
    ] {
        let rows = s.repos.clusters.get_clusters(resolution).await.unwrap();
        assert_eq!(rows.len(), 1, "{resolution}");
        assert_eq!(&rows[0].h3_index, cell, "{resolution}");
        assert_eq!(rows[0].field_count, 1, "{resolution}");
    }
}

#[tokio::test]
async fn worker_drains_queue_and_stops_on_shutdown() {
    let s = stack().await;
    s.import(&[(35.5, 139.5)]).await;

    let shutdown = CancellationToken::new();
    let worker = ClusterWorker::new(
        Arc::new(s.service()),
        s.repos.cluster_jobs.clone(),
        WorkerConfig {
            interval: Duration::from_millis(20),
            ..WorkerConfig::default()
        },
    );
    let handle = tokio::spawn(worker.run(shutdown.clone()));

    let mut drained = false;
    for _ in 0..100 {
        if !s.repos.cluster_jobs.has_pending_or_processing_job().await.unwrap() {
            drained = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(drained);
    assert_eq!(
        s.repos.clusters.get_clusters(ClusterResolution::Res9).await.unwrap().len(),
        1
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn reimport_is_idempotent() {
    let s = stack().await;
    let job = s.repos.import_jobs.create("13101").await.unwrap();
    let id = Uuid::new_v4();
    let doc = json!({ "targetFeatures": [{
        "geometry": { "type": "Polygon", "coordinates": [[[139.5, 35.5], [139.501, 35.5], [139.501, 35.501], [139.5, 35.501]]] },
        "properties": { "ID": id.to_string(), "CityCode": "13101" }
    }]});
    let key = format!("imports/13101/{}.json", job.id);
    s.store
        .put_bytes(&key, serde_json::to_vec(&doc).unwrap().into())
        .await
        .unwrap();
    s.processor()
        .process(job.id, &key, 0, &CancellationToken::new())
        .await
        .unwrap();

    let again = s.repos.import_jobs.create("13101").await.unwrap();
    s.processor()
        .process(again.id, &key, 0, &CancellationToken::new())
        .await
        .unwrap();

    let page = s
        .repos
        .fields
        .list(&fieldgrid::model::FieldFilter::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.fields[0].id, id);
}
