use fieldgrid::api::{create_router, AppState};
use fieldgrid::bootstrap::{self, Repositories};
use fieldgrid::cache::{ClusterCache, MemoryStore};
use fieldgrid::cluster::{
    ClusterJobQueue, ClusterQueryService, ClusterService, ClusterWorker, WorkerConfig,
};
use fieldgrid::config::Config;
use fieldgrid::ingest::{ImportProcessor, ImportService, InProcessWorkflow};
use fieldgrid::logging;
use fieldgrid::upstream::{UpstreamClient, UpstreamConfig};
use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    match logging::init("fieldgrid-server") {
        Ok(Some(path)) => eprintln!("日志写入 {}", path.display()),
        Ok(None) => {}
        Err(e) => eprintln!("⚠ 日志文件创建失败，输出到 stderr: {}", e),
    }

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("✗ 配置错误: {}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        error!("✗ 服务异常退出: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let db = bootstrap::connect(&config).await?;
    let repos = Repositories::sea_orm(db);
    let store = bootstrap::object_store(&config.object_store).await?;
    let cache = Arc::new(ClusterCache::new(Arc::new(MemoryStore::new())));
    let queue = ClusterJobQueue::new(repos.cluster_jobs.clone());
    let shutdown = CancellationToken::new();

    let query = Arc::new(ClusterQueryService::new(
        repos.clusters.clone(),
        repos.cluster_jobs.clone(),
        cache.clone(),
    ));
    let mut state = AppState::new(
        query,
        queue.clone(),
        repos.fields.clone(),
        repos.import_jobs.clone(),
    )
    .with_request_timeout(config.request_timeout)
    .with_shutdown(shutdown.clone());

    match &config.upstream_base_url {
        Some(base_url) => {
            let mut upstream = UpstreamConfig::new(base_url.clone());
            upstream.api_key = config.upstream_api_key.clone();
            upstream.timeout = config.upstream_timeout;
            let source = Arc::new(UpstreamClient::new(upstream)?);
            let processor = Arc::new(
                ImportProcessor::new(
                    repos.import_jobs.clone(),
                    repos.fields.clone(),
                    store.clone(),
                )
                .with_cluster_queue(queue.clone()),
            );
            let workflow = Arc::new(InProcessWorkflow::new(processor, shutdown.clone()));
            let imports = ImportService::new(repos.import_jobs.clone(), source, store, workflow);
            state = state.with_imports(Arc::new(imports));
            info!("✓ 导入已启用，上游: {}", base_url);
        }
        None => warn!("⚠ 未设置 UPSTREAM_BASE_URL，POST /imports 不可用"),
    }

    let worker = if config.cluster_worker_enabled {
        let service = Arc::new(ClusterService::new(
            repos.cluster_jobs.clone(),
            repos.clusters.clone(),
            cache,
        ));
        let worker = ClusterWorker::new(
            service,
            repos.cluster_jobs.clone(),
            WorkerConfig {
                interval: config.cluster_worker_interval,
                batch_size: config.cluster_worker_batch_size,
                ..WorkerConfig::default()
            },
        );
        Some(tokio::spawn(worker.run(shutdown.clone())))
    } else {
        info!("聚合 worker 已禁用");
        None
    };

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("🚀 HTTP 服务监听 {}", addr);

    let signal = shutdown.clone();
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("收到 Ctrl-C，开始关闭"),
                _ = signal.cancelled() => {}
            }
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            warn!("⚠ 聚合 worker 退出异常: {}", e);
        }
    }
    info!("✓ 服务已停止");
    Ok(())
}
