use crate::cluster::ClusterService;
use crate::storage::repository::ClusterJobRepository;
use log::{error, info, warn};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// 空闲时的轮询间隔，实际睡眠在 ±20% 内抖动
    pub interval: Duration,
    pub batch_size: u64,
    /// 启动时把心跳停止超过该时长的 processing 任务放回队列
    pub stale_after: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            batch_size: 10,
            stale_after: Duration::from_secs(30 * 60),
        }
    }
}

pub struct ClusterWorker {
    service: Arc<ClusterService>,
    jobs: Arc<dyn ClusterJobRepository>,
    config: WorkerConfig,
}

impl ClusterWorker {
    pub fn new(
        service: Arc<ClusterService>,
        jobs: Arc<dyn ClusterJobRepository>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            service,
            jobs,
            config,
        }
    }

    /// 常驻循环：有任务就连续处理，队列空了再睡眠；`shutdown` 触发后退出。
    pub async fn run(self, shutdown: CancellationToken) {
        match self.jobs.reset_stale_processing(self.config.stale_after).await {
            Ok(0) => {}
            Ok(n) => warn!("⚠ 发现 {} 个中断的聚合任务，已重置为 pending", n),
            Err(e) => error!("重置中断的聚合任务失败: {}", e),
        }
        info!(
            "🚀 聚合 worker 已启动 (interval={:?}, batch={})",
            self.config.interval, self.config.batch_size
        );

        while !shutdown.is_cancelled() {
            let idle = match self.service.process_jobs(self.config.batch_size).await {
                Ok(report) => {
                    if !report.is_idle() {
                        info!(
                            "聚合批次: 领取 {} / 完成 {} / 合并 {} / 失败 {}",
                            report.claimed, report.completed, report.coalesced, report.failed
                        );
                    }
                    report.is_idle()
                }
                Err(e) => {
                    error!("聚合任务出队失败: {}", e);
                    true
                }
            };
            if !idle {
                continue;
            }

            let delay = jittered(self.config.interval);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(delay) => {}
            }
        }
        info!("聚合 worker 已停止");
    }
}

fn jittered(interval: Duration) -> Duration {
    let base = interval.as_millis() as u64;
    let spread = base / 5;
    if spread == 0 {
        return interval;
    }
    let offset = rand::thread_rng().gen_range(0..=spread * 2);
    Duration::from_millis(base - spread + offset)
}
