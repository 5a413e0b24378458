use crate::cache::CacheRepository;
use crate::cluster::ClusterError;
use crate::geo::{self, ClusterResolution};
use crate::model::ClusterJob;
use crate::storage::repository::{ClusterJobRepository, ClusterRepository};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// 一次 `process_jobs` 的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// 被同批第一个全量任务覆盖、未重复执行的全量任务
    pub coalesced: usize,
}

impl BatchReport {
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

pub struct ClusterService {
    jobs: Arc<dyn ClusterJobRepository>,
    clusters: Arc<dyn ClusterRepository>,
    cache: Arc<dyn CacheRepository>,
}

impl ClusterService {
    pub fn new(
        jobs: Arc<dyn ClusterJobRepository>,
        clusters: Arc<dyn ClusterRepository>,
        cache: Arc<dyn CacheRepository>,
    ) -> Self {
        Self {
            jobs,
            clusters,
            cache,
        }
    }

    /// 领取并执行最多 `batch_size` 个任务。
    ///
    /// 领取（加锁查询 + 置为 processing）在一个事务里完成并立即提交，
    /// 重算在事务之外进行，行锁不会跨越耗时的聚合。
    /// 只有领取阶段的查询失败会返回错误。
    pub async fn process_jobs(&self, batch_size: u64) -> Result<BatchReport, ClusterError> {
        let claimed = self.claim(batch_size.max(1)).await?;
        let mut report = BatchReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        if claimed.is_empty() {
            return Ok(report);
        }

        let ids: Vec<Uuid> = claimed.iter().map(|j| j.id).collect();
        let mut full_done = false;
        for (i, job) in claimed.into_iter().enumerate() {
            // 当前任务及本批尚未执行的任务
            let in_flight = &ids[i..];
            if job.is_full_recompute() && full_done {
                self.complete(&job).await;
                report.coalesced += 1;
                debug!("聚合任务 [{}] 已被同批全量重算覆盖", job.id);
                continue;
            }

            let result = if job.is_full_recompute() {
                self.recompute_full(in_flight).await
            } else {
                self.recompute_differential(&job.affected_h3_cells, in_flight)
                    .await
            };
            match result {
                Ok(()) => {
                    if job.is_full_recompute() {
                        full_done = true;
                    }
                    self.complete(&job).await;
                    report.completed += 1;
                    info!("✓ 聚合任务完成 [{}]", job.id);
                }
                Err(e) => {
                    error!("✗ 聚合任务失败 [{}]: {}", job.id, e);
                    if let Err(mark) = self.jobs.update_to_failed(job.id, &e.to_string()).await {
                        error!("无法标记聚合任务失败 [{}]: {}", job.id, mark);
                    }
                    report.failed += 1;
                }
            }
        }

        self.collect_garbage().await;
        Ok(report)
    }

    async fn claim(&self, limit: u64) -> Result<Vec<ClusterJob>, ClusterError> {
        let mut txn = self.jobs.begin().await?;
        let pending = match txn.find_pending_jobs(limit).await {
            Ok(jobs) => jobs,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    warn!("⚠ 回滚出队事务失败: {}", rb);
                }
                return Err(e.into());
            }
        };

        let mut claimed = Vec::with_capacity(pending.len());
        for job in pending {
            match txn.update_to_processing(job.id).await {
                Ok(()) => claimed.push(job),
                Err(e) => warn!("⚠ 无法领取聚合任务 [{}]，跳过: {}", job.id, e),
            }
        }
        txn.commit().await?;
        Ok(claimed)
    }

    async fn complete(&self, job: &ClusterJob) {
        if let Err(e) = self.jobs.update_to_completed(job.id).await {
            error!("无法标记聚合任务完成 [{}]: {}", job.id, e);
        }
    }

    async fn collect_garbage(&self) {
        match self.jobs.delete_old_completed_jobs().await {
            Ok(n) if n > 0 => debug!("清理已完成聚合任务 {} 条", n),
            Ok(_) => {}
            Err(e) => warn!("⚠ 清理已完成聚合任务失败: {}", e),
        }
        match self.jobs.delete_old_failed_jobs().await {
            Ok(n) if n > 0 => debug!("清理失败聚合任务 {} 条", n),
            Ok(_) => {}
            Err(e) => warn!("⚠ 清理失败聚合任务失败: {}", e),
        }
    }

    /// 全量重算，按 3 → 5 → 7 → 9 顺序。
    ///
    /// 某分辨率聚合结果为空时保留现有行；非空时该分辨率下已不存在的单元会被删除。
    pub async fn recompute(&self) -> Result<(), ClusterError> {
        self.recompute_full(&[]).await
    }

    async fn recompute_full(&self, in_flight: &[Uuid]) -> Result<(), ClusterError> {
        for resolution in ClusterResolution::ALL {
            self.heartbeat(in_flight).await;
            let rows = self.clusters.aggregate_by_h3(resolution).await?;
            if rows.is_empty() {
                debug!("{} 无地块，保留现有聚合", resolution);
                continue;
            }
            let clusters = geo::aggregate_to_clusters(resolution, &rows);
            if clusters.len() < rows.len() {
                warn!(
                    "⚠ {} 有 {} 个非法 H3 索引被跳过",
                    resolution,
                    rows.len() - clusters.len()
                );
            }
            if clusters.is_empty() {
                continue;
            }
            self.clusters.replace_clusters(resolution, &clusters).await?;
            debug!("{} 重算完成: {} 个单元", resolution, clusters.len());
        }
        self.invalidate_cache().await;
        Ok(())
    }

    /// 差量重算。每个分辨率上需要重算的单元是：
    /// 列出单元在该分辨率上的祖先（目标不细于单元自身时才有，用于清理已搬空的旧行），
    /// 加上列出单元所覆盖地块在该分辨率上实际存储的索引。
    /// 重算后计数为零的单元删除其旧行。
    pub async fn recompute_cells(&self, cells: &[String]) -> Result<(), ClusterError> {
        self.recompute_differential(cells, &[]).await
    }

    async fn recompute_differential(
        &self,
        cells: &[String],
        in_flight: &[Uuid],
    ) -> Result<(), ClusterError> {
        let by_source = group_by_resolution(cells);
        for resolution in ClusterResolution::ALL {
            self.heartbeat(in_flight).await;
            let wanted = self.cells_at(resolution, cells, &by_source).await?;
            if wanted.is_empty() {
                continue;
            }
            let rows = self
                .clusters
                .aggregate_by_h3_for_cells(resolution, &wanted)
                .await?;
            let clusters = geo::aggregate_to_clusters(resolution, &rows);
            let present: HashSet<&str> = clusters.iter().map(|c| c.h3_index.as_str()).collect();
            let gone: Vec<String> = wanted
                .iter()
                .filter(|c| !present.contains(c.as_str()))
                .cloned()
                .collect();

            if !gone.is_empty() {
                self.clusters
                    .delete_clusters_by_h3_indexes(resolution, &gone)
                    .await?;
            }
            if !clusters.is_empty() {
                self.clusters.save_clusters(&clusters).await?;
            }
            debug!(
                "{} 差量重算: 更新 {} 个，删除 {} 个",
                resolution,
                clusters.len(),
                gone.len()
            );
        }
        self.invalidate_cache().await;
        Ok(())
    }

    /// `cells` 在 `resolution` 上对应的单元集合（去重、有序）
    async fn cells_at(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
        by_source: &BTreeMap<ClusterResolution, Vec<String>>,
    ) -> Result<Vec<String>, ClusterError> {
        let mut out = BTreeSet::new();
        for cell in cells {
            if let Ok(Some(parent)) = geo::cell_parent(cell, resolution) {
                out.insert(parent);
            }
        }
        for (source, listed) in by_source {
            if *source == resolution {
                continue;
            }
            let stored = self
                .clusters
                .cells_for_fields(resolution, *source, listed)
                .await?;
            out.extend(stored);
        }
        Ok(out.into_iter().collect())
    }

    /// 刷新心跳，防止执行中的任务被当作中断任务重置
    async fn heartbeat(&self, ids: &[Uuid]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.jobs.heartbeat(ids).await {
            warn!("⚠ 刷新聚合任务心跳失败: {}", e);
        }
    }

    async fn invalidate_cache(&self) {
        if let Err(e) = self.cache.delete_clusters().await {
            // TTL 兜底
            warn!("⚠ 清除聚合缓存失败: {}", e);
        }
    }
}

/// 按聚合分辨率分组。非法索引丢弃；其他分辨率的单元只参与祖先映射。
fn group_by_resolution(cells: &[String]) -> BTreeMap<ClusterResolution, Vec<String>> {
    let mut out: BTreeMap<ClusterResolution, Vec<String>> = BTreeMap::new();
    for cell in cells {
        let Some(value) = geo::cell_resolution(cell) else {
            warn!("⚠ 跳过非法 H3 索引: {}", cell);
            continue;
        };
        if let Some(resolution) = ClusterResolution::from_value(i32::from(value)) {
            out.entry(resolution).or_default().push(cell.clone());
        }
    }
    out
}
