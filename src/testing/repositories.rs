use super::lock;
use crate::geo::ClusterResolution;
use crate::model::{
    Cluster, ClusterJob, ClusterJobStatus, Field, FieldFilter, FieldInput, FieldPage, H3Count,
    ImportJob, ImportJobStatus, ImportProgress,
};
use crate::storage::repository::cluster_job_repo::{COMPLETED_RETENTION, FAILED_RETENTION};
use crate::storage::repository::{
    ClusterJobRepository, ClusterJobTransaction, ClusterRepository, FieldRepository,
    ImportJobRepository,
};
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DbErr;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

fn injected(what: &str) -> StorageError {
    StorageError::Db(DbErr::Custom(format!("injected failure: {what}")))
}

// ---------------------------------------------------------------------------
// fields

struct StoredField {
    input: FieldInput,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InMemoryFieldRepository {
    rows: Mutex<BTreeMap<Uuid, StoredField>>,
    rejected: Mutex<HashSet<Uuid>>,
}

impl InMemoryFieldRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 含该 id 的批次整体失败
    pub fn reject(&self, id: Uuid) {
        lock(&self.rejected).insert(id);
    }

    pub fn snapshot(&self) -> Vec<FieldInput> {
        lock(&self.rows).values().map(|r| r.input.clone()).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.rows).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn count_by(&self, resolution: ClusterResolution, only: Option<&HashSet<&str>>) -> Vec<H3Count> {
        let mut counts: BTreeMap<String, i64> = BTreeMap::new();
        for row in lock(&self.rows).values() {
            let cell = row.input.h3.get(resolution);
            if only.is_some_and(|set| !set.contains(cell)) {
                continue;
            }
            *counts.entry(cell.to_string()).or_default() += 1;
        }
        counts
            .into_iter()
            .map(|(h3, count)| H3Count { h3, count })
            .collect()
    }

    fn cells_by(
        &self,
        target: ClusterResolution,
        source: ClusterResolution,
        only: &HashSet<&str>,
    ) -> Vec<String> {
        let cells: BTreeSet<String> = lock(&self.rows)
            .values()
            .filter(|row| only.contains(row.input.h3.get(source)))
            .map(|row| row.input.h3.get(target).to_string())
            .collect();
        cells.into_iter().collect()
    }
}

fn to_field(row: &StoredField) -> Field {
    Field {
        id: row.input.id,
        city_code: row.input.city_code.clone(),
        geometry: Some(row.input.geometry.clone()),
        centroid: Some(row.input.centroid),
        area_sqm: row.input.area_sqm,
        h3: row.input.h3.clone(),
        soil_type_id: None,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

#[async_trait]
impl FieldRepository for InMemoryFieldRepository {
    async fn upsert_batch(&self, inputs: &[FieldInput]) -> Result<usize, StorageError> {
        {
            let rejected = lock(&self.rejected);
            if let Some(bad) = inputs.iter().find(|i| rejected.contains(&i.id)) {
                return Err(injected(&format!("field {}", bad.id)));
            }
        }
        let now = Utc::now();
        let mut rows = lock(&self.rows);
        for input in inputs {
            let created_at = rows.get(&input.id).map(|r| r.created_at).unwrap_or(now);
            rows.insert(
                input.id,
                StoredField {
                    input: input.clone(),
                    created_at,
                    updated_at: now,
                },
            );
        }
        Ok(inputs.len())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Field>, StorageError> {
        Ok(lock(&self.rows).get(&id).map(to_field))
    }

    async fn list(&self, filter: &FieldFilter) -> Result<FieldPage, StorageError> {
        let rows = lock(&self.rows);
        let matching: Vec<&StoredField> = rows
            .values()
            .filter(|r| {
                filter
                    .city_code
                    .as_ref()
                    .map_or(true, |c| &r.input.city_code == c)
            })
            .collect();
        let total = matching.len() as u64;
        let fields = matching
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(to_field)
            .collect();
        Ok(FieldPage { fields, total })
    }
}

// ---------------------------------------------------------------------------
// clusters

/// 聚合直接读取共享的 [`InMemoryFieldRepository`]
pub struct InMemoryClusterRepository {
    fields: Arc<InMemoryFieldRepository>,
    rows: Mutex<BTreeMap<(ClusterResolution, String), Cluster>>,
    next_id: AtomicI32,
    fail_full_aggregates: AtomicBool,
    fail_reads: AtomicBool,
    replace_calls: AtomicUsize,
}

impl InMemoryClusterRepository {
    pub fn new(fields: Arc<InMemoryFieldRepository>) -> Self {
        Self {
            fields,
            rows: Mutex::new(BTreeMap::new()),
            next_id: AtomicI32::new(1),
            fail_full_aggregates: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            replace_calls: AtomicUsize::new(0),
        }
    }

    /// 让 `aggregate_by_h3` 失败，差量聚合不受影响
    pub fn fail_full_aggregates(&self, fail: bool) {
        self.fail_full_aggregates.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn replace_calls(&self) -> usize {
        self.replace_calls.load(Ordering::SeqCst)
    }

    fn upsert(&self, rows: &mut BTreeMap<(ClusterResolution, String), Cluster>, c: &Cluster) {
        let key = (c.resolution, c.h3_index.clone());
        let id = rows
            .get(&key)
            .and_then(|existing| existing.id)
            .unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut stored = c.clone();
        stored.id = Some(id);
        rows.insert(key, stored);
    }
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn get_clusters(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<Cluster>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(injected("get_clusters"));
        }
        Ok(lock(&self.rows)
            .values()
            .filter(|c| c.resolution == resolution)
            .cloned()
            .collect())
    }

    async fn save_clusters(&self, clusters: &[Cluster]) -> Result<(), StorageError> {
        let mut rows = lock(&self.rows);
        for c in clusters {
            self.upsert(&mut rows, c);
        }
        Ok(())
    }

    async fn replace_clusters(
        &self,
        resolution: ClusterResolution,
        clusters: &[Cluster],
    ) -> Result<(), StorageError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = lock(&self.rows);
        rows.retain(|(res, _), _| *res != resolution);
        for c in clusters.iter().filter(|c| c.resolution == resolution) {
            self.upsert(&mut rows, c);
        }
        Ok(())
    }

    async fn delete_clusters_by_resolution(
        &self,
        resolution: ClusterResolution,
    ) -> Result<u64, StorageError> {
        let mut rows = lock(&self.rows);
        let before = rows.len();
        rows.retain(|(res, _), _| *res != resolution);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_all_clusters(&self) -> Result<u64, StorageError> {
        let mut rows = lock(&self.rows);
        let n = rows.len() as u64;
        rows.clear();
        Ok(n)
    }

    async fn aggregate_by_h3(
        &self,
        resolution: ClusterResolution,
    ) -> Result<Vec<H3Count>, StorageError> {
        if self.fail_full_aggregates.load(Ordering::SeqCst) {
            return Err(injected("aggregate_by_h3"));
        }
        Ok(self.fields.count_by(resolution, None))
    }

    async fn aggregate_by_h3_for_cells(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<H3Count>, StorageError> {
        let only: HashSet<&str> = cells.iter().map(String::as_str).collect();
        Ok(self.fields.count_by(resolution, Some(&only)))
    }

    async fn cells_for_fields(
        &self,
        resolution: ClusterResolution,
        source: ClusterResolution,
        cells: &[String],
    ) -> Result<Vec<String>, StorageError> {
        let only: HashSet<&str> = cells.iter().map(String::as_str).collect();
        Ok(self.fields.cells_by(resolution, source, &only))
    }

    async fn delete_clusters_by_h3_indexes(
        &self,
        resolution: ClusterResolution,
        cells: &[String],
    ) -> Result<u64, StorageError> {
        let mut rows = lock(&self.rows);
        let mut removed = 0;
        for cell in cells {
            if rows.remove(&(resolution, cell.clone())).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// cluster jobs

#[derive(Default)]
struct JobState {
    /// 插入顺序
    jobs: Vec<ClusterJob>,
    locked: HashSet<Uuid>,
    /// processing 任务最近一次心跳
    heartbeats: HashMap<Uuid, DateTime<Utc>>,
    fail_lookups: bool,
}

impl JobState {
    fn get_mut(&mut self, id: Uuid) -> Option<&mut ClusterJob> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }
}

/// 用进程内锁集合模拟 `FOR UPDATE SKIP LOCKED`
#[derive(Default, Clone)]
pub struct InMemoryClusterJobRepository {
    state: Arc<Mutex<JobState>>,
}

impl InMemoryClusterJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让出队查询与 `has_pending_or_processing_job` 失败
    pub fn fail_lookups(&self, fail: bool) {
        lock(&self.state).fail_lookups = fail;
    }

    pub fn snapshot(&self) -> Vec<ClusterJob> {
        lock(&self.state).jobs.clone()
    }

    /// 直接把任务置为 processing，模拟崩溃的 worker
    pub fn force_processing(&self, id: Uuid, started_at: DateTime<Utc>) {
        let mut state = lock(&self.state);
        if let Some(job) = state.get_mut(id) {
            job.status = ClusterJobStatus::Processing;
            job.started_at = Some(started_at);
        }
        state.heartbeats.insert(id, started_at);
    }

    /// 改写完成时间，用于验证保留期清理
    pub fn backdate_completion(&self, id: Uuid, completed_at: DateTime<Utc>) {
        if let Some(job) = lock(&self.state).get_mut(id) {
            job.completed_at = Some(completed_at);
        }
    }

    fn insert(&self, priority: i32, cells: Vec<String>) -> ClusterJob {
        let job = ClusterJob {
            id: Uuid::new_v4(),
            status: ClusterJobStatus::Pending,
            priority,
            affected_h3_cells: cells,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        lock(&self.state).jobs.push(job.clone());
        job
    }

    fn finish(&self, id: Uuid, status: ClusterJobStatus) -> Result<(), StorageError> {
        let mut state = lock(&self.state);
        let job = state
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found("cluster_job", id))?;
        if job.status != ClusterJobStatus::Processing {
            return Err(StorageError::InvalidTransition {
                entity: "cluster_job",
                id: id.to_string(),
                from: job.status.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }
        job.status = status;
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    fn purge(&self, status: &str, retention: Duration) -> u64 {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::zero());
        let mut state = lock(&self.state);
        let before = state.jobs.len();
        state.jobs.retain(|j| {
            !(j.status.as_str() == status && j.completed_at.is_some_and(|at| at < cutoff))
        });
        (before - state.jobs.len()) as u64
    }
}

pub struct InMemoryClusterJobTransaction {
    state: Arc<Mutex<JobState>>,
    locked: Vec<Uuid>,
    staged: Vec<Uuid>,
}

impl InMemoryClusterJobTransaction {
    fn release(&mut self) {
        let mut state = lock(&self.state);
        for id in self.locked.drain(..) {
            state.locked.remove(&id);
        }
    }
}

impl Drop for InMemoryClusterJobTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl ClusterJobTransaction for InMemoryClusterJobTransaction {
    async fn find_pending_jobs(&mut self, limit: u64) -> Result<Vec<ClusterJob>, StorageError> {
        let mut state = lock(&self.state);
        if state.fail_lookups {
            return Err(injected("find_pending_jobs"));
        }
        let mut pending: Vec<ClusterJob> = state
            .jobs
            .iter()
            .filter(|j| j.status == ClusterJobStatus::Pending && !state.locked.contains(&j.id))
            .cloned()
            .collect();
        // 稳定排序，同优先级同时间戳时保持插入顺序
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        pending.truncate(limit as usize);
        for job in &pending {
            state.locked.insert(job.id);
            self.locked.push(job.id);
        }
        Ok(pending)
    }

    async fn update_to_processing(&mut self, id: Uuid) -> Result<(), StorageError> {
        let state = lock(&self.state);
        let job = state
            .jobs
            .iter()
            .find(|j| j.id == id)
            .ok_or_else(|| StorageError::not_found("cluster_job", id))?;
        if job.status != ClusterJobStatus::Pending {
            return Err(StorageError::InvalidTransition {
                entity: "cluster_job",
                id: id.to_string(),
                from: job.status.as_str().to_string(),
                to: ClusterJobStatus::PROCESSING.to_string(),
            });
        }
        drop(state);
        self.staged.push(id);
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        {
            let mut state = lock(&self.state);
            let now = Utc::now();
            for id in &self.staged {
                if let Some(job) = state.get_mut(*id) {
                    job.status = ClusterJobStatus::Processing;
                    job.started_at = Some(now);
                }
                state.heartbeats.insert(*id, now);
            }
        }
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.staged.clear();
        self.release();
        Ok(())
    }
}

#[async_trait]
impl ClusterJobRepository for InMemoryClusterJobRepository {
    async fn create(&self, priority: i32) -> Result<ClusterJob, StorageError> {
        Ok(self.insert(priority, Vec::new()))
    }

    async fn create_with_affected_cells(
        &self,
        priority: i32,
        cells: Vec<String>,
    ) -> Result<ClusterJob, StorageError> {
        Ok(self.insert(priority, cells))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ClusterJob>, StorageError> {
        Ok(lock(&self.state).jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn begin(&self) -> Result<Box<dyn ClusterJobTransaction>, StorageError> {
        Ok(Box::new(InMemoryClusterJobTransaction {
            state: self.state.clone(),
            locked: Vec::new(),
            staged: Vec::new(),
        }))
    }

    async fn update_to_completed(&self, id: Uuid) -> Result<(), StorageError> {
        self.finish(id, ClusterJobStatus::Completed)
    }

    async fn update_to_failed(&self, id: Uuid, message: &str) -> Result<(), StorageError> {
        self.finish(id, ClusterJobStatus::Failed(message.to_string()))
    }

    async fn has_pending_or_processing_job(&self) -> Result<bool, StorageError> {
        let state = lock(&self.state);
        if state.fail_lookups {
            return Err(injected("has_pending_or_processing_job"));
        }
        Ok(state.jobs.iter().any(|j| j.status.is_in_flight()))
    }

    async fn delete_old_completed_jobs(&self) -> Result<u64, StorageError> {
        Ok(self.purge(ClusterJobStatus::COMPLETED, COMPLETED_RETENTION))
    }

    async fn delete_old_failed_jobs(&self) -> Result<u64, StorageError> {
        Ok(self.purge(ClusterJobStatus::FAILED, FAILED_RETENTION))
    }

    async fn heartbeat(&self, ids: &[Uuid]) -> Result<u64, StorageError> {
        let now = Utc::now();
        let mut state = lock(&self.state);
        let live: Vec<Uuid> = state
            .jobs
            .iter()
            .filter(|j| j.status == ClusterJobStatus::Processing && ids.contains(&j.id))
            .map(|j| j.id)
            .collect();
        for id in &live {
            state.heartbeats.insert(*id, now);
        }
        Ok(live.len() as u64)
    }

    async fn reset_stale_processing(&self, older_than: Duration) -> Result<u64, StorageError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mut reset = 0;
        for job in state.jobs.iter_mut() {
            let last = state.heartbeats.get(&job.id).copied().or(job.started_at);
            if job.status == ClusterJobStatus::Processing && last.map_or(true, |at| at <= cutoff) {
                job.status = ClusterJobStatus::Pending;
                job.started_at = None;
                state.heartbeats.remove(&job.id);
                reset += 1;
            }
        }
        Ok(reset)
    }
}

// ---------------------------------------------------------------------------
// import jobs

#[derive(Default)]
pub struct InMemoryImportJobRepository {
    jobs: Mutex<HashMap<Uuid, ImportJob>>,
    fail_updates: AtomicBool,
}

impl InMemoryImportJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让所有写操作失败（`create` 除外）
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: Uuid) -> Option<ImportJob> {
        lock(&self.jobs).get(&id).cloned()
    }

    pub fn all(&self) -> Vec<ImportJob> {
        lock(&self.jobs).values().cloned().collect()
    }

    fn with_job<F>(&self, id: Uuid, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut ImportJob) -> Result<(), StorageError>,
    {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(injected("import job update"));
        }
        let mut jobs = lock(&self.jobs);
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| StorageError::not_found("import_job", id))?;
        f(job)
    }

    fn transition(&self, id: Uuid, status: ImportJobStatus) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            if !status.can_transition_from(&job.status) {
                return Err(StorageError::InvalidTransition {
                    entity: "import_job",
                    id: id.to_string(),
                    from: job.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                });
            }
            let now = Utc::now();
            if status == ImportJobStatus::Processing && job.started_at.is_none() {
                job.started_at = Some(now);
            }
            if status.is_terminal() {
                job.completed_at = Some(now);
            }
            job.status = status;
            Ok(())
        })
    }
}

#[async_trait]
impl ImportJobRepository for InMemoryImportJobRepository {
    async fn create(&self, city_code: &str) -> Result<ImportJob, StorageError> {
        let job = ImportJob {
            id: Uuid::new_v4(),
            city_code: city_code.to_string(),
            status: ImportJobStatus::Pending,
            total_records: None,
            processed_records: 0,
            failed_records: 0,
            last_processed_batch: 0,
            object_key: None,
            workflow_execution_ref: None,
            failed_record_ids: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        lock(&self.jobs).insert(job.id, job.clone());
        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<ImportJob>, StorageError> {
        Ok(self.get(id))
    }

    async fn update_status(&self, id: Uuid, status: ImportJobStatus) -> Result<(), StorageError> {
        self.transition(id, status)
    }

    async fn update_progress(
        &self,
        id: Uuid,
        progress: ImportProgress,
    ) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            job.processed_records = progress.processed;
            job.failed_records = progress.failed;
            job.last_processed_batch = progress.batch;
            Ok(())
        })
    }

    async fn update_object_key(&self, id: Uuid, object_key: &str) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            job.object_key = Some(object_key.to_string());
            Ok(())
        })
    }

    async fn update_workflow_ref(&self, id: Uuid, reference: &str) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            job.workflow_execution_ref = Some(reference.to_string());
            Ok(())
        })
    }

    async fn update_total_records(&self, id: Uuid, total: i64) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            job.total_records = Some(total);
            Ok(())
        })
    }

    async fn update_error(
        &self,
        id: Uuid,
        message: &str,
        failed_ids: &[String],
    ) -> Result<(), StorageError> {
        self.transition(id, ImportJobStatus::Failed(message.to_string()))?;
        self.with_job(id, |job| {
            job.failed_record_ids = failed_ids.to_vec();
            Ok(())
        })
    }

    async fn update_failed_ids(
        &self,
        id: Uuid,
        failed_ids: &[String],
    ) -> Result<(), StorageError> {
        self.with_job(id, |job| {
            job.failed_record_ids = failed_ids.to_vec();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn locked_rows_are_skipped_until_released() {
        let repo = InMemoryClusterJobRepository::new();
        let job = repo.create(0).await.unwrap();

        let mut first = repo.begin().await.unwrap();
        let mut second = repo.begin().await.unwrap();
        assert_eq!(first.find_pending_jobs(10).await.unwrap().len(), 1);
        assert!(second.find_pending_jobs(10).await.unwrap().is_empty());

        first.rollback().await.unwrap();
        assert_eq!(second.find_pending_jobs(10).await.unwrap()[0].id, job.id);
        second.update_to_processing(job.id).await.unwrap();
        second.commit().await.unwrap();

        let stored = repo.find_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ClusterJobStatus::Processing);
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn old_completed_jobs_are_purged() {
        let repo = InMemoryClusterJobRepository::new();
        let job = repo.create(0).await.unwrap();
        repo.force_processing(job.id, Utc::now());
        repo.update_to_completed(job.id).await.unwrap();
        assert_eq!(repo.delete_old_completed_jobs().await.unwrap(), 0);

        repo.backdate_completion(job.id, Utc::now() - chrono::Duration::hours(2));
        assert_eq!(repo.delete_old_completed_jobs().await.unwrap(), 1);
        assert!(repo.snapshot().is_empty());
    }
}
