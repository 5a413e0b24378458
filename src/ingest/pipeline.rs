use crate::cluster::{ClusterJobQueue, IMPORT_PRIORITY};
use crate::ingest::reader::{spawn_reader, DocumentError, FeatureItem};
use crate::ingest::IngestError;
use crate::model::{FieldInput, ImportJobStatus, ImportProgress};
use crate::object_store::ObjectStore;
use crate::storage::repository::{FieldRepository, ImportJobRepository};
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
const NO_RECORDS_PROCESSED: &str = "no records processed";

/// 一次导入的最终结果
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    pub job_id: Uuid,
    pub status: ImportJobStatus,
    pub processed: i64,
    pub failed: i64,
    pub total: i64,
}

#[derive(Default)]
struct Tally {
    processed: i64,
    failed: i64,
    batch: i64,
    failed_ids: Vec<String>,
}

pub struct ImportProcessor {
    jobs: Arc<dyn ImportJobRepository>,
    fields: Arc<dyn FieldRepository>,
    store: Arc<dyn ObjectStore>,
    queue: Option<ClusterJobQueue>,
}

impl ImportProcessor {
    pub fn new(
        jobs: Arc<dyn ImportJobRepository>,
        fields: Arc<dyn FieldRepository>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            jobs,
            fields,
            store,
            queue: None,
        }
    }

    /// 导入有成功记录时自动入队一次全量聚合
    pub fn with_cluster_queue(mut self, queue: ClusterJobQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    /// 执行一次导入。
    ///
    /// 单条要素的解码或写入失败计入 `failed_records` 并继续；
    /// 对象存储不可读、文档结构错误、取消会把任务置为 failed 并返回错误；
    /// 任务记录本身写不进去时直接返回错误。
    pub async fn process(
        &self,
        job_id: Uuid,
        object_key: &str,
        batch_size: i64,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary, IngestError> {
        let batch_size = normalize_batch_size(batch_size);
        let job = self
            .jobs
            .find_by_id(job_id)
            .await?
            .ok_or(IngestError::JobNotFound(job_id))?;
        if job.status.is_terminal() {
            return Err(IngestError::AlreadyFinished {
                id: job_id,
                status: job.status.as_str(),
            });
        }

        self.jobs
            .update_status(job_id, ImportJobStatus::Processing)
            .await?;
        if job.object_key.as_deref() != Some(object_key) {
            self.jobs.update_object_key(job_id, object_key).await?;
        }
        info!(
            "▶ 导入开始 [{}] key={} batch_size={}",
            job_id, object_key, batch_size
        );

        let reader = match self.store.open(object_key).await {
            Ok(r) => r,
            Err(e) => {
                self.fail(job_id, &e.to_string(), &[]).await;
                return Err(e.into());
            }
        };

        let (mut rx, reader_task) = spawn_reader(reader, batch_size.min(DEFAULT_BATCH_SIZE));
        let mut tally = Tally::default();
        let mut buffer: Vec<FieldInput> = Vec::with_capacity(batch_size);
        let mut cancelled = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = rx.recv() => item,
            };
            match item {
                None => break,
                Some(FeatureItem::Decoded(input)) => {
                    buffer.push(input);
                    if buffer.len() >= batch_size {
                        self.flush(job_id, &mut buffer, &mut tally).await;
                        if cancel.is_cancelled() {
                            cancelled = true;
                            break;
                        }
                    }
                }
                Some(FeatureItem::Malformed { id, reason }) => {
                    warn!(
                        "⚠ 要素解码失败 [{}] id={}: {}",
                        job_id,
                        id.as_deref().unwrap_or("?"),
                        reason
                    );
                    tally.failed += 1;
                    if let Some(id) = id {
                        tally.failed_ids.push(id);
                    }
                }
            }
        }

        if cancelled {
            // 关闭通道，解析线程在下一次发送时退出
            drop(rx);
            drop(reader_task);
            self.fail(job_id, "import cancelled", &tally.failed_ids).await;
            warn!("⚠ 导入已取消 [{}]", job_id);
            return Err(IngestError::Cancelled);
        }

        if !buffer.is_empty() {
            self.flush(job_id, &mut buffer, &mut tally).await;
        }

        let document = reader_task
            .await
            .unwrap_or_else(|e| Err(DocumentError::Aborted(e.to_string())));
        let features = match document {
            Ok(n) => n,
            Err(e) => {
                self.fail(job_id, &e.to_string(), &tally.failed_ids).await;
                return Err(e.into());
            }
        };
        debug!("导入文档读取完毕 [{}]: {} 个要素", job_id, features);

        self.finish(job_id, tally).await
    }

    async fn flush(&self, job_id: Uuid, buffer: &mut Vec<FieldInput>, tally: &mut Tally) {
        let size = buffer.len() as i64;
        match self.fields.upsert_batch(buffer.as_slice()).await {
            Ok(_) => tally.processed += size,
            Err(e) => {
                warn!(
                    "⚠ 批次写入失败 [{}] batch={} size={}: {}",
                    job_id,
                    tally.batch + 1,
                    size,
                    e
                );
                tally.failed += size;
                tally
                    .failed_ids
                    .extend(buffer.iter().map(|f| f.id.to_string()));
            }
        }
        buffer.clear();
        tally.batch += 1;

        let progress = ImportProgress {
            processed: tally.processed,
            failed: tally.failed,
            batch: tally.batch,
        };
        if let Err(e) = self.jobs.update_progress(job_id, progress).await {
            warn!("⚠ 进度写入失败 [{}]: {}", job_id, e);
        }
    }

    async fn finish(&self, job_id: Uuid, tally: Tally) -> Result<ImportSummary, IngestError> {
        let total = tally.processed + tally.failed;
        self.jobs
            .update_progress(
                job_id,
                ImportProgress {
                    processed: tally.processed,
                    failed: tally.failed,
                    batch: tally.batch,
                },
            )
            .await?;
        self.jobs.update_total_records(job_id, total).await?;

        let status = if tally.failed == 0 {
            self.jobs
                .update_status(job_id, ImportJobStatus::Completed)
                .await?;
            ImportJobStatus::Completed
        } else if tally.processed == 0 {
            self.jobs
                .update_error(job_id, NO_RECORDS_PROCESSED, &tally.failed_ids)
                .await?;
            ImportJobStatus::Failed(NO_RECORDS_PROCESSED.to_string())
        } else {
            self.jobs
                .update_failed_ids(job_id, &tally.failed_ids)
                .await?;
            self.jobs
                .update_status(job_id, ImportJobStatus::PartiallyCompleted)
                .await?;
            ImportJobStatus::PartiallyCompleted
        };
        info!(
            "✓ 导入结束 [{}]: {} (成功 {} / 失败 {} / 共 {})",
            job_id,
            status.as_str(),
            tally.processed,
            tally.failed,
            total
        );

        if tally.processed > 0 {
            if let Some(queue) = &self.queue {
                if let Err(e) = queue.enqueue(IMPORT_PRIORITY).await {
                    warn!("⚠ 导入后聚合入队失败 [{}]: {}", job_id, e);
                }
            }
        }

        Ok(ImportSummary {
            job_id,
            status,
            processed: tally.processed,
            failed: tally.failed,
            total,
        })
    }

    /// 记录失败；失败本身写不进去只能记日志
    async fn fail(&self, job_id: Uuid, message: &str, failed_ids: &[String]) {
        if let Err(e) = self.jobs.update_error(job_id, message, failed_ids).await {
            error!("无法标记导入任务失败 [{}]: {} (原因: {})", job_id, e, message);
        }
    }
}

fn normalize_batch_size(batch_size: i64) -> usize {
    if batch_size <= 0 {
        DEFAULT_BATCH_SIZE
    } else {
        usize::try_from(batch_size).unwrap_or(DEFAULT_BATCH_SIZE)
    }
}
