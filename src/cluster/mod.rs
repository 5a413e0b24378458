//! 聚合引擎：任务入队（去重）、出队加锁、按分辨率重算、缓存失效，以及带过期标记的读路径。

pub mod query;
pub mod queue;
pub mod service;
pub mod worker;

pub use query::{ClusterPoint, ClusterQuery, ClusterQueryService, ClusterView};
pub use queue::{ClusterJobQueue, IMPORT_PRIORITY, MANUAL_PRIORITY};
pub use service::{BatchReport, ClusterService};
pub use worker::{ClusterWorker, WorkerConfig};

use crate::storage::StorageError;

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid h3 cell: {0}")]
    InvalidCell(String),
    #[error(transparent)]
    Geo(#[from] crate::geo::GeoError),
}
