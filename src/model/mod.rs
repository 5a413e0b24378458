//! 领域模型：与存储实现无关的实体与状态枚举。

pub mod cluster;
pub mod cluster_job;
pub mod field;
pub mod import_job;

pub use cluster::{Cluster, H3Count};
pub use cluster_job::{ClusterJob, ClusterJobStatus, EnqueueOutcome};
pub use field::{
    CodeName, Field, FieldFilter, FieldInput, FieldPage, H3Indexes, LandRegistryInput,
    SoilTypeInput,
};
pub use import_job::{ImportJob, ImportJobStatus, ImportProgress};

use chrono::{DateTime, TimeZone, Utc};

/// 存储层统一使用毫秒时间戳。
pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
